use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "regionnet")]
#[command(about = "Assemble layers into an inference region and run it")]
#[command(version)]
pub struct Args {
    /// Path to the region composition file (JSON or YAML)
    #[arg(required = true)]
    pub composition_file: PathBuf,

    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Dry-run mode: resolve the region and show its chain without running
    #[arg(long)]
    pub dry_run: bool,

    /// Start the tail layer's sensor instead of reading JSON lines from stdin
    #[arg(long)]
    pub start: bool,

    /// Path to a .env file to load before running
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,
}

// ============================================================================
// Pure display logic (no I/O - returns formatted strings)
// ============================================================================

use crate::config::RegionComposition;
use crate::layer::Layer;
use crate::region::Region;

/// Format a dry-run report of a closed region.
/// Pure function - returns a formatted string.
pub fn format_dry_run(composition: &RegionComposition, region: &Region, args: &Args) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "regionnet v{} - Dry Run Mode\n\n",
        env!("CARGO_PKG_VERSION")
    ));
    output.push_str(&format!(
        "Composition: {}\n\n",
        args.composition_file.display()
    ));

    output.push_str(&format!(
        "Region: {} ({} layers)\n",
        region.name(),
        region.len()
    ));

    output.push_str("\nLayers:\n");
    for spec in &composition.layers {
        output.push_str(&format!(
            "  [{}] transform: {}",
            spec.name,
            spec.transform.to_transform().label()
        ));
        if let Some(sensor) = &spec.sensor {
            output.push_str(&format!(" <- sensor ({} values)", sensor.values.len()));
        }
        output.push('\n');
    }

    if !composition.connections.is_empty() {
        output.push_str("\nConnections:\n");
        for connection in &composition.connections {
            let sink_transform = composition
                .layer(&connection.to)
                .map(|spec| spec.transform.to_transform().label().to_string())
                .unwrap_or_else(|| "?".to_string());
            output.push_str(&format!(
                "  {} -> {} ({})\n",
                connection.from, connection.to, sink_transform
            ));
        }
    }

    let sensors: Vec<&str> = composition
        .sensor_layers()
        .iter()
        .map(|spec| spec.name.as_str())
        .collect();
    if !sensors.is_empty() {
        output.push_str(&format!("\nSensors: {}\n", sensors.join(", ")));
    }

    output.push_str("\nChain:\n");
    output.push_str(&format!(
        "  Tail: {}\n",
        region.tail().map(|l| l.name()).unwrap_or_else(|| "-".to_string())
    ));
    output.push_str(&format!(
        "  Head: {}\n",
        region.head().map(|l| l.name()).unwrap_or_else(|| "-".to_string())
    ));
    output.push_str(&format!(
        "  Relay failures: {:?}\n",
        region.relay_config().policy
    ));

    output.push_str("\nValidation: PASSED\n");
    output.push_str("Ready to run region. Remove --dry-run to execute.\n");

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{build_region, CompositionFormat};
    use crate::registry::DeviceRegistry;
    use std::sync::Arc;

    fn create_test_args() -> Args {
        Args {
            composition_file: PathBuf::from("test.json"),
            verbose: 0,
            dry_run: true,
            start: false,
            env_file: None,
        }
    }

    #[test]
    fn test_format_dry_run_basic() {
        let json = r#"{
            "name": "r1",
            "layers": [
                {"name": "l1", "sensor": {"values": [1, 2]}},
                {"name": "l2", "transform": {"type": "scale", "factor": 2}}
            ],
            "connections": [{"to": "l2", "from": "l1"}]
        }"#;

        let composition = RegionComposition::parse(json, CompositionFormat::Json).unwrap();
        let mut region = build_region(&composition, Arc::new(DeviceRegistry::new())).unwrap();
        region.close().unwrap();
        let output = format_dry_run(&composition, &region, &create_test_args());

        assert!(output.contains("Region: r1 (2 layers)"));
        assert!(output.contains("[l1] transform: passthrough <- sensor (2 values)"));
        assert!(output.contains("[l2] transform: scale(2)"));
        assert!(output.contains("l1 -> l2 (scale(2))"));
        assert!(output.contains("Sensors: l1"));
        assert!(output.contains("Tail: r1:l1"));
        assert!(output.contains("Head: r1:l2"));
        assert!(output.contains("Validation: PASSED"));
    }

    #[test]
    fn test_clap_parsing() {
        let args = Args::parse_from(["regionnet", "region.json"]);
        assert_eq!(args.composition_file, PathBuf::from("region.json"));
        assert!(!args.dry_run);
        assert!(!args.start);
    }

    #[test]
    fn test_clap_flags() {
        let args = Args::parse_from(["regionnet", "--dry-run", "--start", "-vv", "region.yaml"]);
        assert!(args.dry_run);
        assert!(args.start);
        assert_eq!(args.verbose, 2);
    }
}

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::region::RelayPolicy;

/// Errors that can occur during composition parsing and validation
#[derive(Error, Debug, PartialEq)]
pub enum CompositionError {
    #[error("{format} parse error: {message}")]
    ParseError {
        format: CompositionFormat,
        message: String,
    },

    #[error("Region name must not be empty")]
    EmptyRegionName,

    #[error("Region '{0}' defines no layers")]
    NoLayers(String),

    #[error("Duplicate layer name: '{0}'")]
    DuplicateLayerName(String),

    #[error("Layer '{0}' referenced by a connection is not defined")]
    UndefinedLayer(String),

    #[error("Layer '{0}' is connected to itself")]
    SelfConnection(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionFormat {
    Json,
    Yaml,
}

impl CompositionFormat {
    /// YAML for `.yaml`/`.yml`, JSON for anything else
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => CompositionFormat::Yaml,
            _ => CompositionFormat::Json,
        }
    }
}

impl std::fmt::Display for CompositionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompositionFormat::Json => f.write_str("JSON"),
            CompositionFormat::Yaml => f.write_str("YAML"),
        }
    }
}

/// A region described in a composition file
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RegionComposition {
    pub name: String,

    pub layers: Vec<LayerSpec>,

    #[serde(default)]
    pub connections: Vec<ConnectionSpec>,

    #[serde(default)]
    pub relay: RelaySettings,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LayerSpec {
    pub name: String,

    #[serde(default)]
    pub transform: TransformSpec,

    /// Replays fixed values into the layer once the region is started
    #[serde(default)]
    pub sensor: Option<SensorSpec>,
}

/// Built-in layer transforms
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TransformSpec {
    #[default]
    Passthrough,
    Scale {
        factor: f64,
    },
    Offset {
        amount: f64,
    },
    Tag {
        label: String,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SensorSpec {
    /// Defaults to the layer's name
    pub name: Option<String>,

    pub values: Vec<Value>,

    #[serde(rename = "interval-ms")]
    pub interval_ms: Option<u64>,
}

/// `from` feeds `to`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectionSpec {
    pub to: String,
    pub from: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RelaySettings {
    #[serde(rename = "on-failure", default)]
    pub on_failure: RelayPolicy,
}

// ============================================================================
// Pure parsing and validation (no I/O)
// ============================================================================

pub fn parse_composition(
    content: &str,
    format: CompositionFormat,
) -> Result<RegionComposition, CompositionError> {
    let parse_error = |message: String| CompositionError::ParseError { format, message };
    match format {
        CompositionFormat::Json => {
            serde_json::from_str(content).map_err(|e| parse_error(e.to_string()))
        }
        CompositionFormat::Yaml => {
            serde_yaml::from_str(content).map_err(|e| parse_error(e.to_string()))
        }
    }
}

/// Check a composition for consistency before any region is built from it
pub fn validate_composition(composition: &RegionComposition) -> Result<(), CompositionError> {
    if composition.name.trim().is_empty() {
        return Err(CompositionError::EmptyRegionName);
    }
    if composition.layers.is_empty() {
        return Err(CompositionError::NoLayers(composition.name.clone()));
    }

    let mut seen = HashSet::new();
    for layer in &composition.layers {
        if !seen.insert(layer.name.as_str()) {
            return Err(CompositionError::DuplicateLayerName(layer.name.clone()));
        }
    }

    for connection in &composition.connections {
        for name in [&connection.to, &connection.from] {
            if !seen.contains(name.as_str()) {
                return Err(CompositionError::UndefinedLayer(name.clone()));
            }
        }
        if connection.to == connection.from {
            return Err(CompositionError::SelfConnection(connection.to.clone()));
        }
    }

    Ok(())
}

impl RegionComposition {
    /// Parse and validate
    pub fn parse(content: &str, format: CompositionFormat) -> Result<Self, CompositionError> {
        let composition = parse_composition(content, format)?;
        validate_composition(&composition)?;
        Ok(composition)
    }

    pub fn layer(&self, name: &str) -> Option<&LayerSpec> {
        self.layers.iter().find(|l| l.name == name)
    }

    /// Layers that own a sensor
    pub fn sensor_layers(&self) -> Vec<&LayerSpec> {
        self.layers.iter().filter(|l| l.sensor.is_some()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "name": "r1",
        "layers": [
            {"name": "l1", "sensor": {"values": [1, 2, 3], "interval-ms": 5}},
            {"name": "l2", "transform": {"type": "scale", "factor": 2.5}},
            {"name": "l3", "transform": {"type": "tag", "label": "out"}}
        ],
        "connections": [
            {"to": "l2", "from": "l1"},
            {"to": "l3", "from": "l2"}
        ],
        "relay": {"on-failure": "disconnect"}
    }"#;

    #[test]
    fn test_parse_json_composition() {
        let composition = RegionComposition::parse(JSON, CompositionFormat::Json).unwrap();

        assert_eq!(composition.name, "r1");
        assert_eq!(composition.layers.len(), 3);
        assert_eq!(composition.layers[0].transform, TransformSpec::Passthrough);
        assert_eq!(
            composition.layer("l2").map(|l| &l.transform),
            Some(&TransformSpec::Scale { factor: 2.5 })
        );
        assert_eq!(composition.sensor_layers().len(), 1);
        assert_eq!(
            composition.layers[0].sensor.as_ref().and_then(|s| s.interval_ms),
            Some(5)
        );
        assert_eq!(composition.relay.on_failure, RelayPolicy::Disconnect);
    }

    #[test]
    fn test_parse_yaml_composition() {
        let yaml = r#"
name: r1
layers:
  - name: l1
  - name: l2
    transform:
      type: offset
      amount: -1
connections:
  - to: l2
    from: l1
"#;
        let composition = RegionComposition::parse(yaml, CompositionFormat::Yaml).unwrap();

        assert_eq!(
            composition.layers[1].transform,
            TransformSpec::Offset { amount: -1.0 }
        );
        assert_eq!(composition.relay.on_failure, RelayPolicy::Continue);
    }

    #[test]
    fn test_parse_error_names_format() {
        let err = parse_composition("{not json", CompositionFormat::Json).unwrap_err();
        assert!(err.to_string().starts_with("JSON parse error"));
    }

    #[test]
    fn test_duplicate_layer_name() {
        let json = r#"{"name": "r1", "layers": [{"name": "l1"}, {"name": "l1"}]}"#;
        assert_eq!(
            RegionComposition::parse(json, CompositionFormat::Json),
            Err(CompositionError::DuplicateLayerName("l1".to_string()))
        );
    }

    #[test]
    fn test_undefined_layer_in_connection() {
        let json = r#"{
            "name": "r1",
            "layers": [{"name": "l1"}],
            "connections": [{"to": "lx", "from": "l1"}]
        }"#;
        assert_eq!(
            RegionComposition::parse(json, CompositionFormat::Json),
            Err(CompositionError::UndefinedLayer("lx".to_string()))
        );
    }

    #[test]
    fn test_self_connection() {
        let json = r#"{
            "name": "r1",
            "layers": [{"name": "l1"}],
            "connections": [{"to": "l1", "from": "l1"}]
        }"#;
        assert_eq!(
            RegionComposition::parse(json, CompositionFormat::Json),
            Err(CompositionError::SelfConnection("l1".to_string()))
        );
    }

    #[test]
    fn test_empty_region() {
        let json = r#"{"name": "r1", "layers": []}"#;
        assert_eq!(
            RegionComposition::parse(json, CompositionFormat::Json),
            Err(CompositionError::NoLayers("r1".to_string()))
        );

        let json = r#"{"name": " ", "layers": [{"name": "l1"}]}"#;
        assert_eq!(
            RegionComposition::parse(json, CompositionFormat::Json),
            Err(CompositionError::EmptyRegionName)
        );
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(
            CompositionFormat::from_path(Path::new("region.yaml")),
            CompositionFormat::Yaml
        );
        assert_eq!(
            CompositionFormat::from_path(Path::new("region.yml")),
            CompositionFormat::Yaml
        );
        assert_eq!(
            CompositionFormat::from_path(Path::new("region.json")),
            CompositionFormat::Json
        );
    }
}

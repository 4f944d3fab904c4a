use std::process;
use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use regionnet::cli::{format_dry_run, Args};
use regionnet::config::load_region;
use regionnet::registry::DeviceRegistry;
use serde_json::Value;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Load .env file if specified
    if let Some(ref env_file) = args.env_file {
        if let Err(e) = dotenvy::from_path(env_file) {
            error!("Failed to load env file {}: {}", env_file.display(), e);
            process::exit(1);
        }
    }

    let registry = Arc::new(DeviceRegistry::new());
    let (composition, region) = match load_region(&args.composition_file, registry) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!(
                "Failed to load region from {}: {}",
                args.composition_file.display(),
                e
            );
            process::exit(1);
        }
    };

    if args.dry_run {
        println!("{}", format_dry_run(&composition, &region, &args));
        return;
    }

    let Some(observable) = region.observe() else {
        error!("Region '{}' has no output stream", region.name());
        process::exit(1);
    };
    let mut outputs = observable.into_stream();
    let printer = tokio::spawn(async move {
        while let Some(inference) = outputs.next().await {
            match serde_json::to_string(&inference) {
                Ok(line) => println!("{}", line),
                Err(e) => warn!("Failed to serialize inference: {}", e),
            }
        }
    });

    if args.start {
        if let Err(e) = region.start() {
            error!("Failed to start region '{}': {}", region.name(), e);
            process::exit(1);
        }
        info!("Region '{}' running, press Ctrl-C to stop", region.name());
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
        }
    } else {
        info!("Reading JSON lines from stdin into region '{}'", region.name());
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    // Anything that is not JSON is fed as a string
                    let input = serde_json::from_str::<Value>(&line)
                        .unwrap_or_else(|_| Value::String(line.clone()));
                    if let Err(e) = region.compute(input) {
                        warn!("Input rejected: {}", e);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    }

    // Halting completes the head's stream, which ends the printer
    region.stop();
    if let Err(e) = printer.await {
        error!("Output task failed: {}", e);
    }
}

pub mod builder;
pub mod composition;

pub use builder::{build_layer, build_region};
pub use composition::{
    parse_composition, validate_composition, CompositionError, CompositionFormat,
    ConnectionSpec, LayerSpec, RegionComposition, RelaySettings, SensorSpec, TransformSpec,
};

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::region::{Region, RegionError};
use crate::registry::RegistrationPort;

/// Errors for file I/O and region assembly (separate from pure parsing errors)
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Composition error: {0}")]
    CompositionError(#[from] CompositionError),

    #[error("Region error: {0}")]
    RegionError(#[from] RegionError),
}

// ============================================================================
// I/O wrapper - thin layer over pure functions
// ============================================================================

/// Load and validate a composition file from disk. The format follows the
/// file extension.
pub fn load_composition_file(path: &Path) -> Result<RegionComposition, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let composition = RegionComposition::parse(&content, CompositionFormat::from_path(path))?;
    Ok(composition)
}

/// Load a composition file and assemble it into a closed region.
/// The composition is returned alongside for reporting.
pub fn load_region(
    path: &Path,
    registry: Arc<dyn RegistrationPort>,
) -> Result<(RegionComposition, Region), ConfigError> {
    let composition = load_composition_file(path)?;
    let mut region = build_region(&composition, registry)?;
    region.close()?;
    Ok((composition, region))
}

//! Spec-file loading.
//!
//! A container spec can be written as JSON and layered with CLI flags.

use std::path::Path;

use crate::error::ConfigError;
use crate::types::ContainerSpec;

/// Reads a [`ContainerSpec`] from a JSON file.
///
/// Missing fields take their defaults, so `{}` is the empty spec.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid spec.
pub fn load_container_spec(path: &Path) -> Result<ContainerSpec, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

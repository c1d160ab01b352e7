//! Configuration file loading.

use core::fmt::Write;
use std::fs;
use std::path::Path;

use crate::error::{ConfigError, Result};

use super::{validate_config, MachineConfig};

/// Load and validate a machine configuration from a TOML file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<MachineConfig> {
    let text = fs::read_to_string(path.as_ref()).map_err(|e| {
        let mut msg = heapless::String::<128>::new();
        let _ = write!(msg, "{}", e);
        ConfigError::IoError(msg)
    })?;
    let config: MachineConfig = toml::from_str(&text).map_err(|e| {
        let mut msg = heapless::String::<128>::new();
        let _ = write!(msg, "{}", e);
        ConfigError::ParseError(msg)
    })?;
    validate_config(&config)?;
    Ok(config)
}

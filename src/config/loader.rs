//! Configuration file loading.
//!
//! ## Responsibility
//! Read a TOML file from disk, parse it into an [`AdmissionConfig`], and run
//! validation before returning.
//!
//! ## Guarantees
//! - A successfully loaded config is always validated
//! - I/O errors and parse errors are distinguished in the error type
//! - File path is included in every error message
//!
//! ## NOT Responsible For
//! - Defining the config schema (that belongs to `mod.rs`)

use std::path::Path;

use super::validation::ConfigError;
use super::AdmissionConfig;

/// Load an [`AdmissionConfig`] from a TOML file.
///
/// # Errors
///
/// - [`ConfigError::Io`] if the file cannot be read.
/// - [`ConfigError::Parse`] if the TOML is malformed.
/// - [`ConfigError::Validation`] if semantic constraints are violated.
///
/// # Panics
///
/// This function never panics.
///
/// # Example
///
/// ```rust,ignore
/// use adaptive_admission::config::loader::load_from_file;
/// use std::path::Path;
///
/// let config = load_from_file(Path::new("admission.toml"))?;
/// println!("ceiling starts at {}", config.base_concurrent_limit);
/// ```
pub fn load_from_file(path: &Path) -> Result<AdmissionConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        file: path.display().to_string(),
        source: e,
    })?;

    load_from_str(&content, &path.display().to_string())
}

/// Load an [`AdmissionConfig`] from a TOML string.
///
/// `source_name` identifies the source in error messages.
///
/// # Errors
///
/// - [`ConfigError::Parse`] if the TOML is malformed.
/// - [`ConfigError::Validation`] if semantic constraints are violated.
///
/// # Panics
///
/// This function never panics.
pub fn load_from_str(content: &str, source_name: &str) -> Result<AdmissionConfig, ConfigError> {
    let config: AdmissionConfig = toml::from_str(content).map_err(|e| ConfigError::Parse {
        file: source_name.to_string(),
        source: e,
    })?;

    config.validate()?;
    Ok(config)
}

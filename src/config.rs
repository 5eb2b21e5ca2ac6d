//! Runtime configuration.
//!
//! Configuration is read from TOML:
//!
//! ```toml
//! [compartment]
//! max_contexts = 1024
//!
//! [jit]
//! opt_level = "speed"       # "none" | "speed" | "speed_and_size"
//! enable_verifier = false
//! ```
//!
//! Every field is optional and falls back to [`Default`].

use std::fmt;
use std::path::Path;

use serde::Deserialize;

/// Default number of contexts a compartment reserves address space for
pub const DEFAULT_MAX_CONTEXTS: usize = 1024;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    pub compartment: CompartmentConfig,
    pub jit: JitConfig,
}

/// Compartment sizing (the `[compartment]` section)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompartmentConfig {
    /// Upper bound on contexts ever created in one compartment
    pub max_contexts: usize,
}

impl Default for CompartmentConfig {
    fn default() -> Self {
        CompartmentConfig {
            max_contexts: DEFAULT_MAX_CONTEXTS,
        }
    }
}

/// Code generation settings (the `[jit]` section)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct JitConfig {
    pub opt_level: OptLevel,

    /// Run the Cranelift IR verifier on every function
    pub enable_verifier: bool,
}

impl Default for JitConfig {
    fn default() -> Self {
        JitConfig {
            opt_level: OptLevel::Speed,
            enable_verifier: false,
        }
    }
}

/// Cranelift `opt_level` setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptLevel {
    None,
    #[default]
    Speed,
    SpeedAndSize,
}

impl OptLevel {
    /// Value understood by Cranelift's `opt_level` flag.
    pub fn as_flag(self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        }
    }
}

/// Errors raised while loading configuration
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
        }
    }
}

impl RuntimeConfig {
    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = RuntimeConfig::from_toml_str("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.compartment.max_contexts, DEFAULT_MAX_CONTEXTS);
        assert_eq!(config.jit.opt_level, OptLevel::Speed);
    }

    #[test]
    fn test_overrides() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            [compartment]
            max_contexts = 16

            [jit]
            opt_level = "speed_and_size"
            enable_verifier = true
            "#,
        )
        .unwrap();
        assert_eq!(config.compartment.max_contexts, 16);
        assert_eq!(config.jit.opt_level, OptLevel::SpeedAndSize);
        assert!(config.jit.enable_verifier);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = RuntimeConfig::from_toml_str("[compartment]\nmax_context = 3\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_opt_level_flags() {
        assert_eq!(OptLevel::None.as_flag(), "none");
        assert_eq!(OptLevel::Speed.as_flag(), "speed");
        assert_eq!(OptLevel::SpeedAndSize.as_flag(), "speed_and_size");
    }

    #[test]
    fn test_missing_file() {
        let err = RuntimeConfig::load(Path::new("/nonexistent/isojit.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}

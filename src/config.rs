//! Kernel configuration.
//!
//! # Configuration Precedence
//!
//! 1. **Programmatic**: values set with the `with_*` builders
//! 2. **Environment variables**: `STRANDKIT_*`
//! 3. **Config file**: TOML (requires the `config-file` feature)
//! 4. **Defaults**: [`KernelConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `STRANDKIT_SEGMENT_SIZE` | `u32` | `segment_size` |
//! | `STRANDKIT_JOIN_SPIN_LIMIT` | `u32` | `join_spin_limit` |

use crate::tracing_compat::warn;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Slots per segment unless configured otherwise.
pub const DEFAULT_SEGMENT_SIZE: u32 = 16;
/// Largest accepted segment size. The cleaned-slot counter shares a word with
/// the pointer counter and must stay below 2^16.
pub const MAX_SEGMENT_SIZE: u32 = 4096;
/// Completion checks `join` performs before parking the thread.
pub const DEFAULT_JOIN_SPIN_LIMIT: u32 = 64;

/// Environment variable name for the segment size.
pub const ENV_SEGMENT_SIZE: &str = "STRANDKIT_SEGMENT_SIZE";
/// Environment variable name for the join spin budget.
pub const ENV_JOIN_SPIN_LIMIT: &str = "STRANDKIT_JOIN_SPIN_LIMIT";

/// Errors produced while loading or validating a [`KernelConfig`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held a value that does not parse.
    #[error("invalid value for {var}: {value:?} (expected {expected})")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Raw value found.
        value: String,
        /// What was expected.
        expected: &'static str,
    },
    /// A setting is outside its accepted range.
    #[error("{field} = {value} is out of range {min}..={max}")]
    OutOfRange {
        /// Setting name.
        field: &'static str,
        /// Offending value.
        value: u32,
        /// Smallest accepted value.
        min: u32,
        /// Largest accepted value.
        max: u32,
    },
    /// A config file did not parse.
    #[error("failed to parse config file: {0}")]
    Parse(String),
    /// A config file could not be read.
    #[error("failed to read config file {path}: {message}")]
    Io {
        /// File path.
        path: String,
        /// OS error text.
        message: String,
    },
}

/// Tunables of the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Slots per segment of [`WaiterSegment`](crate::segment::WaiterSegment).
    pub segment_size: u32,
    /// Completion checks performed by [`Job::join`](crate::job::Job::join)
    /// before the calling thread parks.
    pub join_spin_limit: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
            join_spin_limit: DEFAULT_JOIN_SPIN_LIMIT,
        }
    }
}

impl KernelConfig {
    /// Overrides the segment size.
    #[must_use]
    pub const fn with_segment_size(mut self, size: u32) -> Self {
        self.segment_size = size;
        self
    }

    /// Overrides the join spin budget.
    #[must_use]
    pub const fn with_join_spin_limit(mut self, limit: u32) -> Self {
        self.join_spin_limit = limit;
        self
    }

    /// Defaults with `STRANDKIT_*` environment overrides applied and validated.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(read_env)?;
        config.validate()?;
        Ok(config)
    }

    /// Applies overrides using `lookup` to resolve variable names.
    ///
    /// Only variables that are present are applied.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup(ENV_SEGMENT_SIZE) {
            self.segment_size = parse_u32(ENV_SEGMENT_SIZE, &val)?;
        }
        if let Some(val) = lookup(ENV_JOIN_SPIN_LIMIT) {
            self.join_spin_limit = parse_u32(ENV_JOIN_SPIN_LIMIT, &val)?;
        }
        Ok(())
    }

    /// Rejects out-of-range settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_SEGMENT_SIZE).contains(&self.segment_size) {
            return Err(ConfigError::OutOfRange {
                field: "segment_size",
                value: self.segment_size,
                min: 1,
                max: MAX_SEGMENT_SIZE,
            });
        }
        Ok(())
    }

    /// The process-wide configuration, resolved from the environment once.
    ///
    /// Invalid environment values are reported and replaced by defaults.
    pub fn global() -> &'static Self {
        static GLOBAL: OnceLock<KernelConfig> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            Self::from_env().unwrap_or_else(|err| {
                warn!(error = %err, "ignoring invalid kernel configuration from environment");
                Self::default()
            })
        })
    }

    /// Parses a TOML document. Missing keys keep their defaults.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&source)
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_u32(var: &'static str, val: &str) -> Result<u32, ConfigError> {
    val.trim().parse::<u32>().map_err(|_| ConfigError::InvalidValue {
        var,
        value: val.to_string(),
        expected: "unsigned 32-bit integer",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = KernelConfig::default();
        assert_eq!(config.segment_size, 16);
        assert_eq!(config.join_spin_limit, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_u32_valid() {
        assert_eq!(parse_u32(ENV_SEGMENT_SIZE, " 32 ").ok(), Some(32));
    }

    #[test]
    fn parse_u32_invalid() {
        let err = parse_u32(ENV_SEGMENT_SIZE, "lots");
        assert!(matches!(
            err,
            Err(ConfigError::InvalidValue {
                var: ENV_SEGMENT_SIZE,
                ..
            })
        ));
    }

    #[test]
    fn overrides_apply_only_present_vars() {
        let mut config = KernelConfig::default();
        config
            .apply_overrides(lookup_from(&[(ENV_JOIN_SPIN_LIMIT, "0")]))
            .expect("valid override");
        assert_eq!(config.join_spin_limit, 0);
        assert_eq!(config.segment_size, DEFAULT_SEGMENT_SIZE);
    }

    #[test]
    fn overrides_multiple() {
        let mut config = KernelConfig::default();
        config
            .apply_overrides(lookup_from(&[
                (ENV_SEGMENT_SIZE, "64"),
                (ENV_JOIN_SPIN_LIMIT, "8"),
            ]))
            .expect("valid overrides");
        assert_eq!(config, KernelConfig::default().with_segment_size(64).with_join_spin_limit(8));
    }

    #[test]
    fn invalid_override_is_an_error() {
        let mut config = KernelConfig::default();
        let err = config.apply_overrides(lookup_from(&[(ENV_SEGMENT_SIZE, "-1")]));
        assert!(err.is_err());
        assert_eq!(config.segment_size, DEFAULT_SEGMENT_SIZE);
    }

    #[test]
    fn validate_rejects_out_of_range_segment_size() {
        let zero = KernelConfig::default().with_segment_size(0);
        assert!(matches!(
            zero.validate(),
            Err(ConfigError::OutOfRange {
                field: "segment_size",
                ..
            })
        ));
        let huge = KernelConfig::default().with_segment_size(MAX_SEGMENT_SIZE + 1);
        assert!(huge.validate().is_err());
        let max = KernelConfig::default().with_segment_size(MAX_SEGMENT_SIZE);
        assert!(max.validate().is_ok());
    }

    #[test]
    fn serde_defaults_fill_missing_keys() {
        let config: KernelConfig = toml::from_str("segment_size = 8").expect("valid toml");
        assert_eq!(config.segment_size, 8);
        assert_eq!(config.join_spin_limit, DEFAULT_JOIN_SPIN_LIMIT);
    }

    #[cfg(feature = "config-file")]
    #[test]
    fn from_toml_str_validates() {
        assert!(KernelConfig::from_toml_str("segment_size = 0").is_err());
        let config = KernelConfig::from_toml_str("join_spin_limit = 3").expect("valid toml");
        assert_eq!(config.join_spin_limit, 3);
    }
}

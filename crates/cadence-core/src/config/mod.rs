//! Engine configuration.
//!
//! Loaded from TOML (file or string) with defaults for every field, then
//! validated. All durations are in milliseconds.

mod validation;

pub use validation::{ConfigValidator, ValidationError, ValidationResult};

use crate::errors::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Runtime configuration of an action engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a speculative action stays protected without a consumer.
    pub protection_timeout_ms: u64,
    /// Emit and record diagnostics (double registration, protocol misuse).
    pub diagnostics: bool,
    /// Number of diagnostics retained in memory.
    pub diagnostic_capacity: usize,
    /// Registry insertions between sweeps of dead weak entries.
    pub sweep_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            protection_timeout_ms: 30_000,
            diagnostics: cfg!(debug_assertions),
            diagnostic_capacity: 256,
            sweep_threshold: 64,
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::internal(format!(
                "Failed to read config file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_toml_str(&content)
    }

    /// Validate field ranges.
    pub fn validate(&self) -> Result<()> {
        let mut validator = ConfigValidator::new();
        validator
            .custom(
                "protection_timeout_ms",
                &self.protection_timeout_ms,
                |ms| *ms > 0,
                "must be greater than zero",
            )
            .custom(
                "sweep_threshold",
                &self.sweep_threshold,
                |n| *n > 0,
                "must be greater than zero",
            )
            .range(
                "diagnostic_capacity",
                u32::try_from(self.diagnostic_capacity).unwrap_or(u32::MAX),
                Some(1),
                Some(65_536),
            );
        validator.result().map_err(CoreError::from)
    }

    pub fn protection_timeout(&self) -> Duration {
        Duration::from_millis(self.protection_timeout_ms)
    }

    /// Builder-style override of the protection timeout.
    pub fn with_protection_timeout(mut self, timeout: Duration) -> Self {
        self.protection_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Builder-style override of the diagnostics switch.
    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }
}

#![forbid(unsafe_code)]

//! Tuning for the whole coordination stack as data.
//!
//! [`CoordinationConfig`] groups every threshold the engine uses (debounce
//! windows, the operation linger, the commit flush timeout, bounce detection
//! and gesture grace/commit timing) so a host can tune them without touching
//! code.
//!
//! # Loading
//!
//! ```toml
//! # gridsync.toml
//! [change]
//! debounce_ms = 150
//!
//! [interaction]
//! grace_period_ms = 250
//!
//! [bounce]
//! threshold_ms = 400
//! ```
//!
//! ```rust,ignore
//! let config = CoordinationConfig::from_toml_file("gridsync.toml")?;
//! let config = CoordinationConfig::from_json_str(json)?;
//! ```
//!
//! # Defaults
//!
//! Every field defaults to the constant exported next to the component it
//! tunes, so `CoordinationConfig::default()` is the stock behavior.

#[cfg(feature = "policy-config")]
use std::path::Path;

use gridsync_layout::BounceConfig;
use serde::{Deserialize, Serialize};

use crate::change_manager::ChangeManagerConfig;
use crate::commit_tracker::CommitTrackerConfig;
use crate::interaction::InteractionConfig;

// ---------------------------------------------------------------------------
// CoordinationConfig
// ---------------------------------------------------------------------------

/// Complete engine configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub change: ChangeManagerConfig,
    pub commit: CommitTrackerConfig,
    pub bounce: BounceConfig,
    pub interaction: InteractionConfig,
}

impl CoordinationConfig {
    /// Load from a TOML string.
    #[cfg(feature = "policy-config")]
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::Toml)
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "policy-config")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    #[cfg(feature = "policy-config")]
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(ConfigError::Json)
    }

    /// Load from a JSON file on disk.
    #[cfg(feature = "policy-config")]
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_json_str(&content)
    }

    /// Check every parameter is within a usable range.
    ///
    /// Returns the list of problems; empty means valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.bounce.history_len < 2 {
            errors.push(format!(
                "bounce.history_len must be >= 2, got {}",
                self.bounce.history_len
            ));
        }
        if self.commit.history_limit == 0 {
            errors.push("commit.history_limit must be > 0".into());
        }
        if self.commit.flush_timeout_ms == 0 {
            errors.push("commit.flush_timeout_ms must be > 0".into());
        }

        let interaction = &self.interaction;
        if let Some(delay) = interaction.commit_delay_ms
            && delay > interaction.grace_period_ms
        {
            errors.push(format!(
                "interaction.commit_delay_ms ({delay}) must not exceed grace_period_ms ({})",
                interaction.grace_period_ms
            ));
        }
        if interaction.safety_timeout_ms() == 0 {
            errors.push("interaction safety timeout must be > 0".into());
        }

        if self.change.user_debounce_ms > self.change.debounce_ms {
            errors.push(format!(
                "change.user_debounce_ms ({}) must not exceed debounce_ms ({})",
                self.change.user_debounce_ms, self.change.debounce_ms
            ));
        }

        errors
    }

    /// Like [`validate`](Self::validate), folded into a `Result`.
    pub fn validated(self) -> Result<Self, ConfigError> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(self)
        } else {
            Err(ConfigError::Validation(errors))
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur when loading a configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// I/O error reading a file.
    Io(std::io::Error),
    /// TOML parse error.
    #[cfg(feature = "policy-config")]
    Toml(toml::de::Error),
    /// JSON parse error.
    #[cfg(feature = "policy-config")]
    Json(serde_json::Error),
    /// Out-of-range values.
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            #[cfg(feature = "policy-config")]
            Self::Toml(e) => write!(f, "TOML parse error: {e}"),
            #[cfg(feature = "policy-config")]
            Self::Json(e) => write!(f, "JSON parse error: {e}"),
            Self::Validation(errors) => write!(f, "validation errors: {}", errors.join("; ")),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            #[cfg(feature = "policy-config")]
            Self::Toml(e) => Some(e),
            #[cfg(feature = "policy-config")]
            Self::Json(e) => Some(e),
            Self::Validation(_) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Engine Configuration
//!
//! Loaded from JSON; every field has a default so partial files are fine.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{EngineError, EngineResult};
use crate::position::PositionPolicy;

/// Tunables for the synchronization engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Gap left between appended entries
    pub position_step: i64,
    /// Widest offset tried when a midpoint collides
    pub max_probe_offset: i64,
    /// Appended to the name of a duplicated shot
    pub copy_suffix: String,
    /// Entry cap used by `list_shots` when the caller passes none
    pub default_entry_cap: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            position_step: 60,
            max_probe_offset: 1000,
            copy_suffix: " (copy)".to_string(),
            default_entry_cap: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        let config: EngineConfig = serde_json::from_str(json)
            .map_err(|e| EngineError::InvalidInput(format!("config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::InvalidInput(format!("config {}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.position_step < 2 {
            return Err(EngineError::InvalidInput(format!(
                "position_step must be at least 2, got {}",
                self.position_step
            )));
        }
        if self.max_probe_offset < 1 {
            return Err(EngineError::InvalidInput(format!(
                "max_probe_offset must be positive, got {}",
                self.max_probe_offset
            )));
        }
        Ok(())
    }

    pub fn position_policy(&self) -> PositionPolicy {
        PositionPolicy {
            step: self.position_step,
            max_probe_offset: self.max_probe_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.position_step, 60);
        assert_eq!(config.max_probe_offset, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(r#"{"default_entry_cap": 5}"#).unwrap();
        assert_eq!(config.default_entry_cap, Some(5));
        assert_eq!(config.position_step, 60);
        assert_eq!(config.copy_suffix, " (copy)");
    }

    #[test]
    fn test_rejects_tiny_step() {
        let err = EngineConfig::from_json_str(r#"{"position_step": 1}"#).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }
}

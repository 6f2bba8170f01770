use crate::core::{DbError, Result};
use serde::{Deserialize, Serialize};

/// Engine-wide tuning knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum keys per grouped lookup issued by a strategy
    pub batch_size: usize,

    /// Maximum strategy re-entry depth
    pub max_depth: usize,

    /// Always load the root before a delete-by-key
    pub load_before_delete: bool,
}

impl EngineConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self {
            batch_size: 500,
            max_depth: 64,
            load_before_delete: false,
        }
    }

    /// Set the lookup batch size
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the maximum cascade depth
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Load roots before delete-by-key even when nothing else requires it
    pub fn load_before_delete(mut self, load: bool) -> Self {
        self.load_before_delete = load;
        self
    }

    /// Parse and validate a JSON document; missing fields keep their defaults.
    ///
    /// ```
    /// use memocascade::EngineConfig;
    ///
    /// let config = EngineConfig::from_json(r#"{"batch_size": 50}"#).unwrap();
    /// assert_eq!(config.batch_size, 50);
    /// assert_eq!(config.max_depth, 64);
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(DbError::InvalidConfiguration("batch_size must be > 0".to_string()));
        }

        if self.max_depth == 0 {
            return Err(DbError::InvalidConfiguration("max_depth must be > 0".to_string()));
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

// 8.0.1 engine/config.rs: runtime options that are not exchange rules.
// the audit log is in-memory, so it keeps only the newest max_events entries.

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Oldest events are dropped once the log grows past this.
    pub max_events: usize,
}

impl EngineConfig {
    pub fn with_max_events(max_events: usize) -> Self {
        Self { max_events }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_events == 0 {
            return Err(ConfigError::InvalidEventLog);
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::with_max_events(100_000)
    }
}

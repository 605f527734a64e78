//! Executor configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ExecutorError, Result};

/// Configuration for a sequential executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Name used in tracing spans
    pub name: String,
    /// Largest gap between a group's member operations that still joins
    /// them into one batch. Zero makes every member its own batch.
    pub batch_window: Duration,
    /// Queue capacity. `None` means unbounded.
    pub capacity: Option<usize>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: "seqflow".to_string(),
            batch_window: Duration::ZERO,
            capacity: None,
        }
    }
}

impl ExecutorConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the batch window used by groups created from this executor.
    pub fn with_batch_window(mut self, window: Duration) -> Self {
        self.batch_window = window;
        self
    }

    /// Bound the queue to `capacity` items.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn unbounded(mut self) -> Self {
        self.capacity = None;
        self
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ExecutorError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == Some(0) {
            return Err(ExecutorError::InvalidConfig(
                "capacity must be greater than zero".to_string(),
            ));
        }
        if self.name.trim().is_empty() {
            return Err(ExecutorError::InvalidConfig(
                "name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

//! Driver tuning configuration, loadable from TOML

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Dialect, PolysqlError, Result};

/// Knobs shared by every driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Maximum open connections in a grip's pool.
    pub conn_max_open: usize,
    /// Seconds to wait for a pooled connection.
    pub conn_acquire_timeout_secs: u64,
    /// Intake queue capacity of a batch insert, as a multiple of its batch size.
    pub batch_queue_factor: usize,
    /// Number of records sampled when detecting column kinds.
    pub ingest_sample_size: usize,
    /// Overrides the dialect's maximum values per batch when set.
    pub max_batch_values: Option<usize>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            conn_max_open: 10,
            conn_acquire_timeout_secs: 30,
            batch_queue_factor: 8,
            ingest_sample_size: 256,
            max_batch_values: None,
        }
    }
}

impl DriverConfig {
    pub fn from_toml_str(toml_str: &str) -> Result<Self> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| PolysqlError::Config(format!("invalid driver config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.conn_max_open == 0 {
            return Err(PolysqlError::Config(
                "conn_max_open must be at least 1".to_string(),
            ));
        }
        if self.batch_queue_factor == 0 {
            return Err(PolysqlError::Config(
                "batch_queue_factor must be at least 1".to_string(),
            ));
        }
        if self.max_batch_values == Some(0) {
            return Err(PolysqlError::Config(
                "max_batch_values must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.conn_acquire_timeout_secs)
    }

    /// Rows per batch for `num_cols` destination columns.
    pub fn batch_rows(&self, dialect: &Dialect, num_cols: usize) -> usize {
        let max_values = self.max_batch_values.unwrap_or(dialect.max_batch_values);
        (max_values / num_cols.max(1)).max(1)
    }

    /// Capacity of the intake queue for a batch of `batch_rows` rows.
    pub fn queue_capacity(&self, batch_rows: usize) -> usize {
        batch_rows.saturating_mul(self.batch_queue_factor).max(1)
    }
}

//! Archive configuration.
//!
//! Every field is required: there is no `Default`. Configs are usually loaded
//! from a TOML file:
//!
//! ```toml
//! retention_days = 30
//! inline_body_limit = 4000
//! chunk_size = 4000
//! max_partitions = 31
//! ```

use crate::error::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Sizing and retention settings for an archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ArchiveConfig {
    /// Days a partition is kept before the retention sweep evicts it.
    pub retention_days: u32,
    /// Bytes of a message body stored inline in the message row.
    pub inline_body_limit: usize,
    /// Maximum bytes per overflow chunk.
    pub chunk_size: usize,
    /// Maximum number of simultaneously bound day partitions.
    pub max_partitions: usize,
}

impl ArchiveConfig {
    /// Creates a configuration with every setting given explicitly.
    pub fn new(
        retention_days: u32,
        inline_body_limit: usize,
        chunk_size: usize,
        max_partitions: usize,
    ) -> Self {
        Self {
            retention_days,
            inline_body_limit,
            chunk_size,
            max_partitions,
        }
    }

    /// Sets the retention window in days.
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    /// Sets the inline body limit.
    pub fn with_inline_body_limit(mut self, limit: usize) -> Self {
        self.inline_body_limit = limit;
        self
    }

    /// Sets the chunk size.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Sets the maximum number of bound partitions.
    pub fn with_max_partitions(mut self, max: usize) -> Self {
        self.max_partitions = max;
        self
    }

    /// Checks that all settings are usable.
    pub fn validate(&self) -> Result<()> {
        if self.retention_days == 0 {
            return Err(ArchiveError::InvalidConfig(
                "retention_days must be at least 1".to_string(),
            ));
        }
        if self.inline_body_limit == 0 {
            return Err(ArchiveError::InvalidConfig(
                "inline_body_limit must be at least 1".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(ArchiveError::InvalidConfig(
                "chunk_size must be at least 1".to_string(),
            ));
        }
        if self.max_partitions == 0 {
            return Err(ArchiveError::InvalidConfig(
                "max_partitions must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Parses and validates a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{FragError, FragResult};

/// Largest routing prefix: shards are selected from the first 24 hash bits.
pub const MAX_SHARD_BITS: u32 = 24;

/// Top-level configuration (loaded from frag.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FragConfig {
    pub chunker: ChunkerConfig,
    pub index: IndexConfig,
    pub runtime: RuntimeConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Checksum window in bytes (default: 64)
    pub window: usize,
    /// A window whose checksum is <= threshold starts a new fragment.
    /// Mean fragment size is about 2^32 / threshold (default: 0x1000, ~1 MiB)
    pub threshold: u32,
    /// Bytes claimed per ring turn (default: 16 MiB)
    pub block_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// log2 of the shard count (default: 16, max: 24)
    pub shard_bits: u32,
    /// Page size used for the page-rounded totals (default: 4096)
    pub page_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Ring size (0 = workers_per_cpu × available parallelism)
    pub workers: usize,
    /// Workers per CPU when `workers` is 0 (default: 4)
    pub workers_per_cpu: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: warn)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            window: 64,
            threshold: 0x0000_1000,
            block_size: 16 * 1024 * 1024,
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            shard_bits: 16,
            page_size: 4096,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            workers_per_cpu: 4,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".into(),
            format: "text".into(),
        }
    }
}

impl RuntimeConfig {
    /// Resolved ring size, never zero.
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (cpus * self.workers_per_cpu).max(1)
    }
}

impl FragConfig {
    /// Load `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> FragResult<Self> {
        if !path.exists() {
            tracing::debug!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: FragConfig = toml::from_str(&content)
            .map_err(|e| FragError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> FragResult<()> {
        let c = &self.chunker;
        if c.window == 0 {
            return Err(FragError::Config("chunker.window must be at least 1".into()));
        }
        if c.block_size < c.window {
            return Err(FragError::Config(format!(
                "chunker.block_size ({}) must not be smaller than chunker.window ({})",
                c.block_size, c.window
            )));
        }
        if self.index.shard_bits > MAX_SHARD_BITS {
            return Err(FragError::Config(format!(
                "index.shard_bits ({}) exceeds the {MAX_SHARD_BITS}-bit routing prefix",
                self.index.shard_bits
            )));
        }
        if !self.index.page_size.is_power_of_two() {
            return Err(FragError::Config(format!(
                "index.page_size ({}) must be a power of two",
                self.index.page_size
            )));
        }
        if self.runtime.workers == 0 && self.runtime.workers_per_cpu == 0 {
            return Err(FragError::Config("runtime.workers_per_cpu must be at least 1".into()));
        }
        Ok(())
    }
}

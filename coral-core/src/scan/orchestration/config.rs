use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bulk::BulkInsertOptions;

/// Every tunable of the scan pipeline.
///
/// All sections carry defaults so a partial file (or none at all) still
/// yields a working configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Filesystem watch debounce and restart behaviour.
    pub watch: WatchConfig,
    /// Batch sizes for the bulk writer.
    pub bulk: BulkConfig,
    /// Embedding pool sizing.
    pub embedding: EmbeddingConfig,
    /// Tag decoding retry policy.
    pub indexer: IndexerConfig,
    /// Scan queue sizing.
    pub queue: QueueConfig,
    /// Startup and periodic scans.
    pub schedule: ScheduleConfig,
}

/// Tuning controls for filesystem watch coalescing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Quiet period a directory must observe before its scan job is emitted.
    pub debounce_secs: u64,
    /// Delay before a failed watcher is rebuilt, in milliseconds.
    pub restart_delay_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_secs: 5,
            restart_delay_ms: 1_000,
        }
    }
}

impl WatchConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    pub entity_batch_size: usize,
    pub relationship_batch_size: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        let options = BulkInsertOptions::default();
        Self {
            entity_batch_size: options.entity_batch_size,
            relationship_batch_size: options.relationship_batch_size,
        }
    }
}

impl From<BulkConfig> for BulkInsertOptions {
    fn from(config: BulkConfig) -> Self {
        Self {
            entity_batch_size: config.entity_batch_size,
            relationship_batch_size: config.relationship_batch_size,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embedding requests processed in parallel.
    pub max_concurrency: usize,
    /// Pending embedding jobs buffered before producers wait.
    pub queue_capacity: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            queue_capacity: 1_024,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Attempts per file before a transient decode failure skips the file.
    pub max_decode_attempts: u32,
    /// Base delay between decode attempts; attempt `n` waits `n * base`.
    pub decode_retry_base_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            max_decode_attempts: 10,
            decode_retry_base_ms: 100,
        }
    }
}

impl IndexerConfig {
    pub fn decode_retry_base(&self) -> Duration {
        Duration::from_millis(self.decode_retry_base_ms)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Scan jobs buffered before producers wait.
    pub scan_queue_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            scan_queue_capacity: 64,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Queue a scan of every library once the runtime starts.
    pub scan_on_startup: bool,
    /// Minutes between scheduled scans of every library. `0` disables them.
    pub interval_minutes: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            scan_on_startup: true,
            interval_minutes: 0,
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Option<Duration> {
        (self.interval_minutes > 0).then(|| Duration::from_secs(self.interval_minutes * 60))
    }
}

//! Scan job pipeline: queue, worker, progress reporting, embedding fan-out
//! and scheduling.

/// Tunables.
pub mod config;
pub mod embedding;
/// Scan job types.
pub mod job;
/// Scan job queue.
pub mod queue;
pub mod reporter;
/// Task lifecycle.
pub mod runtime;
/// Periodic scans.
pub mod scheduler;
/// Scan requests and progress queries.
pub mod service;
/// Scan job consumer.
pub mod worker;

pub use config::{
    BulkConfig, EmbeddingConfig, IndexerConfig, QueueConfig, ScanConfig, ScheduleConfig,
    WatchConfig,
};
pub use embedding::{
    EmbeddingBackend, EmbeddingJob, EmbeddingQueue, EmbeddingWorker, HttpEmbeddingBackend,
    NoopEmbeddingBackend,
};
pub use job::{FileRename, ScanJob, ScanKind, ScanTrigger};
pub use queue::{ScanQueue, ScanQueueReceiver};
pub use reporter::{InMemoryScanReporter, ScanProgress, ScanProgressEvent, ScanReporter, ScanStatus};
pub use runtime::ScanRuntime;
pub use scheduler::ScanScheduler;
pub use service::{ScanRequestInfo, ScanService};
pub use worker::ScanWorker;

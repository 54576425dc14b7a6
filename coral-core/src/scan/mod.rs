//! Scan domain modules.
//!
//! Directory discovery, tag decoding, entity resolution, the scan job
//! pipeline and the filesystem watchers that feed it.

pub mod fs_watch;
pub mod indexer;
pub mod orchestration;
pub mod scanner;
pub mod tags;

pub use fs_watch::{DirectoryEventTracker, FsWatchService, WatchEvent};
pub use indexer::{
    FinalizeSummary, IndexEvent, IndexOperation, Indexer, IndexerDeps, IndexingSession,
};
pub use orchestration::{
    FileRename, InMemoryScanReporter, ScanConfig, ScanJob, ScanKind, ScanProgress, ScanQueue,
    ScanReporter, ScanRuntime, ScanService, ScanTrigger,
};
pub use scanner::{DirectoryGroup, DirectoryScanner, ScanRequest, ScannedFile};
pub use tags::{DecodedTrack, LoftyTagDecoder, TagDecoder, TagError};

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use coral_model::{LibraryID, MusicLibrary, RequestId};
use serde::Serialize;
use tracing::info;

use super::job::{ScanJob, ScanTrigger};
use super::queue::ScanQueue;
use super::reporter::{ScanProgress, ScanReporter};
use crate::database::LibraryRepository;
use crate::error::{CoralError, Result};

/// Correlation handle returned for every queued library scan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScanRequestInfo {
    pub library_id: LibraryID,
    pub library_name: String,
    pub request_id: RequestId,
}

/// Entry point for callers that want scans to happen: requests return as soon
/// as the job is queued.
#[derive(Clone)]
pub struct ScanService {
    queue: ScanQueue,
    reporter: Arc<dyn ScanReporter>,
    repository: Arc<dyn LibraryRepository>,
}

impl fmt::Debug for ScanService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanService")
            .field("queue", &self.queue)
            .finish_non_exhaustive()
    }
}

impl ScanService {
    pub fn new(
        queue: ScanQueue,
        reporter: Arc<dyn ScanReporter>,
        repository: Arc<dyn LibraryRepository>,
    ) -> Self {
        Self {
            queue,
            reporter,
            repository,
        }
    }

    pub fn queue(&self) -> &ScanQueue {
        &self.queue
    }

    /// Queue an incremental scan of every library.
    pub async fn request_scans(&self, trigger: ScanTrigger) -> Result<Vec<ScanRequestInfo>> {
        let libraries = self.repository.list_libraries().await?;
        let mut requests = Vec::with_capacity(libraries.len());
        for library in libraries {
            requests.push(self.enqueue(&library, trigger, true).await?);
        }
        info!(trigger = %trigger, libraries = requests.len(), "queued library scans");
        Ok(requests)
    }

    /// Queue a scan of one library. Fails if the library is unknown.
    pub async fn request_library_scan(
        &self,
        library_id: LibraryID,
        trigger: ScanTrigger,
        incremental: bool,
    ) -> Result<ScanRequestInfo> {
        let library = self
            .repository
            .get_library(library_id)
            .await?
            .ok_or_else(|| CoralError::NotFound(format!("library {library_id}")))?;
        self.enqueue(&library, trigger, incremental).await
    }

    /// Register `path` as a library unless one already points there, and
    /// queue its first scan when it is new.
    pub async fn add_library(&self, path: impl Into<PathBuf>) -> Result<MusicLibrary> {
        let path = path.into();
        let existing = self.repository.list_libraries().await?;
        if let Some(library) = existing.into_iter().find(|library| library.path == path) {
            return Ok(library);
        }

        let library = MusicLibrary::new(path);
        self.repository.create_library(&library).await?;
        info!(library = %library.id, path = %library.path.display(), "added library");
        self.enqueue(&library, ScanTrigger::LibraryAdded, false)
            .await?;
        Ok(library)
    }

    /// Progress of a queued or recent scan.
    pub async fn progress(&self, request_id: RequestId) -> Option<ScanProgress> {
        self.reporter.progress(request_id).await
    }

    /// Scans still indexing or waiting for embeddings.
    pub async fn active_scans(&self) -> Vec<ScanProgress> {
        self.reporter.active_scans().await
    }

    async fn enqueue(
        &self,
        library: &MusicLibrary,
        trigger: ScanTrigger,
        incremental: bool,
    ) -> Result<ScanRequestInfo> {
        let job = ScanJob::library_scan(library.id, trigger).with_incremental(incremental);
        let info = ScanRequestInfo {
            library_id: library.id,
            library_name: library.display_name(),
            request_id: job.request_id,
        };
        self.queue.enqueue(job).await?;
        Ok(info)
    }
}

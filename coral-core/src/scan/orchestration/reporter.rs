//! Scan progress tracking.
//!
//! A scan is registered when its job starts, counts every index event, and
//! completes either right after indexing (nothing to embed) or once the
//! embedding pool has reported every job it was handed for the scan.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coral_model::{LibraryID, MusicLibrary, RequestId};
use serde::Serialize;
use tokio::sync::{RwLock, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, info};

use crate::scan::indexer::{IndexEvent, IndexOperation};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ScanStatus {
    Indexing,
    WaitingForEmbeddings,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }
}

/// Snapshot of one scan.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ScanProgress {
    pub request_id: RequestId,
    pub library_id: LibraryID,
    pub library_name: String,
    pub expected_tracks: usize,
    pub tracks_created: usize,
    pub tracks_updated: usize,
    pub tracks_deleted: usize,
    pub embeddings_expected: usize,
    pub embeddings_completed: usize,
    pub status: ScanStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ScanProgress {
    fn new(request_id: RequestId, expected_tracks: usize, library: &MusicLibrary) -> Self {
        Self {
            request_id,
            library_id: library.id,
            library_name: library.display_name(),
            expected_tracks,
            tracks_created: 0,
            tracks_updated: 0,
            tracks_deleted: 0,
            embeddings_expected: 0,
            embeddings_completed: 0,
            status: ScanStatus::Indexing,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn tracks_indexed(&self) -> usize {
        self.tracks_created + self.tracks_updated
    }

    fn embeddings_done(&self) -> bool {
        self.embeddings_completed >= self.embeddings_expected
    }

    fn finish(&mut self, status: ScanStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}

/// Change notification published for every progress update.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanProgressEvent {
    Started {
        request_id: RequestId,
        library_id: LibraryID,
        expected_tracks: usize,
    },
    Progress {
        request_id: RequestId,
        tracks_indexed: usize,
        embeddings_completed: usize,
    },
    Completed {
        request_id: RequestId,
    },
    Failed {
        request_id: RequestId,
        message: String,
    },
}

/// Receives progress from the scan worker and the embedding pool.
///
/// Reports for an unknown request id are ignored.
#[async_trait]
pub trait ScanReporter: Send + Sync {
    async fn register_scan(
        &self,
        request_id: RequestId,
        expected_tracks: usize,
        library: &MusicLibrary,
    );

    async fn report_index_operation(&self, request_id: RequestId, event: &IndexEvent);

    /// Indexing is over and `count` embedding jobs were handed out. The scan
    /// completes as soon as that many have been reported done.
    async fn add_expected_embeddings(&self, request_id: RequestId, count: usize);

    async fn report_embedding_completed(&self, request_id: RequestId);

    async fn complete_scan(&self, request_id: RequestId);

    async fn fail_scan(&self, request_id: RequestId, message: String);

    async fn progress(&self, request_id: RequestId) -> Option<ScanProgress>;

    /// Scans that have not completed or failed yet.
    async fn active_scans(&self) -> Vec<ScanProgress>;
}

/// Finished scans kept for progress queries by default.
pub const DEFAULT_FINISHED_HISTORY: usize = 64;

#[derive(Debug, Default)]
struct ScanTable {
    scans: HashMap<RequestId, ScanProgress>,
    /// Completed or failed scans, oldest first.
    finished: VecDeque<RequestId>,
}

impl ScanTable {
    /// Remember that `request_id` finished and forget the oldest finished
    /// scans beyond `history`.
    fn retire(&mut self, request_id: RequestId, history: usize) {
        self.finished.push_back(request_id);
        while self.finished.len() > history {
            if let Some(oldest) = self.finished.pop_front() {
                self.scans.remove(&oldest);
            }
        }
    }
}

/// [`ScanReporter`] keeping progress in memory and broadcasting every change.
///
/// Only the most recent finished scans stay queryable, see
/// [`InMemoryScanReporter::with_history`].
#[derive(Clone)]
pub struct InMemoryScanReporter {
    table: Arc<RwLock<ScanTable>>,
    events: broadcast::Sender<ScanProgressEvent>,
    history: usize,
}

impl fmt::Debug for InMemoryScanReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tracked = self
            .table
            .try_read()
            .map(|table| table.scans.len())
            .unwrap_or_default();
        f.debug_struct("InMemoryScanReporter")
            .field("tracked", &tracked)
            .field("subscribers", &self.events.receiver_count())
            .finish()
    }
}

impl Default for InMemoryScanReporter {
    fn default() -> Self {
        Self::new(256)
    }
}

impl InMemoryScanReporter {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self {
            table: Arc::new(RwLock::new(ScanTable::default())),
            events,
            history: DEFAULT_FINISHED_HISTORY,
        }
    }

    /// Number of finished scans kept before the oldest are dropped.
    pub fn with_history(mut self, history: usize) -> Self {
        self.history = history;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanProgressEvent> {
        self.events.subscribe()
    }

    /// Events published from now on. A consumer that falls behind skips the
    /// events it missed.
    pub fn event_stream(&self) -> impl Stream<Item = ScanProgressEvent> + Send + 'static {
        BroadcastStream::new(self.events.subscribe()).filter_map(|event| event.ok())
    }

    fn publish(&self, event: ScanProgressEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn progress_event(progress: &ScanProgress) -> ScanProgressEvent {
        ScanProgressEvent::Progress {
            request_id: progress.request_id,
            tracks_indexed: progress.tracks_indexed(),
            embeddings_completed: progress.embeddings_completed,
        }
    }

    fn completed(progress: &mut ScanProgress) -> ScanProgressEvent {
        progress.finish(ScanStatus::Completed);
        info!(
            request_id = %progress.request_id,
            library = %progress.library_id,
            created = progress.tracks_created,
            updated = progress.tracks_updated,
            deleted = progress.tracks_deleted,
            embeddings = progress.embeddings_completed,
            "scan completed"
        );
        ScanProgressEvent::Completed {
            request_id: progress.request_id,
        }
    }
}

#[async_trait]
impl ScanReporter for InMemoryScanReporter {
    async fn register_scan(
        &self,
        request_id: RequestId,
        expected_tracks: usize,
        library: &MusicLibrary,
    ) {
        let progress = ScanProgress::new(request_id, expected_tracks, library);
        self.table.write().await.scans.insert(request_id, progress);
        self.publish(ScanProgressEvent::Started {
            request_id,
            library_id: library.id,
            expected_tracks,
        });
    }

    async fn report_index_operation(&self, request_id: RequestId, event: &IndexEvent) {
        let update = {
            let mut table = self.table.write().await;
            let Some(progress) = table.scans.get_mut(&request_id) else {
                return;
            };
            match event.operation {
                IndexOperation::Create => progress.tracks_created += 1,
                IndexOperation::Update => progress.tracks_updated += 1,
                IndexOperation::Delete => progress.tracks_deleted += 1,
            }
            Self::progress_event(progress)
        };
        self.publish(update);
    }

    async fn add_expected_embeddings(&self, request_id: RequestId, count: usize) {
        let mut events = Vec::new();
        {
            let mut table = self.table.write().await;
            let Some(progress) = table.scans.get_mut(&request_id) else {
                return;
            };
            if progress.status.is_terminal() {
                return;
            }
            progress.embeddings_expected += count;
            progress.status = ScanStatus::WaitingForEmbeddings;
            debug!(
                request_id = %request_id,
                expected = progress.embeddings_expected,
                completed = progress.embeddings_completed,
                "waiting for embeddings"
            );
            if progress.embeddings_done() {
                events.push(Self::completed(progress));
                table.retire(request_id, self.history);
            }
        }
        for event in events {
            self.publish(event);
        }
    }

    async fn report_embedding_completed(&self, request_id: RequestId) {
        let mut events = Vec::new();
        {
            let mut table = self.table.write().await;
            let Some(progress) = table.scans.get_mut(&request_id) else {
                return;
            };
            progress.embeddings_completed += 1;
            events.push(Self::progress_event(progress));
            if progress.status == ScanStatus::WaitingForEmbeddings && progress.embeddings_done() {
                events.push(Self::completed(progress));
                table.retire(request_id, self.history);
            }
        }
        for event in events {
            self.publish(event);
        }
    }

    async fn complete_scan(&self, request_id: RequestId) {
        let event = {
            let mut table = self.table.write().await;
            let Some(progress) = table.scans.get_mut(&request_id) else {
                return;
            };
            if progress.status.is_terminal() {
                return;
            }
            let event = Self::completed(progress);
            table.retire(request_id, self.history);
            event
        };
        self.publish(event);
    }

    async fn fail_scan(&self, request_id: RequestId, message: String) {
        {
            let mut table = self.table.write().await;
            let Some(progress) = table.scans.get_mut(&request_id) else {
                return;
            };
            if progress.status.is_terminal() {
                return;
            }
            progress.error = Some(message.clone());
            progress.finish(ScanStatus::Failed);
            error!(
                request_id = %request_id,
                library = %progress.library_id,
                error = %message,
                "scan failed"
            );
            table.retire(request_id, self.history);
        }
        self.publish(ScanProgressEvent::Failed {
            request_id,
            message,
        });
    }

    async fn progress(&self, request_id: RequestId) -> Option<ScanProgress> {
        self.table.read().await.scans.get(&request_id).cloned()
    }

    async fn active_scans(&self) -> Vec<ScanProgress> {
        let mut active: Vec<ScanProgress> = self
            .table
            .read()
            .await
            .scans
            .values()
            .filter(|progress| !progress.status.is_terminal())
            .cloned()
            .collect();
        active.sort_by_key(|progress| progress.started_at);
        active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> MusicLibrary {
        MusicLibrary::new("/music")
    }

    #[tokio::test]
    async fn completes_once_every_embedding_reported() {
        let reporter = InMemoryScanReporter::default();
        let request = RequestId::new();
        reporter.register_scan(request, 2, &library()).await;

        reporter.report_embedding_completed(request).await;
        reporter.add_expected_embeddings(request, 2).await;
        assert_eq!(
            reporter.progress(request).await.unwrap().status,
            ScanStatus::WaitingForEmbeddings
        );

        reporter.report_embedding_completed(request).await;
        let progress = reporter.progress(request).await.unwrap();
        assert_eq!(progress.status, ScanStatus::Completed);
        assert!(progress.finished_at.is_some());
        assert!(reporter.active_scans().await.is_empty());
    }

    #[tokio::test]
    async fn embeddings_finishing_early_complete_on_expectation() {
        let reporter = InMemoryScanReporter::default();
        let request = RequestId::new();
        reporter.register_scan(request, 1, &library()).await;

        reporter.report_embedding_completed(request).await;
        assert_eq!(
            reporter.progress(request).await.unwrap().status,
            ScanStatus::Indexing
        );

        reporter.add_expected_embeddings(request, 1).await;
        assert_eq!(
            reporter.progress(request).await.unwrap().status,
            ScanStatus::Completed
        );
    }

    #[tokio::test]
    async fn failure_is_recorded_and_broadcast() {
        let reporter = InMemoryScanReporter::default();
        let mut events = reporter.subscribe();
        let request = RequestId::new();
        reporter.register_scan(request, 0, &library()).await;
        reporter.fail_scan(request, "boom".into()).await;

        let progress = reporter.progress(request).await.unwrap();
        assert_eq!(progress.status, ScanStatus::Failed);
        assert_eq!(progress.error.as_deref(), Some("boom"));

        assert!(matches!(
            events.recv().await.unwrap(),
            ScanProgressEvent::Started { .. }
        ));
        assert_eq!(
            events.recv().await.unwrap(),
            ScanProgressEvent::Failed {
                request_id: request,
                message: "boom".into()
            }
        );
    }

    #[tokio::test]
    async fn counts_index_operations() {
        let reporter = InMemoryScanReporter::default();
        let request = RequestId::new();
        reporter.register_scan(request, 3, &library()).await;

        for operation in [
            IndexOperation::Create,
            IndexOperation::Create,
            IndexOperation::Update,
            IndexOperation::Delete,
        ] {
            let event = IndexEvent::new(operation, "/music/a.flac", None);
            reporter.report_index_operation(request, &event).await;
        }

        let progress = reporter.progress(request).await.unwrap();
        assert_eq!(progress.tracks_created, 2);
        assert_eq!(progress.tracks_updated, 1);
        assert_eq!(progress.tracks_deleted, 1);
        assert_eq!(progress.tracks_indexed(), 3);
        assert_eq!(reporter.active_scans().await.len(), 1);
    }

    #[tokio::test]
    async fn event_stream_follows_a_scan() {
        let reporter = InMemoryScanReporter::default();
        let events = reporter.event_stream();
        let request = RequestId::new();

        reporter.register_scan(request, 0, &library()).await;
        reporter.complete_scan(request).await;

        let events: Vec<ScanProgressEvent> = events.take(2).collect().await;
        assert!(matches!(events[0], ScanProgressEvent::Started { .. }));
        assert_eq!(
            events[1],
            ScanProgressEvent::Completed { request_id: request }
        );
    }

    #[tokio::test]
    async fn only_recent_finished_scans_are_kept() {
        let reporter = InMemoryScanReporter::default().with_history(2);
        let requests: Vec<RequestId> = (0..3).map(|_| RequestId::new()).collect();
        for request in &requests {
            reporter.register_scan(*request, 0, &library()).await;
        }
        let running = RequestId::new();
        reporter.register_scan(running, 0, &library()).await;

        reporter.complete_scan(requests[0]).await;
        reporter.fail_scan(requests[1], "boom".into()).await;
        reporter.complete_scan(requests[2]).await;

        assert!(reporter.progress(requests[0]).await.is_none());
        assert_eq!(
            reporter.progress(requests[1]).await.unwrap().status,
            ScanStatus::Failed
        );
        assert_eq!(
            reporter.progress(requests[2]).await.unwrap().status,
            ScanStatus::Completed
        );
        assert_eq!(reporter.active_scans().await.len(), 1);
        assert_eq!(reporter.table.read().await.scans.len(), 3);
    }

    #[tokio::test]
    async fn unknown_requests_are_ignored() {
        let reporter = InMemoryScanReporter::default();
        reporter.complete_scan(RequestId::new()).await;
        reporter.report_embedding_completed(RequestId::new()).await;
        assert!(reporter.active_scans().await.is_empty());
    }
}

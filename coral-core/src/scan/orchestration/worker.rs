use std::collections::HashSet;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use coral_model::{MusicLibrary, RequestId};
use futures::{FutureExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use super::embedding::{EmbeddingBackend, EmbeddingJob, EmbeddingQueue};
use super::job::{ScanJob, ScanKind};
use super::queue::ScanQueueReceiver;
use super::reporter::ScanReporter;
use crate::error::{CoralError, Result};
use crate::scan::indexer::{IndexOperation, Indexer};
use crate::scan::scanner::{DirectoryScanner, ScanRequest, path_key};

/// Single consumer of the scan queue.
///
/// Jobs run one after another. A job that errors (or panics) is reported as
/// failed and the loop moves on to the next one.
pub struct ScanWorker {
    receiver: ScanQueueReceiver,
    scanner: DirectoryScanner,
    indexer: Indexer,
    reporter: Arc<dyn ScanReporter>,
    embeddings: EmbeddingQueue,
    backend: Arc<dyn EmbeddingBackend>,
}

impl fmt::Debug for ScanWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanWorker")
            .field("indexer", &self.indexer)
            .finish_non_exhaustive()
    }
}

impl ScanWorker {
    pub fn new(
        receiver: ScanQueueReceiver,
        indexer: Indexer,
        reporter: Arc<dyn ScanReporter>,
        embeddings: EmbeddingQueue,
        backend: Arc<dyn EmbeddingBackend>,
    ) -> Self {
        Self {
            receiver,
            scanner: DirectoryScanner::new(Arc::clone(indexer.repository())),
            indexer,
            reporter,
            embeddings,
            backend,
        }
    }

    /// Process jobs one at a time until cancelled or the queue closes.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!("scan worker started");

        loop {
            let job = tokio::select! {
                _ = cancel.cancelled() => break,
                job = self.receiver.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let request_id = job.request_id;
            let span = info_span!(
                "scan_job",
                request_id = %request_id,
                library = %job.library_id,
                kind = %job.kind,
                trigger = %job.trigger
            );

            let outcome = AssertUnwindSafe(self.process(job, &cancel).instrument(span))
                .catch_unwind()
                .await;

            let message = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err.to_string(),
                Err(_) => "scan job panicked".to_string(),
            };
            error!(request_id = %request_id, error = %message, "scan job failed");
            self.reporter.fail_scan(request_id, message).await;
        }

        info!("scan worker stopped");
    }

    async fn process(&self, job: ScanJob, cancel: &CancellationToken) -> Result<()> {
        let library = self
            .indexer
            .repository()
            .get_library(job.library_id)
            .await?
            .ok_or_else(|| CoralError::NotFound(format!("library {}", job.library_id)))?;

        match job.kind {
            ScanKind::Rename => self.process_renames(&job, &library).await,
            ScanKind::Index => self.process_index(&job, library, cancel).await,
        }
    }

    async fn process_renames(&self, job: &ScanJob, library: &MusicLibrary) -> Result<()> {
        self.reporter
            .register_scan(job.request_id, job.renames.len(), library)
            .await;

        let events = self.indexer.handle_renames(library, &job.renames).await?;
        for event in &events {
            self.reporter
                .report_index_operation(job.request_id, event)
                .await;
        }

        self.reporter.complete_scan(job.request_id).await;
        Ok(())
    }

    async fn process_index(
        &self,
        job: &ScanJob,
        library: MusicLibrary,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let request_id = job.request_id;
        let request = ScanRequest {
            library: library.clone(),
            directory: job.directory.clone(),
            incremental: job.incremental,
        };

        let expected = self.scanner.count_files(&request).await?;
        info!(
            path = %request.root().display(),
            incremental = job.incremental,
            expected,
            "starting scan"
        );
        self.reporter
            .register_scan(request_id, expected, &library)
            .await;

        let groups = self.scanner.scan_library(&request).await?;
        let mut session = self.indexer.begin_session(library.clone());
        let mut created = Vec::new();

        {
            let mut events =
                session.index_directory_groups(groups, job.directory.clone(), cancel.clone());
            while let Some(event) = events.next().await {
                let event = event?;
                self.reporter
                    .report_index_operation(request_id, &event)
                    .await;

                if event.operation == IndexOperation::Create
                    && let Some(track) = event.track
                    && self.backend.accepts(&track)
                {
                    created.push(EmbeddingJob::new(track, path_key(&event.path), request_id));
                }
            }
        }

        session.finalize(cancel).await?;

        let queued = self.queue_embeddings(&library, created, request_id).await?;
        if queued == 0 {
            self.reporter.complete_scan(request_id).await;
        } else {
            self.reporter
                .add_expected_embeddings(request_id, queued)
                .await;
        }

        info!(path = %request.root().display(), embeddings = queued, "finished indexing");
        Ok(())
    }

    /// Queue embeddings for the tracks this job created plus any older track
    /// still missing one. Created tracks are queued only once they are
    /// persisted.
    async fn queue_embeddings(
        &self,
        library: &MusicLibrary,
        created: Vec<EmbeddingJob>,
        request_id: RequestId,
    ) -> Result<usize> {
        let mut seen: HashSet<_> = created.iter().map(|job| job.track.id).collect();
        let mut jobs = created;

        match self.backend.tracks_missing_embeddings(library.id).await {
            Ok(missing) => {
                for candidate in missing {
                    if seen.insert(candidate.track.id) {
                        jobs.push(EmbeddingJob::new(candidate.track, candidate.path, request_id));
                    }
                }
            }
            Err(err) => {
                warn!(library = %library.id, error = %err, "failed to list tracks missing embeddings")
            }
        }

        let total = jobs.len();
        for job in jobs {
            self.embeddings.enqueue(job).await?;
        }
        Ok(total)
    }
}

//! Embedding fan-out.
//!
//! Index jobs hand each freshly created track to the [`EmbeddingQueue`]. The
//! [`EmbeddingWorker`] computes them in parallel, bounded by a semaphore, and
//! reports every finished job (successful or not) back to the scan reporter so
//! the owning scan can complete.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use coral_model::{LibraryID, RequestId, Track};
use serde::{Deserialize, Serialize};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::EmbeddingConfig;
use super::reporter::ScanReporter;
use crate::database::{EmbeddingCandidate, EmbeddingRepository};
use crate::error::{CoralError, Result};

/// Shortest track the inference service accepts, in seconds (exclusive).
pub const MIN_EMBEDDING_DURATION_SECS: i32 = 60;
/// Longest track the inference service accepts, in seconds (exclusive).
pub const MAX_EMBEDDING_DURATION_SECS: i32 = 15 * 60;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmbeddingJob {
    pub track: Track,
    pub path: String,
    pub request_id: RequestId,
}

impl EmbeddingJob {
    pub fn new(track: Track, path: impl Into<String>, request_id: RequestId) -> Self {
        Self {
            track,
            path: path.into(),
            request_id,
        }
    }
}

/// Computes and stores the embedding of one track.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Whether `track` is eligible at all. Ineligible tracks are never queued.
    fn accepts(&self, track: &Track) -> bool;

    async fn compute(&self, job: &EmbeddingJob) -> Result<()>;

    /// Eligible tracks of `library` that have no embedding stored yet.
    async fn tracks_missing_embeddings(&self, library: LibraryID)
    -> Result<Vec<EmbeddingCandidate>>;
}

/// Backend for deployments without an inference service.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopEmbeddingBackend;

#[async_trait]
impl EmbeddingBackend for NoopEmbeddingBackend {
    fn accepts(&self, _track: &Track) -> bool {
        false
    }

    async fn compute(&self, _job: &EmbeddingJob) -> Result<()> {
        Ok(())
    }

    async fn tracks_missing_embeddings(
        &self,
        _library: LibraryID,
    ) -> Result<Vec<EmbeddingCandidate>> {
        Ok(Vec::new())
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    file_path: &'a str,
    duration: i32,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    success: bool,
    #[serde(default)]
    error: Option<serde_json::Value>,
    data: Option<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embeddings: Vec<f32>,
}

/// Calls the inference service over HTTP and stores the returned vector.
pub struct HttpEmbeddingBackend {
    client: reqwest::Client,
    endpoint: String,
    repository: Arc<dyn EmbeddingRepository>,
}

impl fmt::Debug for HttpEmbeddingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpEmbeddingBackend")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl HttpEmbeddingBackend {
    pub fn new(base_url: &str, repository: Arc<dyn EmbeddingRepository>) -> Result<Self> {
        let client = reqwest::Client::builder().build().map_err(|err| {
            CoralError::Configuration(format!("failed to build embedding client: {err}"))
        })?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/embeddings", base_url.trim_end_matches('/')),
            repository,
        })
    }
}

pub(crate) fn duration_accepted(track: &Track) -> bool {
    track.duration_secs > MIN_EMBEDDING_DURATION_SECS
        && track.duration_secs < MAX_EMBEDDING_DURATION_SECS
}

#[async_trait]
impl EmbeddingBackend for HttpEmbeddingBackend {
    fn accepts(&self, track: &Track) -> bool {
        duration_accepted(track)
    }

    async fn compute(&self, job: &EmbeddingJob) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbeddingRequest {
                file_path: &job.path,
                duration: job.track.duration_secs,
            })
            .send()
            .await
            .map_err(|err| CoralError::Internal(format!("embedding request failed: {err}")))?;

        let status = response.status();
        let body: EmbeddingResponse = response.json().await.map_err(|err| {
            CoralError::Internal(format!("invalid embedding response ({status}): {err}"))
        })?;

        let embeddings = match body {
            EmbeddingResponse {
                success: true,
                data: Some(data),
                ..
            } if !data.embeddings.is_empty() => data.embeddings,
            EmbeddingResponse { error, .. } => {
                return Err(CoralError::Internal(format!(
                    "inference failed for {} ({status}): {}",
                    job.path,
                    error.map(|error| error.to_string()).unwrap_or_default()
                )));
            }
        };

        self.repository
            .store_embedding(job.track.id, &embeddings)
            .await?;
        debug!(
            path = %job.path,
            dimensions = embeddings.len(),
            "stored track embedding"
        );
        Ok(())
    }

    async fn tracks_missing_embeddings(
        &self,
        library: LibraryID,
    ) -> Result<Vec<EmbeddingCandidate>> {
        let candidates = self.repository.tracks_missing_embeddings(library).await?;
        Ok(candidates
            .into_iter()
            .filter(|candidate| duration_accepted(&candidate.track))
            .collect())
    }
}

/// Producer side of the embedding queue.
#[derive(Clone, Debug)]
pub struct EmbeddingQueue {
    sender: mpsc::Sender<EmbeddingJob>,
}

#[derive(Debug)]
pub struct EmbeddingQueueReceiver {
    receiver: mpsc::Receiver<EmbeddingJob>,
}

impl EmbeddingQueue {
    pub fn bounded(capacity: usize) -> (Self, EmbeddingQueueReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, EmbeddingQueueReceiver { receiver })
    }

    pub async fn enqueue(&self, job: EmbeddingJob) -> Result<()> {
        self.sender
            .send(job)
            .await
            .map_err(|_| CoralError::Internal("embedding queue is closed".into()))
    }
}

/// Drains the embedding queue with at most `max_concurrency` jobs in flight.
pub struct EmbeddingWorker {
    receiver: EmbeddingQueueReceiver,
    backend: Arc<dyn EmbeddingBackend>,
    reporter: Arc<dyn ScanReporter>,
    permits: Arc<Semaphore>,
    max_concurrency: usize,
}

impl fmt::Debug for EmbeddingWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingWorker")
            .field("max_concurrency", &self.max_concurrency)
            .field("available_permits", &self.permits.available_permits())
            .finish_non_exhaustive()
    }
}

impl EmbeddingWorker {
    pub fn new(
        receiver: EmbeddingQueueReceiver,
        backend: Arc<dyn EmbeddingBackend>,
        reporter: Arc<dyn ScanReporter>,
        config: &EmbeddingConfig,
    ) -> Self {
        let max_concurrency = config.max_concurrency.max(1);
        Self {
            receiver,
            backend,
            reporter,
            permits: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
        }
    }

    /// Run jobs concurrently, up to the configured cap, until cancelled.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(max_concurrency = self.max_concurrency, "embedding worker started");
        let mut in_flight = JoinSet::new();

        loop {
            let job = tokio::select! {
                _ = cancel.cancelled() => break,
                job = self.receiver.receiver.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&self.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let backend = Arc::clone(&self.backend);
            let reporter = Arc::clone(&self.reporter);
            in_flight.spawn(async move {
                if let Err(err) = backend.compute(&job).await {
                    warn!(
                        request_id = %job.request_id,
                        path = %job.path,
                        error = %err,
                        "embedding failed"
                    );
                }
                reporter.report_embedding_completed(job.request_id).await;
                drop(permit);
            });

            while in_flight.try_join_next().is_some() {}
        }

        in_flight.shutdown().await;
        info!("embedding worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use coral_model::MusicLibrary;
    use uuid::Uuid;

    use super::*;
    use crate::scan::orchestration::reporter::{InMemoryScanReporter, ScanStatus};

    #[derive(Default)]
    struct CountingBackend {
        running: AtomicUsize,
        peak: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingBackend for CountingBackend {
        fn accepts(&self, _track: &Track) -> bool {
            true
        }

        async fn compute(&self, _job: &EmbeddingJob) -> Result<()> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                return Err(CoralError::Internal("inference down".into()));
            }
            Ok(())
        }

        async fn tracks_missing_embeddings(
            &self,
            _library: LibraryID,
        ) -> Result<Vec<EmbeddingCandidate>> {
            Ok(Vec::new())
        }
    }

    fn job(request_id: RequestId) -> EmbeddingJob {
        let track = Track::new("song", Uuid::now_v7(), Uuid::now_v7());
        EmbeddingJob::new(track, "/music/song.flac", request_id)
    }

    async fn run_jobs(backend: Arc<CountingBackend>, jobs: usize) -> InMemoryScanReporter {
        let reporter = InMemoryScanReporter::default();
        let request = RequestId::new();
        reporter
            .register_scan(request, jobs, &MusicLibrary::new("/music"))
            .await;

        let (queue, receiver) = EmbeddingQueue::bounded(16);
        let config = EmbeddingConfig {
            max_concurrency: 2,
            ..EmbeddingConfig::default()
        };
        let worker = EmbeddingWorker::new(receiver, backend, Arc::new(reporter.clone()), &config);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(worker.run(cancel.clone()));

        for _ in 0..jobs {
            queue.enqueue(job(request)).await.unwrap();
        }
        reporter.add_expected_embeddings(request, jobs).await;

        for _ in 0..100 {
            if reporter.progress(request).await.unwrap().status == ScanStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        cancel.cancel();
        handle.await.unwrap();
        reporter
    }

    #[tokio::test(start_paused = true)]
    async fn caps_parallel_jobs_and_completes_scan() {
        let backend = Arc::new(CountingBackend::default());
        let reporter = run_jobs(Arc::clone(&backend), 5).await;

        assert!(backend.peak.load(Ordering::SeqCst) <= 2);
        let scans = reporter.active_scans().await;
        assert!(scans.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_jobs_still_count_towards_completion() {
        let backend = Arc::new(CountingBackend {
            fail: true,
            ..CountingBackend::default()
        });
        let reporter = run_jobs(backend, 3).await;
        assert!(reporter.active_scans().await.is_empty());
    }

    #[test]
    fn only_mid_length_tracks_are_eligible() {
        let mut track = Track::new("song", Uuid::now_v7(), Uuid::now_v7());
        track.duration_secs = 60;
        assert!(!duration_accepted(&track));
        track.duration_secs = 61;
        assert!(duration_accepted(&track));
        track.duration_secs = 899;
        assert!(duration_accepted(&track));
        track.duration_secs = 900;
        assert!(!duration_accepted(&track));
        assert!(!NoopEmbeddingBackend.accepts(&track));
    }
}

use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::config::ScanConfig;
use super::embedding::{EmbeddingBackend, EmbeddingQueue, EmbeddingWorker};
use super::queue::ScanQueue;
use super::reporter::ScanReporter;
use super::scheduler::ScanScheduler;
use super::service::ScanService;
use super::worker::ScanWorker;
use crate::scan::indexer::Indexer;

/// Owns the background tasks of the scan pipeline: the scan worker, the
/// embedding pool and the scheduler. They share one cancellation token.
pub struct ScanRuntime {
    service: ScanService,
    reporter: Arc<dyn ScanReporter>,
    shutdown_token: CancellationToken,
    handles: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl fmt::Debug for ScanRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let task_count = self
            .handles
            .try_lock()
            .map(|handles| handles.len())
            .unwrap_or_default();
        f.debug_struct("ScanRuntime")
            .field("service", &self.service)
            .field("task_count", &task_count)
            .field("shutdown_cancelled", &self.shutdown_token.is_cancelled())
            .finish()
    }
}

impl ScanRuntime {
    /// Spawn every task. Must be called from within a Tokio runtime.
    pub fn start(
        config: &ScanConfig,
        indexer: Indexer,
        reporter: Arc<dyn ScanReporter>,
        backend: Arc<dyn EmbeddingBackend>,
    ) -> Self {
        let shutdown_token = CancellationToken::new();
        let repository = Arc::clone(indexer.repository());

        let (scan_queue, scan_receiver) = ScanQueue::bounded(config.queue.scan_queue_capacity);
        let (embedding_queue, embedding_receiver) =
            EmbeddingQueue::bounded(config.embedding.queue_capacity);

        let service = ScanService::new(scan_queue, Arc::clone(&reporter), repository);

        let embedding_worker = EmbeddingWorker::new(
            embedding_receiver,
            Arc::clone(&backend),
            Arc::clone(&reporter),
            &config.embedding,
        );
        let scan_worker = ScanWorker::new(
            scan_receiver,
            indexer.with_bulk_options(config.bulk.into()),
            Arc::clone(&reporter),
            embedding_queue,
            backend,
        );
        let scheduler = ScanScheduler::new(service.clone(), config.schedule);

        let handles = vec![
            (
                "scan_worker",
                tokio::spawn(scan_worker.run(shutdown_token.child_token())),
            ),
            (
                "embedding_worker",
                tokio::spawn(embedding_worker.run(shutdown_token.child_token())),
            ),
            (
                "scheduler",
                tokio::spawn(scheduler.run(shutdown_token.child_token())),
            ),
        ];
        info!("scan runtime started");

        Self {
            service,
            reporter,
            shutdown_token,
            handles: Mutex::new(handles),
        }
    }

    pub fn service(&self) -> &ScanService {
        &self.service
    }

    pub fn reporter(&self) -> &Arc<dyn ScanReporter> {
        &self.reporter
    }

    pub fn queue(&self) -> ScanQueue {
        self.service.queue().clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Cancel every task and wait for it to exit.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for (name, handle) in handles {
            if let Err(err) = handle.await {
                warn!(task = name, error = %err, "scan runtime task ended abnormally");
            }
        }
        info!("scan runtime stopped");
    }
}

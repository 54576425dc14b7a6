use tokio::sync::mpsc;
use tracing::debug;

use super::job::ScanJob;
use crate::error::{CoralError, Result};

/// Producer handle of the scan queue. Clone it freely; the worker owns the
/// single receiving end.
#[derive(Clone, Debug)]
pub struct ScanQueue {
    sender: mpsc::Sender<ScanJob>,
}

/// Receiving end handed to [`ScanWorker`](super::worker::ScanWorker).
#[derive(Debug)]
pub struct ScanQueueReceiver {
    receiver: mpsc::Receiver<ScanJob>,
}

impl ScanQueue {
    pub fn bounded(capacity: usize) -> (Self, ScanQueueReceiver) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, ScanQueueReceiver { receiver })
    }

    /// Queue a job, waiting for room when the queue is full.
    pub async fn enqueue(&self, job: ScanJob) -> Result<()> {
        debug!(
            library = %job.library_id,
            request_id = %job.request_id,
            kind = %job.kind,
            trigger = %job.trigger,
            "queueing scan job"
        );
        self.sender
            .send(job)
            .await
            .map_err(|_| CoralError::Internal("scan queue is closed".into()))
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

impl ScanQueueReceiver {
    pub async fn recv(&mut self) -> Option<ScanJob> {
        self.receiver.recv().await
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use coral_model::LibraryID;

    use super::*;
    use crate::scan::orchestration::job::ScanTrigger;

    #[tokio::test]
    async fn jobs_come_out_in_order() {
        let (queue, mut receiver) = ScanQueue::bounded(4);
        let library = LibraryID::new();
        let first = ScanJob::library_scan(library, ScanTrigger::Manual);
        let second = ScanJob::directory_scan(library, "/music/b");

        queue.enqueue(first.clone()).await.unwrap();
        queue.enqueue(second.clone()).await.unwrap();

        assert_eq!(receiver.recv().await, Some(first));
        assert_eq!(receiver.recv().await, Some(second));
    }

    #[tokio::test]
    async fn enqueue_fails_once_the_worker_is_gone() {
        let (queue, receiver) = ScanQueue::bounded(1);
        drop(receiver);
        let job = ScanJob::library_scan(LibraryID::new(), ScanTrigger::Manual);
        assert!(queue.enqueue(job).await.is_err());
        assert!(queue.is_closed());
    }
}

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::config::ScheduleConfig;
use super::job::ScanTrigger;
use super::service::ScanService;

/// Queues library scans at startup and on a fixed interval.
#[derive(Debug)]
pub struct ScanScheduler {
    service: ScanService,
    config: ScheduleConfig,
}

impl ScanScheduler {
    pub fn new(service: ScanService, config: ScheduleConfig) -> Self {
        Self { service, config }
    }

    /// Trigger scans until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        if self.config.scan_on_startup {
            self.trigger().await;
        }

        let Some(period) = self.config.interval() else {
            return;
        };
        info!(interval_secs = period.as_secs(), "scheduled scans enabled");

        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.trigger().await,
            }
        }
    }

    async fn trigger(&self) {
        if let Err(err) = self.service.request_scans(ScanTrigger::Scheduled).await {
            warn!(error = %err, "failed to queue scheduled scans");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use coral_model::MusicLibrary;

    use super::*;
    use crate::database::{InMemoryLibraryStore, LibraryRepository};
    use crate::scan::orchestration::queue::ScanQueue;
    use crate::scan::orchestration::reporter::InMemoryScanReporter;

    #[tokio::test(start_paused = true)]
    async fn scans_on_startup_and_every_interval() {
        let store = Arc::new(InMemoryLibraryStore::new());
        store
            .create_library(&MusicLibrary::new("/music"))
            .await
            .unwrap();

        let (queue, mut receiver) = ScanQueue::bounded(16);
        let service = ScanService::new(queue, Arc::new(InMemoryScanReporter::default()), store);
        let scheduler = ScanScheduler::new(
            service,
            ScheduleConfig {
                scan_on_startup: true,
                interval_minutes: 1,
            },
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(scheduler.run(cancel.clone()));

        let startup = receiver.recv().await.unwrap();
        assert_eq!(startup.trigger, ScanTrigger::Scheduled);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(receiver.recv().await.is_some());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn disabled_schedule_returns_immediately() {
        let store = Arc::new(InMemoryLibraryStore::new());
        let (queue, receiver) = ScanQueue::bounded(1);
        let service = ScanService::new(queue, Arc::new(InMemoryScanReporter::default()), store);
        let scheduler = ScanScheduler::new(
            service,
            ScheduleConfig {
                scan_on_startup: false,
                interval_minutes: 0,
            },
        );

        scheduler.run(CancellationToken::new()).await;
        assert!(receiver.is_empty());
    }
}

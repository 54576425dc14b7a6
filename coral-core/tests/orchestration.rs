mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use coral_core::Result;
use coral_core::database::{EmbeddingCandidate, InMemoryLibraryStore};
use coral_core::scan::orchestration::{
    EmbeddingBackend, EmbeddingJob, InMemoryScanReporter, NoopEmbeddingBackend, ScanConfig,
    ScanJob, ScanProgressEvent, ScanReporter, ScanRuntime, ScanStatus, ScanTrigger,
    ScheduleConfig,
};
use coral_model::{LibraryID, RequestId, Track};
use futures::{Stream, StreamExt};

use support::{Fixture, tags};

/// Records every computed track and whether it was already stored.
struct RecordingBackend {
    store: Arc<InMemoryLibraryStore>,
    computed: Mutex<Vec<(uuid::Uuid, bool)>>,
}

#[async_trait]
impl EmbeddingBackend for RecordingBackend {
    fn accepts(&self, _track: &Track) -> bool {
        true
    }

    async fn compute(&self, job: &EmbeddingJob) -> Result<()> {
        let stored = self
            .store
            .entities::<Track>()
            .await?
            .iter()
            .any(|track| track.id == job.track.id);
        self.computed
            .lock()
            .expect("recording poisoned")
            .push((job.track.id, stored));
        Ok(())
    }

    async fn tracks_missing_embeddings(
        &self,
        _library: LibraryID,
    ) -> Result<Vec<EmbeddingCandidate>> {
        Ok(Vec::new())
    }
}

fn config() -> ScanConfig {
    ScanConfig {
        schedule: ScheduleConfig {
            scan_on_startup: false,
            interval_minutes: 0,
        },
        ..ScanConfig::default()
    }
}

async fn wait_for_finish(
    events: &mut (impl Stream<Item = ScanProgressEvent> + Unpin),
    request_id: RequestId,
) -> ScanProgressEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.next().await.expect("reporter is alive");
            let finished = match &event {
                ScanProgressEvent::Completed { request_id: id }
                | ScanProgressEvent::Failed { request_id: id, .. } => *id == request_id,
                _ => false,
            };
            if finished {
                return event;
            }
        }
    })
    .await
    .expect("scan finished in time")
}

#[tokio::test]
async fn scan_completes_after_embeddings_of_created_tracks() {
    let fixture = Fixture::new().await;
    fixture.add_file("Burial/Untrue/01.flac", tags("Archangel", "Burial", "Untrue"));
    fixture.add_file("Burial/Untrue/02.flac", tags("Near Dark", "Burial", "Untrue"));

    let reporter = Arc::new(InMemoryScanReporter::default());
    let mut events = Box::pin(reporter.event_stream());
    let backend = Arc::new(RecordingBackend {
        store: fixture.store.clone(),
        computed: Mutex::new(Vec::new()),
    });
    let runtime = ScanRuntime::start(
        &config(),
        fixture.indexer.clone(),
        reporter.clone(),
        backend.clone(),
    );

    let request = runtime
        .service()
        .request_library_scan(fixture.library.id, ScanTrigger::Manual, false)
        .await
        .expect("scan queued");
    let finished = wait_for_finish(&mut events, request.request_id).await;
    assert!(matches!(finished, ScanProgressEvent::Completed { .. }));

    let progress = reporter
        .progress(request.request_id)
        .await
        .expect("progress kept");
    assert_eq!(progress.status, ScanStatus::Completed);
    assert_eq!(progress.tracks_created, 2);
    assert_eq!(progress.embeddings_expected, 2);
    assert_eq!(progress.embeddings_completed, 2);

    let computed = backend.computed.lock().expect("recording poisoned").clone();
    assert_eq!(computed.len(), 2);
    assert!(computed.iter().all(|(_, stored)| *stored));

    runtime.shutdown().await;
}

#[tokio::test]
async fn scan_without_new_tracks_completes_immediately() {
    let fixture = Fixture::new().await;
    fixture.add_file("Burial/Untrue/01.flac", tags("Archangel", "Burial", "Untrue"));
    fixture.index(None).await;

    let reporter = Arc::new(InMemoryScanReporter::default());
    let mut events = Box::pin(reporter.event_stream());
    let runtime = ScanRuntime::start(
        &config(),
        fixture.indexer.clone(),
        reporter.clone(),
        Arc::new(NoopEmbeddingBackend),
    );

    let request = runtime
        .service()
        .request_library_scan(fixture.library.id, ScanTrigger::Manual, false)
        .await
        .expect("scan queued");
    wait_for_finish(&mut events, request.request_id).await;

    let progress = reporter
        .progress(request.request_id)
        .await
        .expect("progress kept");
    assert_eq!(progress.status, ScanStatus::Completed);
    assert_eq!(progress.tracks_indexed(), 0);
    assert_eq!(progress.embeddings_expected, 0);
    assert!(runtime.service().active_scans().await.is_empty());

    runtime.shutdown().await;
}

#[tokio::test]
async fn failed_job_does_not_stop_the_worker() {
    let fixture = Fixture::new().await;
    fixture.add_file("Burial/Untrue/01.flac", tags("Archangel", "Burial", "Untrue"));

    let reporter = Arc::new(InMemoryScanReporter::default());
    let mut events = Box::pin(reporter.event_stream());
    let runtime = ScanRuntime::start(
        &config(),
        fixture.indexer.clone(),
        reporter.clone(),
        Arc::new(NoopEmbeddingBackend),
    );

    let orphan = ScanJob::library_scan(LibraryID::new(), ScanTrigger::Manual);
    let orphan_id = orphan.request_id;
    runtime.queue().enqueue(orphan).await.expect("job queued");

    let request = runtime
        .service()
        .request_library_scan(fixture.library.id, ScanTrigger::Manual, false)
        .await
        .expect("scan queued");
    let finished = wait_for_finish(&mut events, request.request_id).await;

    assert!(matches!(finished, ScanProgressEvent::Completed { .. }));
    assert!(reporter.progress(orphan_id).await.is_none());
    assert_eq!(
        fixture
            .store
            .count(coral_core::bulk::EntityKind::Track)
            .await,
        1
    );

    runtime.shutdown().await;
}

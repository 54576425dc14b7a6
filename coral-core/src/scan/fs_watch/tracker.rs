//! Per-directory debounce.
//!
//! Every event resets the tracker's timer. Once the directory has been quiet
//! for the debounce window the buffered events are drained and turned into
//! scan jobs.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use coral_model::LibraryID;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::scan::orchestration::job::{FileRename, ScanJob, ScanTrigger};
use crate::scan::orchestration::queue::ScanQueue;

/// Audio file change routed to a tracker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WatchEvent {
    /// Created or modified.
    Changed(PathBuf),
    Deleted(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
}

/// Sent when a tracker's timer fired and its jobs were emitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackerFired {
    pub directory: PathBuf,
    /// Value of [`DirectoryEventTracker::generation`] when the timer started.
    pub generation: u64,
}

struct Emitter {
    library_id: LibraryID,
    library_root: PathBuf,
    directory: PathBuf,
    queue: ScanQueue,
    /// Buffered events. Holding the lock is what serialises emission passes.
    buffer: Mutex<mpsc::UnboundedReceiver<WatchEvent>>,
}

impl Emitter {
    async fn emit(&self) -> Result<Vec<ScanJob>> {
        let mut buffer = self.buffer.lock().await;

        let mut renames = Vec::new();
        let mut changed = 0usize;
        let mut deleted = 0usize;
        while let Ok(event) = buffer.try_recv() {
            match event {
                WatchEvent::Changed(_) => changed += 1,
                WatchEvent::Deleted(_) => deleted += 1,
                WatchEvent::Renamed { from, to } => renames.push(FileRename::new(from, to)),
            }
        }

        if renames.is_empty() && changed == 0 && deleted == 0 {
            return Ok(Vec::new());
        }

        let exists = matches!(tokio::fs::try_exists(&self.directory).await, Ok(true));
        let full_rescan = || {
            ScanJob::library_scan(self.library_id, ScanTrigger::FileSystemEvent)
                .with_incremental(false)
        };

        let mut jobs = Vec::new();
        if !exists {
            // A rename into a vanished directory is covered by the rescan.
            jobs.push(full_rescan());
        } else {
            if !renames.is_empty() {
                jobs.push(ScanJob::renames(self.library_id, renames));
            }
            if changed > 0 || deleted > 0 {
                jobs.push(if self.directory == self.library_root {
                    full_rescan()
                } else {
                    ScanJob::directory_scan(self.library_id, &self.directory)
                });
            }
        }

        info!(
            library = %self.library_id,
            directory = %self.directory.display(),
            exists,
            changed,
            deleted,
            jobs = jobs.len(),
            "directory settled, emitting scan jobs"
        );

        for job in &jobs {
            self.queue.enqueue(job.clone()).await?;
        }
        Ok(jobs)
    }
}

/// Debounces the events of one directory into scan jobs.
pub struct DirectoryEventTracker {
    directory: PathBuf,
    debounce: Duration,
    sender: mpsc::UnboundedSender<WatchEvent>,
    emitter: Arc<Emitter>,
    timer: Option<CancellationToken>,
    generation: u64,
    fired: Option<mpsc::UnboundedSender<TrackerFired>>,
}

impl fmt::Debug for DirectoryEventTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryEventTracker")
            .field("directory", &self.directory)
            .field("debounce", &self.debounce)
            .field("generation", &self.generation)
            .field("timer_armed", &self.timer.is_some())
            .finish()
    }
}

impl DirectoryEventTracker {
    pub fn new(
        library_id: LibraryID,
        library_root: impl Into<PathBuf>,
        directory: impl Into<PathBuf>,
        debounce: Duration,
        queue: ScanQueue,
    ) -> Self {
        let directory = directory.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        let emitter = Arc::new(Emitter {
            library_id,
            library_root: library_root.into(),
            directory: directory.clone(),
            queue,
            buffer: Mutex::new(receiver),
        });

        Self {
            directory,
            debounce,
            sender,
            emitter,
            timer: None,
            generation: 0,
            fired: None,
        }
    }

    /// Report every fired timer on `fired`, so the owner can retire trackers
    /// that have gone quiet.
    pub fn with_fired_notifications(mut self, fired: mpsc::UnboundedSender<TrackerFired>) -> Self {
        self.fired = Some(fired);
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Number of events tracked so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Buffer `event` and restart the quiet-period timer.
    pub fn track(&mut self, event: WatchEvent) {
        debug!(directory = %self.directory.display(), event = ?event, "tracking change");
        // The emitter owns the receiver for as long as this tracker lives.
        let _ = self.sender.send(event);
        self.generation += 1;

        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        let token = CancellationToken::new();
        self.timer = Some(token.clone());

        let emitter = Arc::clone(&self.emitter);
        let debounce = self.debounce;
        let fired = self.fired.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(debounce) => {
                    if let Err(err) = emitter.emit().await {
                        warn!(
                            directory = %emitter.directory.display(),
                            error = %err,
                            "failed to emit scan jobs"
                        );
                    }
                    if let Some(fired) = fired {
                        let _ = fired.send(TrackerFired {
                            directory: emitter.directory.clone(),
                            generation,
                        });
                    }
                }
            }
        });
    }

    /// Emit right away instead of waiting for the timer.
    pub async fn flush(&mut self) -> Result<Vec<ScanJob>> {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
        self.emitter.emit().await
    }

    /// Stop the pending timer. Buffered events are dropped with the tracker.
    pub fn dispose(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

impl Drop for DirectoryEventTracker {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::scan::orchestration::job::ScanKind;
    use crate::scan::orchestration::queue::ScanQueueReceiver;

    const DEBOUNCE: Duration = Duration::from_secs(5);

    fn tracker(root: &Path, directory: &Path) -> (DirectoryEventTracker, ScanQueueReceiver) {
        let (queue, receiver) = ScanQueue::bounded(16);
        let tracker =
            DirectoryEventTracker::new(LibraryID::new(), root, directory, DEBOUNCE, queue);
        (tracker, receiver)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_within_window_emits_one_job() {
        let root = tempdir().unwrap();
        let album = root.path().join("album");
        std::fs::create_dir(&album).unwrap();
        let (mut tracker, mut receiver) = tracker(root.path(), &album);

        for _ in 0..5 {
            tracker.track(WatchEvent::Changed(album.join("01.flac")));
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        let job = receiver.recv().await.unwrap();
        assert_eq!(job.kind, ScanKind::Index);
        assert_eq!(job.directory.as_deref(), Some(album.as_path()));
        assert!(!job.incremental);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(receiver.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn spaced_events_emit_one_job_each() {
        let root = tempdir().unwrap();
        let album = root.path().join("album");
        std::fs::create_dir(&album).unwrap();
        let (mut tracker, mut receiver) = tracker(root.path(), &album);

        for _ in 0..3 {
            tracker.track(WatchEvent::Changed(album.join("01.flac")));
            let job = receiver.recv().await.unwrap();
            assert_eq!(job.directory.as_deref(), Some(album.as_path()));
            tokio::time::sleep(DEBOUNCE * 2).await;
        }
        assert!(receiver.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_directory_rescans_whole_library() {
        let root = tempdir().unwrap();
        let gone = root.path().join("gone");
        let (mut tracker, mut receiver) = tracker(root.path(), &gone);

        tracker.track(WatchEvent::Deleted(gone.join("01.flac")));

        let job = receiver.recv().await.unwrap();
        assert_eq!(job.kind, ScanKind::Index);
        assert!(job.directory.is_none());
    }

    #[tokio::test]
    async fn vanished_directory_skips_renames() {
        let root = tempdir().unwrap();
        let gone = root.path().join("gone");
        let (mut tracker, mut receiver) = tracker(root.path(), &gone);

        tracker.track(WatchEvent::Renamed {
            from: gone.join("a.flac"),
            to: gone.join("b.flac"),
        });
        tracker.track(WatchEvent::Deleted(gone.join("c.flac")));

        let jobs = tracker.flush().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind, ScanKind::Index);
        assert!(jobs[0].directory.is_none());
        assert!(!jobs[0].incremental);
        assert!(jobs[0].renames.is_empty());

        assert_eq!(receiver.recv().await.unwrap().kind, ScanKind::Index);
        assert!(receiver.is_empty());
    }

    #[tokio::test]
    async fn renames_and_changes_emit_both_jobs() {
        let root = tempdir().unwrap();
        let album = root.path().join("album");
        std::fs::create_dir(&album).unwrap();
        let (mut tracker, mut receiver) = tracker(root.path(), &album);

        tracker.track(WatchEvent::Renamed {
            from: album.join("a.flac"),
            to: album.join("b.flac"),
        });
        tracker.track(WatchEvent::Changed(album.join("c.flac")));

        let jobs = tracker.flush().await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].kind, ScanKind::Rename);
        assert_eq!(
            jobs[0].renames,
            vec![FileRename::new(album.join("a.flac"), album.join("b.flac"))]
        );
        assert_eq!(jobs[1].kind, ScanKind::Index);

        assert_eq!(receiver.recv().await.unwrap().kind, ScanKind::Rename);
        assert_eq!(receiver.recv().await.unwrap().kind, ScanKind::Index);
        assert!(tracker.flush().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn disposed_tracker_never_fires() {
        let root = tempdir().unwrap();
        let (mut tracker, receiver) = tracker(root.path(), root.path());

        tracker.track(WatchEvent::Changed(root.path().join("01.flac")));
        tracker.dispose();
        tokio::time::sleep(DEBOUNCE * 3).await;
        assert!(receiver.is_empty());
    }
}

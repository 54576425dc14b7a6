//! Filesystem watch pipeline.
//!
//! One recursive `notify` watcher per library. Its callback only forwards raw
//! events into a channel; an async routing loop filters them down to audio
//! files, expands directory-level events, and hands each change to the
//! [`DirectoryEventTracker`] of the affected directory. A watcher that reports
//! an error is dropped and rebuilt after the configured restart delay.

pub mod tracker;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use coral_model::{LibraryID, MusicLibrary};
use notify::event::{CreateKind, EventKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{RwLock, mpsc};
use tokio::task::{JoinHandle, spawn_blocking};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub use tracker::{DirectoryEventTracker, TrackerFired, WatchEvent};

use crate::database::LibraryRepository;
use crate::error::{CoralError, Result};
use crate::scan::orchestration::config::WatchConfig;
use crate::scan::orchestration::queue::ScanQueue;
use crate::scan::scanner::is_audio_file;

/// Registry of library watchers, keyed by library id.
pub struct FsWatchService {
    config: WatchConfig,
    queue: ScanQueue,
    libraries: Arc<RwLock<HashMap<LibraryID, LibraryWatch>>>,
}

impl fmt::Debug for FsWatchService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("FsWatchService");
        debug.field("config", &self.config);
        match self.libraries.try_read() {
            Ok(guard) => {
                debug.field("library_count", &guard.len());
            }
            Err(_) => {
                debug.field("libraries", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl FsWatchService {
    pub fn new(config: WatchConfig, queue: ScanQueue) -> Self {
        Self {
            config,
            queue,
            libraries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start watching `library`. Registering an already watched library is a
    /// no-op.
    pub async fn register_library(&self, library: &MusicLibrary) -> Result<()> {
        let mut guard = self.libraries.write().await;
        if guard.contains_key(&library.id) {
            return Ok(());
        }

        if !tokio::fs::try_exists(&library.path).await? {
            return Err(CoralError::NotFound(format!(
                "library root {}",
                library.path.display()
            )));
        }

        let router = EventRouter::new(
            library.id,
            library.path.clone(),
            self.config.debounce(),
            self.queue.clone(),
        );
        let task = tokio::spawn(supervise(router, self.config.restart_delay()));

        info!(library = %library.id, path = %library.path.display(), "watching library");
        guard.insert(
            library.id,
            LibraryWatch {
                root: library.path.clone(),
                task,
            },
        );
        Ok(())
    }

    /// Stop watching the specified library.
    pub async fn unregister_library(&self, library_id: LibraryID) {
        if let Some(watch) = self.libraries.write().await.remove(&library_id) {
            info!(library = %library_id, path = %watch.root.display(), "stopped watching library");
            watch.shutdown();
        }
    }

    /// Tear down all registered watchers.
    pub async fn shutdown(&self) {
        let mut guard = self.libraries.write().await;
        let watches: Vec<_> = guard.drain().map(|(_, watch)| watch).collect();
        drop(guard);
        for watch in watches {
            watch.shutdown();
        }
    }

    pub async fn watched_libraries(&self) -> Vec<LibraryID> {
        self.libraries.read().await.keys().copied().collect()
    }

    /// Watch every stored library and drop watchers of libraries that no
    /// longer exist.
    pub async fn sync_libraries(&self, repository: &dyn LibraryRepository) -> Result<()> {
        let libraries = repository.list_libraries().await?;

        let stale: Vec<LibraryID> = {
            let guard = self.libraries.read().await;
            guard
                .keys()
                .filter(|id| !libraries.iter().any(|library| library.id == **id))
                .copied()
                .collect()
        };
        for library_id in stale {
            self.unregister_library(library_id).await;
        }

        for library in &libraries {
            if let Err(err) = self.register_library(library).await {
                warn!(
                    library = %library.id,
                    path = %library.path.display(),
                    error = %err,
                    "failed to watch library"
                );
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub async fn watcher_count(&self) -> usize {
        self.libraries.read().await.len()
    }
}

struct LibraryWatch {
    root: PathBuf,
    task: JoinHandle<()>,
}

impl LibraryWatch {
    fn shutdown(self) {
        // The watcher and every tracker live inside the task.
        self.task.abort();
    }
}

impl fmt::Debug for LibraryWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryWatch")
            .field("root", &self.root)
            .field("task_finished", &self.task.is_finished())
            .finish()
    }
}

enum WatchMessage {
    Event(Event),
    Error(String),
}

impl fmt::Debug for WatchMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchMessage::Event(event) => f
                .debug_struct("WatchMessage::Event")
                .field("kind", &event.kind)
                .field("path_count", &event.paths.len())
                .finish(),
            WatchMessage::Error(message) => f
                .debug_struct("WatchMessage::Error")
                .field("message", message)
                .finish(),
        }
    }
}

fn init_watcher(
    root: &Path,
    sender: mpsc::UnboundedSender<WatchMessage>,
) -> Result<RecommendedWatcher> {
    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| {
            let message = match res {
                Ok(event) => WatchMessage::Event(event),
                Err(err) => WatchMessage::Error(err.to_string()),
            };
            let _ = sender.send(message);
        },
        NotifyConfig::default(),
    )
    .map_err(|err| {
        CoralError::Internal(format!(
            "failed to create watcher for {}: {}",
            root.display(),
            err
        ))
    })?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|err| {
            CoralError::Internal(format!("failed to watch {}: {}", root.display(), err))
        })?;

    Ok(watcher)
}

/// Owns the watcher of one library and rebuilds it whenever it fails.
async fn supervise(mut router: EventRouter, restart_delay: Duration) {
    loop {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let root = router.root.clone();
        let watcher = match spawn_blocking(move || init_watcher(&root, sender)).await {
            Ok(Ok(watcher)) => watcher,
            Ok(Err(err)) => {
                warn!(library = %router.library_id, error = %err, "watcher failed to start");
                tokio::time::sleep(restart_delay).await;
                continue;
            }
            Err(err) => {
                warn!(library = %router.library_id, error = %err, "watcher initialization panicked");
                tokio::time::sleep(restart_delay).await;
                continue;
            }
        };

        let failure = loop {
            tokio::select! {
                message = receiver.recv() => match message {
                    Some(WatchMessage::Event(event)) => router.route(event).await,
                    Some(WatchMessage::Error(error)) => break error,
                    None => break "watcher channel closed".to_string(),
                },
                Some(fired) = router.fired.recv() => router.retire(fired),
            }
        };

        drop(watcher);
        warn!(
            library = %router.library_id,
            error = %failure,
            delay_ms = restart_delay.as_millis() as u64,
            "watcher failed, restarting"
        );
        tokio::time::sleep(restart_delay).await;
    }
}

/// Turns raw notify events into tracked audio file changes.
struct EventRouter {
    library_id: LibraryID,
    root: PathBuf,
    debounce: Duration,
    queue: ScanQueue,
    trackers: HashMap<PathBuf, DirectoryEventTracker>,
    fired_sender: mpsc::UnboundedSender<TrackerFired>,
    fired: mpsc::UnboundedReceiver<TrackerFired>,
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field("library_id", &self.library_id)
            .field("root", &self.root)
            .field("trackers", &self.trackers.len())
            .finish()
    }
}

impl EventRouter {
    fn new(library_id: LibraryID, root: PathBuf, debounce: Duration, queue: ScanQueue) -> Self {
        let (fired_sender, fired) = mpsc::unbounded_channel();
        Self {
            library_id,
            root,
            debounce,
            queue,
            trackers: HashMap::new(),
            fired_sender,
            fired,
        }
    }

    async fn route(&mut self, event: Event) {
        let Some(first) = event.paths.first().cloned() else {
            return;
        };
        if !first.starts_with(&self.root) {
            return;
        }

        match event.kind {
            EventKind::Create(CreateKind::Folder) => self.track_directory_contents(&first).await,
            EventKind::Create(_) => {
                if first.is_dir() {
                    self.track_directory_contents(&first).await;
                } else if is_audio_file(&first) {
                    self.track(WatchEvent::Changed(first));
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                let Some(to) = event.paths.get(1).cloned() else {
                    return;
                };
                self.route_rename(first, to).await;
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
                if is_audio_file(&first) {
                    self.track(WatchEvent::Deleted(first));
                } else if first.extension().is_none() {
                    self.track_directory_removed(first);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                if first.is_dir() {
                    self.track_directory_contents(&first).await;
                } else if is_audio_file(&first) {
                    self.track(WatchEvent::Changed(first));
                }
            }
            EventKind::Modify(_) => {
                if is_audio_file(&first) {
                    self.track(WatchEvent::Changed(first));
                }
            }
            EventKind::Remove(RemoveKind::Folder) => self.track_directory_removed(first),
            EventKind::Remove(_) => {
                if is_audio_file(&first) {
                    self.track(WatchEvent::Deleted(first));
                } else if first.extension().is_none() {
                    self.track_directory_removed(first);
                }
            }
            EventKind::Access(_) | EventKind::Any | EventKind::Other => {}
        }
    }

    async fn route_rename(&mut self, from: PathBuf, to: PathBuf) {
        if to.is_dir() {
            let files = audio_files_under(&to).await;
            debug!(
                from = %from.display(),
                to = %to.display(),
                files = files.len(),
                "directory renamed"
            );
            for file in files {
                let Ok(relative) = file.strip_prefix(&to) else {
                    continue;
                };
                let old = from.join(relative);
                self.track(WatchEvent::Renamed { from: old, to: file });
            }
            return;
        }

        match (is_audio_file(&from), is_audio_file(&to)) {
            (true, true) => self.track(WatchEvent::Renamed { from, to }),
            (true, false) => self.track(WatchEvent::Deleted(from)),
            (false, true) => self.track(WatchEvent::Changed(to)),
            (false, false) => {}
        }
    }

    async fn track_directory_contents(&mut self, directory: &Path) {
        let files = audio_files_under(directory).await;
        debug!(directory = %directory.display(), files = files.len(), "directory appeared");
        for file in files {
            self.track(WatchEvent::Changed(file));
        }
    }

    /// A removed directory is tracked at the library root so the resulting
    /// job rescans the whole library. Trackers inside it are dropped, the
    /// rescan covers their events.
    fn track_directory_removed(&mut self, directory: PathBuf) {
        let stale: Vec<PathBuf> = self
            .trackers
            .keys()
            .filter(|key| **key != self.root && key.starts_with(&directory))
            .cloned()
            .collect();
        for key in stale {
            if let Some(mut tracker) = self.trackers.remove(&key) {
                tracker.dispose();
            }
        }
        let root = self.root.clone();
        self.tracker_for(root).track(WatchEvent::Deleted(directory));
    }

    fn track(&mut self, event: WatchEvent) {
        let path = match &event {
            WatchEvent::Changed(path) | WatchEvent::Deleted(path) => path,
            WatchEvent::Renamed { to, .. } => to,
        };
        let directory = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.clone());
        if matches!(event, WatchEvent::Deleted(_))
            && directory != self.root
            && !directory.exists()
        {
            self.track_directory_removed(directory);
            return;
        }
        self.tracker_for(directory).track(event);
    }

    fn tracker_for(&mut self, directory: PathBuf) -> &mut DirectoryEventTracker {
        self.trackers.entry(directory.clone()).or_insert_with(|| {
            DirectoryEventTracker::new(
                self.library_id,
                self.root.clone(),
                directory,
                self.debounce,
                self.queue.clone(),
            )
            .with_fired_notifications(self.fired_sender.clone())
        })
    }

    /// Drop a tracker whose timer fired, unless it saw new events since.
    fn retire(&mut self, fired: TrackerFired) {
        let quiet = self
            .trackers
            .get(&fired.directory)
            .is_some_and(|tracker| tracker.generation() == fired.generation);
        if quiet && let Some(mut tracker) = self.trackers.remove(&fired.directory) {
            tracker.dispose();
        }
    }
}

async fn audio_files_under(directory: &Path) -> Vec<PathBuf> {
    let directory = directory.to_path_buf();
    spawn_blocking(move || {
        WalkDir::new(&directory)
            .follow_links(true)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file() && is_audio_file(entry.path()))
            .map(|entry| entry.into_path())
            .collect()
    })
    .await
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::scan::orchestration::job::ScanKind;
    use crate::scan::orchestration::queue::ScanQueueReceiver;

    fn router(root: &Path) -> (EventRouter, ScanQueueReceiver) {
        let (queue, receiver) = ScanQueue::bounded(16);
        let router = EventRouter::new(
            LibraryID::new(),
            root.to_path_buf(),
            Duration::from_secs(5),
            queue,
        );
        (router, receiver)
    }

    #[tokio::test]
    async fn registers_and_unregisters_library() -> Result<()> {
        let tmp = tempdir().unwrap();
        let (queue, _receiver) = ScanQueue::bounded(4);
        let service = FsWatchService::new(WatchConfig::default(), queue);
        let library = MusicLibrary::new(tmp.path());

        service.register_library(&library).await?;
        service.register_library(&library).await?;
        assert_eq!(service.watcher_count().await, 1);
        assert_eq!(service.watched_libraries().await, vec![library.id]);

        service.unregister_library(library.id).await;
        assert_eq!(service.watcher_count().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn missing_root_is_rejected() {
        let tmp = tempdir().unwrap();
        let (queue, _receiver) = ScanQueue::bounded(4);
        let service = FsWatchService::new(WatchConfig::default(), queue);
        let library = MusicLibrary::new(tmp.path().join("missing"));

        assert!(service.register_library(&library).await.is_err());
        assert_eq!(service.watcher_count().await, 0);
    }

    #[tokio::test]
    async fn sync_follows_the_repository() -> Result<()> {
        let tmp = tempdir().unwrap();
        let store = crate::database::InMemoryLibraryStore::new();
        let library = MusicLibrary::new(tmp.path());
        store.create_library(&library).await?;

        let (queue, _receiver) = ScanQueue::bounded(4);
        let service = FsWatchService::new(WatchConfig::default(), queue);
        let stale = MusicLibrary::new(tmp.path());
        service.register_library(&stale).await?;

        service.sync_libraries(&store).await?;
        assert_eq!(service.watched_libraries().await, vec![library.id]);
        service.shutdown().await;
        assert_eq!(service.watcher_count().await, 0);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn removed_directory_triggers_library_wide_scan() {
        let tmp = tempdir().unwrap();
        let (mut router, mut receiver) = router(tmp.path());

        let removed = tmp.path().join("old album");
        router
            .route(Event::new(EventKind::Remove(RemoveKind::Folder)).add_path(removed))
            .await;

        let job = receiver.recv().await.unwrap();
        assert_eq!(job.kind, ScanKind::Index);
        assert!(job.directory.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn deleted_directory_with_files_queues_one_scan() {
        let tmp = tempdir().unwrap();
        let (mut router, mut receiver) = router(tmp.path());

        let removed = tmp.path().join("old album");
        for file in ["a.flac", "b.flac"] {
            router
                .route(
                    Event::new(EventKind::Remove(RemoveKind::File))
                        .add_path(removed.join(file)),
                )
                .await;
        }
        router
            .route(Event::new(EventKind::Remove(RemoveKind::Folder)).add_path(removed))
            .await;
        assert_eq!(router.trackers.len(), 1);
        assert!(router.trackers.contains_key(tmp.path()));

        let job = receiver.recv().await.unwrap();
        assert_eq!(job.kind, ScanKind::Index);
        assert!(job.directory.is_none());
        assert!(!job.incremental);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(receiver.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unspecified_removal_of_a_directory_rescans_library() {
        let tmp = tempdir().unwrap();
        let (mut router, mut receiver) = router(tmp.path());

        let gone = tmp.path().join("gone");
        router
            .route(Event::new(EventKind::Remove(RemoveKind::Any)).add_path(gone))
            .await;

        let job = receiver.recv().await.unwrap();
        assert!(job.directory.is_none());
        assert!(!job.incremental);
    }

    #[tokio::test(start_paused = true)]
    async fn created_directory_tracks_each_audio_file() {
        let tmp = tempdir().unwrap();
        let album = tmp.path().join("album");
        std::fs::create_dir(&album).unwrap();
        std::fs::write(album.join("01.flac"), b"x").unwrap();
        std::fs::write(album.join("02.mp3"), b"x").unwrap();
        std::fs::write(album.join("cover.jpg"), b"x").unwrap();

        let (mut router, mut receiver) = router(tmp.path());
        router
            .route(Event::new(EventKind::Create(CreateKind::Folder)).add_path(album.clone()))
            .await;

        let tracker = router.trackers.get(&album).unwrap();
        assert_eq!(tracker.generation(), 2);

        let job = receiver.recv().await.unwrap();
        assert_eq!(job.directory.as_deref(), Some(album.as_path()));
    }

    #[tokio::test]
    async fn renamed_directory_becomes_rename_pairs() {
        let tmp = tempdir().unwrap();
        let renamed = tmp.path().join("new name");
        std::fs::create_dir(&renamed).unwrap();
        std::fs::write(renamed.join("01.flac"), b"x").unwrap();
        let original = tmp.path().join("old name");

        let (mut router, _receiver) = router(tmp.path());
        router
            .route(
                Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
                    .add_path(original.clone())
                    .add_path(renamed.clone()),
            )
            .await;

        let tracker = router.trackers.get_mut(&renamed).unwrap();
        let jobs = tracker.flush().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind, ScanKind::Rename);
        assert_eq!(jobs[0].renames[0].old_path, original.join("01.flac"));
        assert_eq!(jobs[0].renames[0].new_path, renamed.join("01.flac"));
    }

    #[tokio::test]
    async fn ignores_non_audio_and_foreign_paths() {
        let tmp = tempdir().unwrap();
        let (mut router, _receiver) = router(tmp.path());

        router
            .route(
                Event::new(EventKind::Modify(ModifyKind::Any))
                    .add_path(tmp.path().join("notes.txt")),
            )
            .await;
        router
            .route(
                Event::new(EventKind::Modify(ModifyKind::Any))
                    .add_path(PathBuf::from("/elsewhere/song.flac")),
            )
            .await;
        assert!(router.trackers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn fired_tracker_is_retired() {
        let tmp = tempdir().unwrap();
        let (mut router, mut receiver) = router(tmp.path());
        let song = tmp.path().join("song.flac");

        router
            .route(Event::new(EventKind::Create(CreateKind::File)).add_path(song))
            .await;
        assert_eq!(router.trackers.len(), 1);

        receiver.recv().await.unwrap();
        let fired = router.fired.recv().await.unwrap();
        router.retire(fired);
        assert!(router.trackers.is_empty());
    }
}

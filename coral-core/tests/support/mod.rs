//! Shared fixtures for coral-core integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};

use coral_core::database::{InMemoryLibraryStore, LibraryRepository, library_schema};
use coral_core::scan::indexer::IndexerDeps;
use coral_core::scan::orchestration::IndexerConfig;
use coral_core::scan::tags::EmbeddedPicture;
use coral_core::scan::{
    DecodedTrack, DirectoryScanner, IndexEvent, Indexer, ScanRequest, TagDecoder, TagError,
};
use coral_core::services::{FsArtworkService, KeywordSearchService};
use coral_model::MusicLibrary;
use futures::StreamExt;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Decoder answering from a table keyed by file name. Unknown files are
/// reported as unreadable.
#[derive(Debug, Default)]
pub struct TableDecoder {
    tags: RwLock<HashMap<String, DecodedTrack>>,
}

impl TableDecoder {
    pub fn set(&self, file_name: &str, tags: DecodedTrack) {
        self.tags
            .write()
            .expect("decoder table poisoned")
            .insert(file_name.to_string(), tags);
    }
}

impl TagDecoder for TableDecoder {
    fn decode(&self, path: &Path) -> Result<DecodedTrack, TagError> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.tags
            .read()
            .expect("decoder table poisoned")
            .get(&name)
            .cloned()
            .ok_or_else(|| TagError::Unreadable {
                path: path.to_path_buf(),
                reason: "no tags".into(),
            })
    }

    fn embedded_picture(&self, _path: &Path) -> Result<Option<EmbeddedPicture>, TagError> {
        Ok(None)
    }
}

pub fn tags(title: &str, artist: &str, album: &str) -> DecodedTrack {
    DecodedTrack {
        title: Some(title.to_string()),
        artist: Some(artist.to_string()),
        album: Some(album.to_string()),
        year: Some(2007),
        duration_secs: 240,
        codec: "FLAC".to_string(),
        sample_rate: Some(44_100),
        bit_depth: Some(16),
        channels: Some(2),
        ..DecodedTrack::default()
    }
}

/// A library rooted in a temp dir, backed by the in-memory store.
pub struct Fixture {
    pub root: TempDir,
    pub artwork_dir: TempDir,
    pub store: Arc<InMemoryLibraryStore>,
    pub decoder: Arc<TableDecoder>,
    pub indexer: Indexer,
    pub library: MusicLibrary,
}

impl Fixture {
    pub async fn new() -> Self {
        let root = TempDir::new().expect("library root");
        let artwork_dir = TempDir::new().expect("artwork dir");
        let store = Arc::new(InMemoryLibraryStore::new());
        let decoder = Arc::new(TableDecoder::default());

        let library = MusicLibrary::new(root.path());
        store
            .create_library(&library)
            .await
            .expect("library is stored");

        let deps = IndexerDeps {
            repository: store.clone(),
            entity_store: store.clone(),
            schema: Arc::new(library_schema()),
            decoder: decoder.clone(),
            artwork: Arc::new(FsArtworkService::new(artwork_dir.path(), decoder.clone())),
            search: Arc::new(KeywordSearchService::new(store.clone())),
        };
        let indexer = Indexer::new(deps, IndexerConfig::default());

        Self {
            root,
            artwork_dir,
            store,
            decoder,
            indexer,
            library,
        }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.path().join(relative)
    }

    /// Create an audio file under the library root and register its tags.
    pub fn add_file(&self, relative: &str, tags: DecodedTrack) -> PathBuf {
        let path = self.path(relative);
        std::fs::create_dir_all(path.parent().expect("file has a parent"))
            .expect("create directories");
        std::fs::write(&path, b"audio").expect("write audio file");
        self.decoder.set(
            &path.file_name().expect("file name").to_string_lossy(),
            tags,
        );
        path
    }

    /// Push the file's mtime forward so the next full scan picks it up.
    pub fn touch(&self, relative: &str) {
        let file = std::fs::File::options()
            .write(true)
            .open(self.path(relative))
            .expect("open audio file");
        file.set_modified(SystemTime::now() + Duration::from_secs(60))
            .expect("set mtime");
    }

    /// Run one full (non-incremental) index pass and finalize it.
    pub async fn index(&self, directory: Option<PathBuf>) -> Vec<IndexEvent> {
        let cancel = CancellationToken::new();
        let scanner = DirectoryScanner::new(self.store.clone());
        let request = ScanRequest {
            library: self.library.clone(),
            directory: directory.clone(),
            incremental: false,
        };

        let groups = scanner
            .scan_library(&request)
            .await
            .expect("directory walk starts");
        let mut session = self.indexer.begin_session(self.library.clone());

        let mut events = Vec::new();
        {
            let mut stream = session.index_directory_groups(groups, directory, cancel.clone());
            while let Some(event) = stream.next().await {
                events.push(event.expect("indexing succeeds"));
            }
        }
        session.finalize(&cancel).await.expect("finalize succeeds");
        events
    }
}

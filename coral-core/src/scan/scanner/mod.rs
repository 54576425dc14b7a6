//! Directory walker that diffs on-disk audio files against stored state.
//!
//! [`DirectoryScanner::scan_library`] yields one [`DirectoryGroup`] per
//! directory holding at least one candidate file. Groups are produced lazily
//! while the tree is walked so a consumer that stops polling also stops the
//! walk. [`DirectoryScanner::count_files`] drives the same stream, so the count
//! always matches what a scan would produce at that moment.

/// File type allow-lists.
pub mod settings;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_stream::stream;
use chrono::{DateTime, SubsecRound, Utc};
use coral_model::MusicLibrary;
use futures::StreamExt;
use futures::stream::BoxStream;
use tracing::{debug, warn};

pub use settings::{AUDIO_FILE_EXTENSIONS, IMAGE_FILE_EXTENSIONS, is_audio_file, is_image_file};

use crate::database::LibraryRepository;
use crate::error::Result;

/// Stored path representation shared by the scanner and the indexer.
pub fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// Filesystem timestamps truncated to the precision the store keeps.
pub fn normalize_timestamp(time: SystemTime) -> DateTime<Utc> {
    DateTime::<Utc>::from(time).trunc_subsecs(6)
}

#[derive(Clone, Debug)]
pub struct ScanRequest {
    pub library: MusicLibrary,
    /// Restrict the walk to this directory (recursively) instead of the
    /// library root.
    pub directory: Option<PathBuf>,
    pub incremental: bool,
}

impl ScanRequest {
    pub fn full(library: MusicLibrary) -> Self {
        Self {
            library,
            directory: None,
            incremental: false,
        }
    }

    pub fn root(&self) -> &Path {
        self.directory.as_deref().unwrap_or(&self.library.path)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub size_bytes: i64,
    pub modified_at: DateTime<Utc>,
}

/// Candidate files found directly inside one directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirectoryGroup {
    pub directory: PathBuf,
    pub files: Vec<ScannedFile>,
}

/// Which files a scan hands to the indexer.
enum Inclusion {
    /// Everything except files stored with the same path and mtime.
    Changed(HashMap<String, DateTime<Utc>>),
    /// Files modified or created after the last finished scan.
    Since(Option<DateTime<Utc>>),
}

impl Inclusion {
    fn includes(&self, path: &Path, modified: DateTime<Utc>, created: Option<DateTime<Utc>>) -> bool {
        match self {
            Inclusion::Changed(known) => known.get(&path_key(path)) != Some(&modified),
            Inclusion::Since(None) => true,
            Inclusion::Since(Some(last_scan)) => {
                modified > *last_scan || created.is_some_and(|created| created > *last_scan)
            }
        }
    }
}

/// Finds audio files that need indexing, grouped by directory.
pub struct DirectoryScanner {
    repository: Arc<dyn LibraryRepository>,
}

impl fmt::Debug for DirectoryScanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryScanner").finish_non_exhaustive()
    }
}

impl DirectoryScanner {
    pub fn new(repository: Arc<dyn LibraryRepository>) -> Self {
        Self { repository }
    }

    /// Number of files [`scan_library`](Self::scan_library) would yield for
    /// the same request.
    pub async fn count_files(&self, request: &ScanRequest) -> Result<usize> {
        let mut groups = self.scan_library(request).await?;
        let mut total = 0;
        while let Some(group) = groups.next().await {
            total += group?.files.len();
        }
        Ok(total)
    }

    /// Stream new or changed audio files, one group per parent directory.
    ///
    /// Groups are produced as the walk reaches them.
    pub async fn scan_library(
        &self,
        request: &ScanRequest,
    ) -> Result<BoxStream<'static, Result<DirectoryGroup>>> {
        let inclusion = if request.incremental {
            Inclusion::Since(request.library.last_scan)
        } else {
            let known = self
                .repository
                .known_files(request.library.id)
                .await?
                .into_iter()
                .map(|file| (file.path, file.modified_at))
                .collect();
            Inclusion::Changed(known)
        };

        let root = request.root().to_path_buf();
        debug!(
            library = %request.library.id,
            root = %root.display(),
            incremental = request.incremental,
            "starting directory walk"
        );

        let groups = stream! {
            let mut pending = vec![root];
            while let Some(directory) = pending.pop() {
                let Some((files, mut subdirectories)) = read_directory(&directory, &inclusion).await
                else {
                    continue;
                };

                subdirectories.sort();
                pending.extend(subdirectories.into_iter().rev());

                if !files.is_empty() {
                    yield Ok(DirectoryGroup { directory, files });
                }
            }
        };

        Ok(groups.boxed())
    }
}

/// Candidate files and child directories of one directory, or `None` when
/// it cannot be read (it may have vanished mid-walk).
async fn read_directory(
    directory: &Path,
    inclusion: &Inclusion,
) -> Option<(Vec<ScannedFile>, Vec<PathBuf>)> {
    let mut entries = match tokio::fs::read_dir(directory).await {
        Ok(entries) => entries,
        Err(err) => {
            warn!(path = %directory.display(), error = %err, "skipping unreadable directory");
            return None;
        }
    };

    let mut files = Vec::new();
    let mut subdirectories = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(err) => {
                warn!(path = %directory.display(), error = %err, "directory listing interrupted");
                break;
            }
        };

        let path = entry.path();
        let metadata = match entry.metadata().await {
            Ok(metadata) => metadata,
            Err(err) => {
                debug!(path = %path.display(), error = %err, "entry vanished during scan");
                continue;
            }
        };

        if metadata.is_dir() {
            subdirectories.push(path);
            continue;
        }
        if !metadata.is_file() || !is_audio_file(&path) {
            continue;
        }

        let Ok(modified) = metadata.modified() else {
            continue;
        };
        let modified_at = normalize_timestamp(modified);
        let created_at = metadata.created().ok().map(normalize_timestamp);

        if inclusion.includes(&path, modified_at, created_at) {
            files.push(ScannedFile {
                path,
                size_bytes: i64::try_from(metadata.len()).unwrap_or(i64::MAX),
                modified_at,
            });
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Some((files, subdirectories))
}

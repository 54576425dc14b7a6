use std::fmt;
use std::path::PathBuf;

use coral_model::{LibraryID, RequestId};
use serde::{Deserialize, Serialize};

/// What a scan job does once it reaches the worker.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ScanKind {
    /// Walk the library (or one directory of it) and index what changed.
    Index,
    /// Re-point stored files at new paths without touching their tags.
    Rename,
}

impl fmt::Display for ScanKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanKind::Index => write!(f, "index"),
            ScanKind::Rename => write!(f, "rename"),
        }
    }
}

/// Why a scan job was queued.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ScanTrigger {
    Manual,
    Scheduled,
    FileSystemEvent,
    LibraryAdded,
}

impl fmt::Display for ScanTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanTrigger::Manual => write!(f, "manual"),
            ScanTrigger::Scheduled => write!(f, "scheduled"),
            ScanTrigger::FileSystemEvent => write!(f, "fs_event"),
            ScanTrigger::LibraryAdded => write!(f, "library_added"),
        }
    }
}

/// A file that moved on disk.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct FileRename {
    pub old_path: PathBuf,
    pub new_path: PathBuf,
}

impl FileRename {
    pub fn new(old_path: impl Into<PathBuf>, new_path: impl Into<PathBuf>) -> Self {
        Self {
            old_path: old_path.into(),
            new_path: new_path.into(),
        }
    }
}

/// One unit of work for the scan worker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanJob {
    pub library_id: LibraryID,
    pub kind: ScanKind,
    /// Restricts an index job to one directory of the library. `None` scans
    /// the whole library.
    pub directory: Option<PathBuf>,
    /// Only pick up files whose modification time moved on.
    pub incremental: bool,
    /// Correlation id carried through progress reports and embedding jobs.
    pub request_id: RequestId,
    pub trigger: ScanTrigger,
    /// Rename pairs for [`ScanKind::Rename`] jobs.
    pub renames: Vec<FileRename>,
}

impl ScanJob {
    /// Incremental index of the whole library.
    pub fn library_scan(library_id: LibraryID, trigger: ScanTrigger) -> Self {
        Self {
            library_id,
            kind: ScanKind::Index,
            directory: None,
            incremental: true,
            request_id: RequestId::new(),
            trigger,
            renames: Vec::new(),
        }
    }

    /// Full re-index of a single directory after filesystem changes.
    pub fn directory_scan(library_id: LibraryID, directory: impl Into<PathBuf>) -> Self {
        Self {
            library_id,
            kind: ScanKind::Index,
            directory: Some(directory.into()),
            incremental: false,
            request_id: RequestId::new(),
            trigger: ScanTrigger::FileSystemEvent,
            renames: Vec::new(),
        }
    }

    /// Apply `renames` without rescanning.
    pub fn renames(library_id: LibraryID, renames: Vec<FileRename>) -> Self {
        Self {
            library_id,
            kind: ScanKind::Rename,
            directory: None,
            incremental: false,
            request_id: RequestId::new(),
            trigger: ScanTrigger::FileSystemEvent,
            renames,
        }
    }

    /// Only include files changed since the last scan when `incremental`.
    pub fn with_incremental(mut self, incremental: bool) -> Self {
        self.incremental = incremental;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_scans_are_full_rescans() {
        let library = LibraryID::new();
        let job = ScanJob::directory_scan(library, "/music/a");
        assert_eq!(job.kind, ScanKind::Index);
        assert!(!job.incremental);
        assert_eq!(job.directory.as_deref(), Some(std::path::Path::new("/music/a")));

        let job = ScanJob::library_scan(library, ScanTrigger::Manual);
        assert!(job.incremental);
        assert!(job.directory.is_none());
    }

    #[test]
    fn every_job_gets_its_own_request_id() {
        let library = LibraryID::new();
        let first = ScanJob::library_scan(library, ScanTrigger::Scheduled);
        let second = ScanJob::library_scan(library, ScanTrigger::Scheduled);
        assert_ne!(first.request_id, second.request_id);
    }
}

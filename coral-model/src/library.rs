use std::path::PathBuf;

use chrono::{DateTime, Utc};

use crate::ids::LibraryID;

/// A registered library root that is scanned and watched for audio files.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MusicLibrary {
    pub id: LibraryID,
    pub path: PathBuf,
    /// Completion time of the last finalized index pass. `None` until the
    /// first scan has finished.
    pub last_scan: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MusicLibrary {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: LibraryID::new(),
            path: path.into(),
            last_scan: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Human readable name used in progress reports.
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

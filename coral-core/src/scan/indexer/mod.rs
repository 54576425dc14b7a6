//! Turns decoded files into library entities.
//!
//! An [`Indexer`] holds the shared collaborators. Each index job opens an
//! [`IndexingSession`], which owns the bulk cache for the duration of the job:
//! new entities accumulate there until the session flushes them, while updates
//! to tracks that already exist are written straight through the repository.

pub mod artists;
mod session;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use coral_model::{MusicLibrary, Track};
use tracing::{info, warn};

pub use artists::{ParsedArtist, parse_artists, split_artists};
pub use session::{FinalizeSummary, IndexingSession, OrphanCleanup};

use super::orchestration::config::IndexerConfig;
use super::orchestration::job::FileRename;
use super::scanner::{normalize_timestamp, path_key};
use super::tags::TagDecoder;
use crate::bulk::{BulkInsertContext, BulkInsertOptions, EntityStore, SchemaRegistry};
use crate::database::{LibraryRepository, RenameOutcome};
use crate::error::Result;
use crate::services::{ArtworkService, SearchService};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IndexOperation {
    Create,
    Update,
    Delete,
}

/// Outcome of indexing one file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexEvent {
    pub operation: IndexOperation,
    pub path: PathBuf,
    /// Resulting track; `None` for a deleted file that had no track.
    pub track: Option<Track>,
}

impl IndexEvent {
    pub fn new(operation: IndexOperation, path: impl Into<PathBuf>, track: Option<Track>) -> Self {
        Self {
            operation,
            path: path.into(),
            track,
        }
    }
}

/// Collaborators shared by every indexing session.
#[derive(Clone)]
pub struct IndexerDeps {
    /// Lookups, updates and deletes outside the bulk path.
    pub repository: Arc<dyn LibraryRepository>,
    /// Backing store of each session's bulk insert cache.
    pub entity_store: Arc<dyn EntityStore>,
    pub schema: Arc<SchemaRegistry>,
    pub decoder: Arc<dyn TagDecoder>,
    pub artwork: Arc<dyn ArtworkService>,
    pub search: Arc<dyn SearchService>,
}

impl fmt::Debug for IndexerDeps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexerDeps").finish_non_exhaustive()
    }
}

/// Turns scanned directory groups into persisted library entities.
#[derive(Clone, Debug)]
pub struct Indexer {
    deps: IndexerDeps,
    config: IndexerConfig,
    bulk_options: BulkInsertOptions,
}

impl Indexer {
    pub fn new(deps: IndexerDeps, config: IndexerConfig) -> Self {
        Self {
            deps,
            config,
            bulk_options: BulkInsertOptions::default(),
        }
    }

    pub fn with_bulk_options(mut self, options: BulkInsertOptions) -> Self {
        self.bulk_options = options;
        self
    }

    pub fn repository(&self) -> &Arc<dyn LibraryRepository> {
        &self.deps.repository
    }

    /// Open a session with an empty bulk cache for one index job.
    pub fn begin_session(&self, library: MusicLibrary) -> IndexingSession {
        let bulk = BulkInsertContext::new(
            Arc::clone(&self.deps.entity_store),
            Arc::clone(&self.deps.schema),
            self.bulk_options,
        );
        IndexingSession::new(self.deps.clone(), self.config, library, bulk)
    }

    /// Point stored files at their new paths.
    ///
    /// Pairs whose old path is unknown, or whose new path already belongs to
    /// another file, are logged and skipped.
    pub async fn handle_renames(
        &self,
        library: &MusicLibrary,
        renames: &[FileRename],
    ) -> Result<Vec<IndexEvent>> {
        let mut events = Vec::with_capacity(renames.len());

        for rename in renames {
            let modified_at = match tokio::fs::metadata(&rename.new_path).await {
                Ok(metadata) => metadata
                    .modified()
                    .map(normalize_timestamp)
                    .unwrap_or_else(|_| chrono::Utc::now()),
                Err(_) => chrono::Utc::now(),
            };

            let outcome = self
                .deps
                .repository
                .rename_audio_file(
                    &path_key(&rename.old_path),
                    &path_key(&rename.new_path),
                    modified_at,
                )
                .await?;

            match outcome {
                RenameOutcome::Renamed(track) => {
                    events.push(IndexEvent::new(
                        IndexOperation::Update,
                        &rename.new_path,
                        Some(track),
                    ));
                }
                RenameOutcome::NotFound => {
                    warn!(
                        library = %library.id,
                        old_path = %rename.old_path.display(),
                        "renamed file is not indexed, skipping"
                    );
                }
                RenameOutcome::TargetExists => {
                    warn!(
                        library = %library.id,
                        new_path = %rename.new_path.display(),
                        "rename target is already indexed, skipping"
                    );
                }
            }
        }

        info!(
            library = %library.id,
            requested = renames.len(),
            applied = events.len(),
            "applied file renames"
        );
        Ok(events)
    }
}

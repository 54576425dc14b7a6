use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coral_model::{Artwork, AudioFile, LibraryID, MusicLibrary, Track};
use uuid::Uuid;

use crate::error::Result;

/// A stored audio file as seen by the directory scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownFile {
    pub audio_file_id: Uuid,
    pub path: String,
    pub modified_at: DateTime<Utc>,
}

/// Existing track for a path together with its current artist links.
#[derive(Debug, Clone)]
pub struct StoredTrack {
    pub track: Track,
    pub audio_file: AudioFile,
    /// `ArtistWithRole` ids currently linked to the track.
    pub artist_ids: Vec<Uuid>,
}

/// Scalar update for an existing track and the file backing it.
#[derive(Debug, Clone)]
pub struct TrackUpdate {
    /// Track carrying the freshly resolved values. Its `id` and
    /// `audio_file_id` identify the rows to update.
    pub track: Track,
    pub audio_metadata_id: Uuid,
    pub size_bytes: i64,
    pub modified_at: DateTime<Utc>,
}

/// A file removed by the deletion pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletedTrack {
    pub path: String,
    pub track: Option<Track>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenameOutcome {
    Renamed(Track),
    NotFound,
    TargetExists,
}

/// Queries and targeted writes used by the scanner, indexer and orchestrator.
/// Bulk inserts go through [`EntityStore`](crate::bulk::EntityStore).
#[async_trait]
pub trait LibraryRepository: Send + Sync {
    async fn create_library(&self, library: &MusicLibrary) -> Result<()>;

    async fn get_library(&self, id: LibraryID) -> Result<Option<MusicLibrary>>;

    async fn list_libraries(&self) -> Result<Vec<MusicLibrary>>;

    async fn set_last_scan(&self, id: LibraryID, at: DateTime<Utc>) -> Result<()>;

    async fn known_files(&self, id: LibraryID) -> Result<Vec<KnownFile>>;

    async fn find_track_by_path(&self, path: &str) -> Result<Option<StoredTrack>>;

    async fn update_track(&self, update: &TrackUpdate) -> Result<()>;

    async fn replace_track_artists(&self, track_id: Uuid, artist_ids: &[Uuid]) -> Result<()>;

    /// Replace the keyword links of a track, creating missing keywords.
    async fn replace_track_keywords(&self, track_id: Uuid, keywords: &[String]) -> Result<()>;

    /// Delete audio files and the tracks that own them.
    async fn delete_audio_files(&self, audio_file_ids: &[Uuid]) -> Result<Vec<DeletedTrack>>;

    async fn delete_orphaned_artist_roles(&self) -> Result<u64>;

    async fn delete_orphaned_artists(&self) -> Result<u64>;

    /// Artwork belonging to albums that no longer have any track.
    async fn orphaned_album_artworks(&self) -> Result<Vec<Artwork>>;

    async fn delete_orphaned_albums(&self) -> Result<u64>;

    async fn rename_audio_file(
        &self,
        old_path: &str,
        new_path: &str,
        modified_at: DateTime<Utc>,
    ) -> Result<RenameOutcome>;
}

/// Track waiting for an audio embedding.
#[derive(Debug, Clone)]
pub struct EmbeddingCandidate {
    pub track: Track,
    pub path: String,
}

/// Storage for computed track embeddings.
#[async_trait]
pub trait EmbeddingRepository: Send + Sync {
    async fn store_embedding(&self, track_id: Uuid, embedding: &[f32]) -> Result<()>;

    async fn has_embedding(&self, track_id: Uuid) -> Result<bool>;

    async fn tracks_missing_embeddings(&self, library: LibraryID) -> Result<Vec<EmbeddingCandidate>>;
}

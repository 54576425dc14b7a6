//! In-process implementation of the store ports.
//!
//! Rows are kept per table in insertion order and checked against the
//! registered foreign keys on insert, so ordering mistakes surface the same
//! way they would against Postgres. Used by tests and by embedders that do not
//! need durable storage.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coral_model::{
    Album, Artist, ArtistWithRole, Artwork, AudioFile, Keyword, LibraryID, MusicLibrary, Track,
};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::ports::{
    DeletedTrack, EmbeddingCandidate, EmbeddingRepository, KnownFile, LibraryRepository,
    RenameOutcome, StoredTrack, TrackUpdate,
};
use super::schema::{ALBUM_ARTISTS, TRACK_ARTISTS, TRACK_KEYWORDS};
use crate::bulk::{BulkEntity, EntityKind, EntityStore, JunctionSchema, Row, TableSchema, Value};
use crate::error::{CoralError, Result};

/// One committed insert batch, recorded in commit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertRecord {
    pub table: &'static str,
    /// Rows written, duplicates of existing links excluded.
    pub rows: usize,
}

#[derive(Default)]
struct MemoryState {
    tables: HashMap<EntityKind, Vec<Row>>,
    links: HashMap<&'static str, BTreeSet<(Uuid, Uuid)>>,
    embeddings: HashMap<Uuid, Vec<f32>>,
    insert_log: Vec<InsertRecord>,
}

fn row_id(row: &Row) -> Option<Uuid> {
    row.get(0).and_then(Value::as_uuid)
}

impl MemoryState {
    fn rows(&self, kind: EntityKind) -> &[Row] {
        self.tables.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    fn contains_id(&self, kind: EntityKind, id: Uuid) -> bool {
        self.rows(kind).iter().any(|row| row_id(row) == Some(id))
    }

    fn all<T: BulkEntity>(&self) -> Result<Vec<T>> {
        self.rows(T::KIND).iter().map(T::from_row).collect()
    }

    fn put<T: BulkEntity>(&mut self, entity: &T) {
        let row = entity.to_row();
        let rows = self.tables.entry(T::KIND).or_default();
        match rows.iter_mut().find(|existing| row_id(existing) == Some(entity.id())) {
            Some(existing) => *existing = row,
            None => rows.push(row),
        }
    }

    fn remove_where<T: BulkEntity>(&mut self, predicate: impl Fn(&T) -> bool) -> Result<Vec<T>> {
        let Some(rows) = self.tables.get_mut(&T::KIND) else {
            return Ok(Vec::new());
        };

        let mut kept = Vec::with_capacity(rows.len());
        let mut removed = Vec::new();
        for row in rows.drain(..) {
            let entity = T::from_row(&row)?;
            if predicate(&entity) {
                removed.push(entity);
            } else {
                kept.push(row);
            }
        }
        *rows = kept;
        Ok(removed)
    }

    fn links(&self, junction: &JunctionSchema) -> impl Iterator<Item = &(Uuid, Uuid)> {
        self.links.get(junction.table).into_iter().flatten()
    }

    fn links_mut(&mut self, junction: &JunctionSchema) -> &mut BTreeSet<(Uuid, Uuid)> {
        self.links.entry(junction.table).or_default()
    }

    fn drop_links_for_track(&mut self, track_id: Uuid) {
        self.links_mut(&TRACK_ARTISTS)
            .retain(|(track, _)| *track != track_id);
        self.links_mut(&TRACK_KEYWORDS)
            .retain(|(track, _)| *track != track_id);
        self.embeddings.remove(&track_id);
    }

    fn check_reference(&self, kind: EntityKind, id: Uuid, context: &str) -> Result<()> {
        if self.contains_id(kind, id) {
            Ok(())
        } else {
            Err(CoralError::Database(format!(
                "{context} violates foreign key: {kind} {id} does not exist"
            )))
        }
    }
}

/// Store backed by process memory.
pub struct InMemoryLibraryStore {
    state: Mutex<MemoryState>,
    lookups: AtomicUsize,
}

impl fmt::Debug for InMemoryLibraryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryLibraryStore")
            .field("lookups", &self.lookups.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryLibraryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLibraryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            lookups: AtomicUsize::new(0),
        }
    }

    /// Number of `find_one` lookups served so far.
    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    /// Committed insert batches in commit order.
    pub async fn insert_log(&self) -> Vec<InsertRecord> {
        self.state.lock().await.insert_log.clone()
    }

    /// Forget recorded insert batches.
    pub async fn clear_insert_log(&self) {
        self.state.lock().await.insert_log.clear();
    }

    /// Every stored row of `T`, decoded.
    pub async fn entities<T: BulkEntity>(&self) -> Result<Vec<T>> {
        self.state.lock().await.all::<T>()
    }

    /// Number of stored rows of `kind`.
    pub async fn count(&self, kind: EntityKind) -> usize {
        self.state.lock().await.rows(kind).len()
    }

    /// Stored pairs of `junction`.
    pub async fn link_rows(&self, junction: &JunctionSchema) -> Vec<(Uuid, Uuid)> {
        self.state.lock().await.links(junction).copied().collect()
    }

    fn column_index(table: &TableSchema, column: &str) -> Result<usize> {
        table.column_index(column).ok_or_else(|| {
            CoralError::Configuration(format!("{} has no column {column}", table.table))
        })
    }
}

#[async_trait]
impl EntityStore for InMemoryLibraryStore {
    async fn find_one(
        &self,
        table: &TableSchema,
        predicate: &[(&'static str, Value)],
    ) -> Result<Option<Row>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);

        let columns = predicate
            .iter()
            .map(|(column, value)| Ok((Self::column_index(table, column)?, value)))
            .collect::<Result<Vec<_>>>()?;

        let state = self.state.lock().await;
        let found = state.rows(table.kind).iter().find(|row| {
            columns
                .iter()
                .all(|(index, value)| row.get(*index) == Some(*value))
        });
        Ok(found.cloned())
    }

    async fn insert_batch(&self, table: &TableSchema, rows: &[Row]) -> Result<u64> {
        let mut state = self.state.lock().await;

        let batch_ids: HashSet<Uuid> = rows.iter().filter_map(row_id).collect();
        for row in rows {
            if row.len() != table.columns.len() {
                return Err(CoralError::Database(format!(
                    "insert into {} expected {} columns, got {}",
                    table.table,
                    table.columns.len(),
                    row.len()
                )));
            }

            let id = row_id(row).ok_or_else(|| {
                CoralError::Database(format!("insert into {} without an id", table.table))
            })?;
            if state.contains_id(table.kind, id) {
                return Err(CoralError::Database(format!(
                    "duplicate key {id} in {}",
                    table.table
                )));
            }

            for fk in table.foreign_keys {
                let index = Self::column_index(table, fk.column)?;
                let Some(target) = row.get(index).and_then(Value::as_uuid) else {
                    continue;
                };
                if fk.references == table.kind && batch_ids.contains(&target) {
                    continue;
                }
                state.check_reference(
                    fk.references,
                    target,
                    &format!("insert into {}.{}", table.table, fk.column),
                )?;
            }
        }

        state
            .tables
            .entry(table.kind)
            .or_default()
            .extend(rows.iter().cloned());
        state.insert_log.push(InsertRecord {
            table: table.table,
            rows: rows.len(),
        });
        Ok(rows.len() as u64)
    }

    async fn insert_links(&self, junction: &JunctionSchema, pairs: &[(Uuid, Uuid)]) -> Result<u64> {
        let mut state = self.state.lock().await;
        let context = format!("insert into {}", junction.table);

        for (left, right) in pairs {
            state.check_reference(junction.left, *left, &context)?;
            state.check_reference(junction.right, *right, &context)?;
        }

        let links = state.links_mut(junction);
        let written = pairs.iter().filter(|pair| links.insert(**pair)).count();
        state.insert_log.push(InsertRecord {
            table: junction.table,
            rows: written,
        });
        Ok(written as u64)
    }
}

#[async_trait]
impl LibraryRepository for InMemoryLibraryStore {
    async fn create_library(&self, library: &MusicLibrary) -> Result<()> {
        self.state.lock().await.put(library);
        Ok(())
    }

    async fn get_library(&self, id: LibraryID) -> Result<Option<MusicLibrary>> {
        let state = self.state.lock().await;
        Ok(state
            .all::<MusicLibrary>()?
            .into_iter()
            .find(|library| library.id == id))
    }

    async fn list_libraries(&self) -> Result<Vec<MusicLibrary>> {
        self.state.lock().await.all::<MusicLibrary>()
    }

    async fn set_last_scan(&self, id: LibraryID, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut library = state
            .all::<MusicLibrary>()?
            .into_iter()
            .find(|library| library.id == id)
            .ok_or_else(|| CoralError::NotFound(format!("library {id}")))?;
        library.last_scan = Some(at);
        library.updated_at = Utc::now();
        state.put(&library);
        Ok(())
    }

    async fn known_files(&self, id: LibraryID) -> Result<Vec<KnownFile>> {
        let state = self.state.lock().await;
        Ok(state
            .all::<AudioFile>()?
            .into_iter()
            .filter(|file| file.library_id == id)
            .map(|file| KnownFile {
                audio_file_id: file.id,
                path: file.path,
                modified_at: file.modified_at,
            })
            .collect())
    }

    async fn find_track_by_path(&self, path: &str) -> Result<Option<StoredTrack>> {
        let state = self.state.lock().await;
        let Some(audio_file) = state
            .all::<AudioFile>()?
            .into_iter()
            .find(|file| file.path == path)
        else {
            return Ok(None);
        };
        let Some(track) = state
            .all::<Track>()?
            .into_iter()
            .find(|track| track.audio_file_id == audio_file.id)
        else {
            return Ok(None);
        };

        let mut artist_ids: Vec<Uuid> = state
            .links(&TRACK_ARTISTS)
            .filter(|(track_id, _)| *track_id == track.id)
            .map(|(_, artist)| *artist)
            .collect();
        artist_ids.sort_unstable();

        Ok(Some(StoredTrack {
            track,
            audio_file,
            artist_ids,
        }))
    }

    async fn update_track(&self, update: &TrackUpdate) -> Result<()> {
        let mut state = self.state.lock().await;
        let track = &update.track;

        state.check_reference(EntityKind::Album, track.album_id, "update tracks.album_id")?;
        if let Some(genre_id) = track.genre_id {
            state.check_reference(EntityKind::Genre, genre_id, "update tracks.genre_id")?;
        }
        state.check_reference(
            EntityKind::AudioMetadata,
            update.audio_metadata_id,
            "update audio_files.audio_metadata_id",
        )?;

        let mut stored = state
            .all::<Track>()?
            .into_iter()
            .find(|existing| existing.id == track.id)
            .ok_or_else(|| CoralError::NotFound(format!("track {}", track.id)))?;
        let mut file = state
            .all::<AudioFile>()?
            .into_iter()
            .find(|file| file.id == stored.audio_file_id)
            .ok_or_else(|| CoralError::NotFound(format!("audio file {}", stored.audio_file_id)))?;

        let now = Utc::now();
        stored.title = track.title.clone();
        stored.duration_secs = track.duration_secs;
        stored.disc_number = track.disc_number;
        stored.track_number = track.track_number;
        stored.comment = track.comment.clone();
        stored.isrc = track.isrc.clone();
        stored.album_id = track.album_id;
        stored.genre_id = track.genre_id;
        stored.updated_at = now;

        file.size_bytes = update.size_bytes;
        file.modified_at = update.modified_at;
        file.audio_metadata_id = update.audio_metadata_id;
        file.updated_at = now;

        state.put(&stored);
        state.put(&file);
        Ok(())
    }

    async fn replace_track_artists(&self, track_id: Uuid, artist_ids: &[Uuid]) -> Result<()> {
        let mut state = self.state.lock().await;
        for artist in artist_ids {
            state.check_reference(
                EntityKind::ArtistWithRole,
                *artist,
                "insert into track_artists",
            )?;
        }

        let links = state.links_mut(&TRACK_ARTISTS);
        links.retain(|(track, _)| *track != track_id);
        links.extend(artist_ids.iter().map(|artist| (track_id, *artist)));
        Ok(())
    }

    async fn replace_track_keywords(&self, track_id: Uuid, keywords: &[String]) -> Result<()> {
        let mut state = self.state.lock().await;
        let existing = state.all::<Keyword>()?;

        let mut ids = Vec::with_capacity(keywords.len());
        for value in keywords {
            match existing.iter().find(|keyword| &keyword.value == value) {
                Some(keyword) => ids.push(keyword.id),
                None => {
                    let keyword = Keyword::new(value.clone());
                    ids.push(keyword.id);
                    state.put(&keyword);
                }
            }
        }

        let links = state.links_mut(&TRACK_KEYWORDS);
        links.retain(|(track, _)| *track != track_id);
        links.extend(ids.into_iter().map(|keyword| (track_id, keyword)));
        Ok(())
    }

    async fn delete_audio_files(&self, audio_file_ids: &[Uuid]) -> Result<Vec<DeletedTrack>> {
        let mut state = self.state.lock().await;
        let targets: HashSet<Uuid> = audio_file_ids.iter().copied().collect();

        let tracks = state.remove_where::<Track>(|track| targets.contains(&track.audio_file_id))?;
        for track in &tracks {
            state.drop_links_for_track(track.id);
        }

        let files = state.remove_where::<AudioFile>(|file| targets.contains(&file.id))?;
        Ok(files
            .into_iter()
            .map(|file| DeletedTrack {
                track: tracks
                    .iter()
                    .find(|track| track.audio_file_id == file.id)
                    .cloned(),
                path: file.path,
            })
            .collect())
    }

    async fn delete_orphaned_artist_roles(&self) -> Result<u64> {
        let mut state = self.state.lock().await;
        let referenced: HashSet<Uuid> = state
            .links(&TRACK_ARTISTS)
            .map(|(_, artist)| *artist)
            .collect();

        let removed =
            state.remove_where::<ArtistWithRole>(|link| !referenced.contains(&link.id))?;
        let removed_ids: HashSet<Uuid> = removed.iter().map(|link| link.id).collect();
        state
            .links_mut(&ALBUM_ARTISTS)
            .retain(|(_, artist)| !removed_ids.contains(artist));
        Ok(removed.len() as u64)
    }

    async fn delete_orphaned_artists(&self) -> Result<u64> {
        let mut state = self.state.lock().await;
        let referenced: HashSet<Uuid> = state
            .all::<ArtistWithRole>()?
            .into_iter()
            .map(|link| link.artist_id)
            .collect();
        let removed = state.remove_where::<Artist>(|artist| !referenced.contains(&artist.id))?;
        Ok(removed.len() as u64)
    }

    async fn orphaned_album_artworks(&self) -> Result<Vec<Artwork>> {
        let state = self.state.lock().await;
        let with_tracks: HashSet<Uuid> = state
            .all::<Track>()?
            .into_iter()
            .map(|track| track.album_id)
            .collect();
        Ok(state
            .all::<Artwork>()?
            .into_iter()
            .filter(|artwork| !with_tracks.contains(&artwork.album_id))
            .collect())
    }

    async fn delete_orphaned_albums(&self) -> Result<u64> {
        let mut state = self.state.lock().await;
        let with_tracks: HashSet<Uuid> = state
            .all::<Track>()?
            .into_iter()
            .map(|track| track.album_id)
            .collect();

        let removed = state.remove_where::<Album>(|album| !with_tracks.contains(&album.id))?;
        let removed_ids: HashSet<Uuid> = removed.iter().map(|album| album.id).collect();
        state.remove_where::<Artwork>(|artwork| removed_ids.contains(&artwork.album_id))?;
        state
            .links_mut(&ALBUM_ARTISTS)
            .retain(|(album, _)| !removed_ids.contains(album));
        Ok(removed.len() as u64)
    }

    async fn rename_audio_file(
        &self,
        old_path: &str,
        new_path: &str,
        modified_at: DateTime<Utc>,
    ) -> Result<RenameOutcome> {
        let mut state = self.state.lock().await;
        let files = state.all::<AudioFile>()?;

        let Some(mut file) = files.iter().find(|file| file.path == old_path).cloned() else {
            return Ok(RenameOutcome::NotFound);
        };
        if files.iter().any(|other| other.path == new_path && other.id != file.id) {
            return Ok(RenameOutcome::TargetExists);
        }
        let Some(track) = state
            .all::<Track>()?
            .into_iter()
            .find(|track| track.audio_file_id == file.id)
        else {
            return Ok(RenameOutcome::NotFound);
        };

        file.path = new_path.to_string();
        file.modified_at = modified_at;
        file.updated_at = Utc::now();
        state.put(&file);
        Ok(RenameOutcome::Renamed(track))
    }
}

#[async_trait]
impl EmbeddingRepository for InMemoryLibraryStore {
    async fn store_embedding(&self, track_id: Uuid, embedding: &[f32]) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_reference(EntityKind::Track, track_id, "insert into track_embeddings")?;
        state.embeddings.insert(track_id, embedding.to_vec());
        Ok(())
    }

    async fn has_embedding(&self, track_id: Uuid) -> Result<bool> {
        Ok(self.state.lock().await.embeddings.contains_key(&track_id))
    }

    async fn tracks_missing_embeddings(
        &self,
        library: LibraryID,
    ) -> Result<Vec<EmbeddingCandidate>> {
        let state = self.state.lock().await;
        let files: HashMap<Uuid, AudioFile> = state
            .all::<AudioFile>()?
            .into_iter()
            .filter(|file| file.library_id == library)
            .map(|file| (file.id, file))
            .collect();

        Ok(state
            .all::<Track>()?
            .into_iter()
            .filter(|track| !state.embeddings.contains_key(&track.id))
            .filter_map(|track| {
                let path = files.get(&track.audio_file_id)?.path.clone();
                Some(EmbeddingCandidate { track, path })
            })
            .collect())
    }
}

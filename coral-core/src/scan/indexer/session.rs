use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_stream::try_stream;
use chrono::Utc;
use coral_model::{
    Album, AlbumType, Artist, ArtistRole, ArtistWithRole, Artwork, AudioFile, AudioMetadata,
    Genre, MusicLibrary, RecordLabel, Track,
};
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::artists::parse_artists;
use super::{IndexEvent, IndexOperation, IndexerDeps};
use crate::bulk::BulkInsertContext;
use crate::database::TrackUpdate;
use crate::database::schema::{
    ALBUM_BY_IDENTITY, ARTIST_BY_NAME, ARTIST_ROLE_BY_ARTIST, ARTWORK_BY_ALBUM,
    AUDIO_FILE_BY_PATH, AUDIO_METADATA_BY_FORMAT, GENRE_BY_NAME, RECORD_LABEL_BY_NAME,
    TRACK_BY_AUDIO_FILE,
};
use crate::error::{CoralError, Result};
use crate::scan::orchestration::config::IndexerConfig;
use crate::scan::scanner::{DirectoryGroup, ScannedFile, is_image_file, path_key};
use crate::scan::tags::{DecodedTrack, decode_with_retry};
use crate::services::SearchDocument;

/// Rows removed by one orphan cleanup pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OrphanCleanup {
    pub artist_roles: u64,
    pub artists: u64,
    pub albums: u64,
    pub artworks: usize,
}

impl OrphanCleanup {
    fn total(&self) -> u64 {
        self.artist_roles + self.artists + self.albums
    }
}

#[derive(Clone, Debug, Default)]
pub struct FinalizeSummary {
    pub entities_inserted: usize,
    pub relationships_inserted: u64,
    pub artworks_stored: usize,
    pub keyword_documents: usize,
    pub orphans: OrphanCleanup,
}

#[derive(Clone, Debug)]
struct ResolvedArtist {
    artist: Artist,
    link: ArtistWithRole,
}

#[derive(Clone, Debug)]
struct PendingArtwork {
    album: Album,
    source: PathBuf,
}

struct DecodedFile {
    file: ScannedFile,
    tags: DecodedTrack,
}

/// One index job's view of the library: the bulk cache plus work deferred to
/// [`finalize`](IndexingSession::finalize).
pub struct IndexingSession {
    deps: IndexerDeps,
    config: IndexerConfig,
    library: MusicLibrary,
    bulk: BulkInsertContext,
    artwork_albums: HashSet<Uuid>,
    pending_artwork: Vec<PendingArtwork>,
    pending_keywords: Vec<SearchDocument>,
}

impl fmt::Debug for IndexingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexingSession")
            .field("library", &self.library.id)
            .field("bulk", &self.bulk)
            .field("pending_artwork", &self.pending_artwork.len())
            .field("pending_keywords", &self.pending_keywords.len())
            .finish()
    }
}

impl IndexingSession {
    pub(super) fn new(
        deps: IndexerDeps,
        config: IndexerConfig,
        library: MusicLibrary,
        bulk: BulkInsertContext,
    ) -> Self {
        Self {
            deps,
            config,
            library,
            bulk,
            artwork_albums: HashSet::new(),
            pending_artwork: Vec::new(),
            pending_keywords: Vec::new(),
        }
    }

    pub fn library(&self) -> &MusicLibrary {
        &self.library
    }

    /// Index every group the scanner yields.
    ///
    /// Stored files under `scope` (the library root when `None`) that no
    /// longer exist are deleted first. Cancellation is checked between
    /// groups; work already indexed stays in the session and is not rolled
    /// back.
    pub fn index_directory_groups<'a>(
        &'a mut self,
        mut groups: BoxStream<'static, Result<DirectoryGroup>>,
        scope: Option<PathBuf>,
        cancel: CancellationToken,
    ) -> BoxStream<'a, Result<IndexEvent>> {
        let events = try_stream! {
            let scope = scope.unwrap_or_else(|| self.library.path.clone());
            for event in self.delete_missing(&scope).await? {
                yield event;
            }

            while let Some(group) = groups.next().await {
                if cancel.is_cancelled() {
                    info!(library = %self.library.id, "indexing cancelled between directories");
                    break;
                }

                let group = group?;
                for event in self.index_group(group, &cancel).await? {
                    yield event;
                }
            }
        };
        events.boxed()
    }

    /// Flush everything deferred during indexing and stamp the library.
    pub async fn finalize(&mut self, cancel: &CancellationToken) -> Result<FinalizeSummary> {
        if cancel.is_cancelled() {
            return Err(CoralError::Cancelled(format!(
                "finalizing library {} cancelled",
                self.library.id
            )));
        }

        let mut summary = FinalizeSummary {
            artworks_stored: self.store_pending_artwork().await?,
            ..FinalizeSummary::default()
        };

        let stats = self.bulk.save_changes().await?;
        summary.entities_inserted += stats.total_entities();
        summary.relationships_inserted += stats.total_relationships();

        self.artwork_albums.clear();
        self.pending_artwork.clear();

        let documents = std::mem::take(&mut self.pending_keywords);
        summary.keyword_documents = documents.len();
        if !documents.is_empty() {
            self.deps
                .search
                .insert_keywords(&mut self.bulk, &documents)
                .await?;
            let stats = self.bulk.save_changes().await?;
            summary.entities_inserted += stats.total_entities();
            summary.relationships_inserted += stats.total_relationships();
        }
        self.bulk.clear();

        summary.orphans = self.cleanup_orphans().await?;

        self.deps
            .repository
            .set_last_scan(self.library.id, Utc::now())
            .await?;

        info!(
            library = %self.library.id,
            entities = summary.entities_inserted,
            relationships = summary.relationships_inserted,
            artworks = summary.artworks_stored,
            orphans = summary.orphans.total(),
            "finalized indexing"
        );
        Ok(summary)
    }

    async fn delete_missing(&mut self, scope: &Path) -> Result<Vec<IndexEvent>> {
        let known = self.deps.repository.known_files(self.library.id).await?;

        let mut missing = Vec::new();
        for file in known {
            let path = Path::new(&file.path);
            if !path.starts_with(scope) {
                continue;
            }
            if matches!(tokio::fs::try_exists(path).await, Ok(false)) {
                missing.push(file.audio_file_id);
            }
        }

        if missing.is_empty() {
            return Ok(Vec::new());
        }

        let deleted = self.deps.repository.delete_audio_files(&missing).await?;
        info!(
            library = %self.library.id,
            scope = %scope.display(),
            deleted = deleted.len(),
            "removed missing files"
        );
        self.cleanup_orphans().await?;

        Ok(deleted
            .into_iter()
            .map(|deleted| IndexEvent::new(IndexOperation::Delete, deleted.path, deleted.track))
            .collect())
    }

    async fn cleanup_orphans(&self) -> Result<OrphanCleanup> {
        let repository = &self.deps.repository;
        let mut cleanup = OrphanCleanup {
            artist_roles: repository.delete_orphaned_artist_roles().await?,
            artists: repository.delete_orphaned_artists().await?,
            ..OrphanCleanup::default()
        };

        for artwork in repository.orphaned_album_artworks().await? {
            match self.deps.artwork.delete_artwork(&artwork).await {
                Ok(()) => cleanup.artworks += 1,
                Err(err) => {
                    warn!(path = %artwork.path, error = %err, "failed to remove orphaned artwork")
                }
            }
        }
        cleanup.albums = repository.delete_orphaned_albums().await?;

        if cleanup.total() > 0 {
            info!(
                artist_roles = cleanup.artist_roles,
                artists = cleanup.artists,
                albums = cleanup.albums,
                artworks = cleanup.artworks,
                "removed orphaned entities"
            );
        }
        Ok(cleanup)
    }

    async fn index_group(
        &mut self,
        group: DirectoryGroup,
        cancel: &CancellationToken,
    ) -> Result<Vec<IndexEvent>> {
        let mut decoded = Vec::with_capacity(group.files.len());
        for file in group.files {
            let tags = decode_with_retry(
                Arc::clone(&self.deps.decoder),
                &file.path,
                &self.config,
                cancel,
            )
            .await?;
            if let Some(tags) = tags {
                decoded.push(DecodedFile { file, tags });
            }
        }

        if decoded.is_empty() {
            return Ok(Vec::new());
        }

        let folder_is_album = decoded
            .windows(2)
            .all(|pair| pair[0].tags.album == pair[1].tags.album);

        let mut resolved = Vec::with_capacity(decoded.len());
        for file in &decoded {
            let title = track_title(file);
            let parsed = parse_artists(file.tags.artist.as_deref(), &title);
            resolved.push(self.resolve_artists(parsed).await?);
        }

        let mut events = Vec::with_capacity(decoded.len());
        if folder_is_album {
            debug!(path = %group.directory.display(), "indexing directory as album");

            let mut album_artists: Vec<ResolvedArtist> = Vec::new();
            for artist in resolved.iter().flatten() {
                if !album_artists.iter().any(|known| known.link.id == artist.link.id) {
                    album_artists.push(artist.clone());
                }
            }
            let album_type =
                AlbumType::classify(distinct_main_artists(&album_artists), decoded.len());
            let album = self
                .resolve_album(&decoded[0], &group.directory, album_type, &album_artists)
                .await?;

            for (file, artists) in decoded.iter().zip(&resolved) {
                let genre = self.resolve_genre(&file.tags).await?;
                events.push(self.index_file(file, artists, &album, genre).await?);
            }
        } else {
            debug!(path = %group.directory.display(), "indexing directory as single files");

            for (file, artists) in decoded.iter().zip(&resolved) {
                let album_type = AlbumType::classify(distinct_main_artists(artists), 1);
                let album = self
                    .resolve_album(file, &group.directory, album_type, artists)
                    .await?;
                let genre = self.resolve_genre(&file.tags).await?;
                events.push(self.index_file(file, artists, &album, genre).await?);
            }
        }

        debug!(
            path = %group.directory.display(),
            files = events.len(),
            "indexed directory"
        );
        Ok(events)
    }

    async fn resolve_artists(
        &mut self,
        parsed: Vec<super::ParsedArtist>,
    ) -> Result<Vec<ResolvedArtist>> {
        let mut resolved = Vec::with_capacity(parsed.len());
        for parsed in parsed {
            let artist = self
                .bulk
                .get_or_add(&ARTIST_BY_NAME, || Artist::new(parsed.name))
                .await?;
            let link = self
                .bulk
                .get_or_add(&ARTIST_ROLE_BY_ARTIST, || {
                    ArtistWithRole::new(artist.id, parsed.role)
                })
                .await?;
            resolved.push(ResolvedArtist { artist, link });
        }
        Ok(resolved)
    }

    async fn resolve_genre(&mut self, tags: &DecodedTrack) -> Result<Option<Genre>> {
        let Some(name) = tags.genre.as_deref() else {
            return Ok(None);
        };
        let genre = self
            .bulk
            .get_or_add(&GENRE_BY_NAME, || Genre::new(name))
            .await?;
        Ok(Some(genre))
    }

    async fn resolve_album(
        &mut self,
        file: &DecodedFile,
        directory: &Path,
        album_type: AlbumType,
        artists: &[ResolvedArtist],
    ) -> Result<Album> {
        let tags = &file.tags;
        let name = tags.album.clone().unwrap_or_else(|| {
            directory
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| directory.display().to_string())
        });

        let label_id = match tags.label.as_deref() {
            Some(label) => Some(
                self.bulk
                    .get_or_add(&RECORD_LABEL_BY_NAME, || RecordLabel::new(label))
                    .await?
                    .id,
            ),
            None => None,
        };

        let album = self
            .bulk
            .get_or_add(&ALBUM_BY_IDENTITY, || {
                let mut album = Album::new(name);
                album.release_year = tags.year;
                album.disc_total = tags.disc_total;
                album.track_total = tags.track_total;
                album.album_type = Some(album_type);
                album.catalog_number = tags.catalog_number.clone();
                album.label_id = label_id;
                album
            })
            .await?;

        for artist in artists {
            self.bulk.register_relationship(&album, &artist.link)?;
        }
        Ok(album)
    }

    async fn index_file(
        &mut self,
        file: &DecodedFile,
        artists: &[ResolvedArtist],
        album: &Album,
        genre: Option<Genre>,
    ) -> Result<IndexEvent> {
        let path = path_key(&file.file.path);
        let tags = &file.tags;

        let metadata = self
            .bulk
            .get_or_add(&AUDIO_METADATA_BY_FORMAT, || {
                let mut metadata = AudioMetadata::new(tags.codec.clone());
                metadata.bitrate = tags.bitrate;
                metadata.sample_rate = tags.sample_rate;
                metadata.bit_depth = tags.bit_depth;
                metadata.channels = tags.channels;
                metadata
            })
            .await?;

        let mut related: Vec<String> = artists.iter().map(|a| a.artist.name.clone()).collect();
        related.push(album.name.clone());
        if let Some(genre) = &genre {
            related.push(genre.name.clone());
        }
        if let Some(label) = &tags.label {
            related.push(label.clone());
        }

        let mut artist_ids: Vec<Uuid> = artists.iter().map(|artist| artist.link.id).collect();
        artist_ids.sort_unstable();
        artist_ids.dedup();

        let Some(stored) = self.deps.repository.find_track_by_path(&path).await? else {
            self.queue_artwork(album, &file.file.path).await;

            let library_id = self.library.id;
            let audio_file = self
                .bulk
                .get_or_add(&AUDIO_FILE_BY_PATH, || {
                    AudioFile::new(
                        library_id,
                        metadata.id,
                        path.clone(),
                        file.file.size_bytes,
                        file.file.modified_at,
                    )
                })
                .await?;

            let track = self
                .bulk
                .get_or_add(&TRACK_BY_AUDIO_FILE, || {
                    let mut track = Track::new(track_title(file), album.id, audio_file.id);
                    apply_tags(&mut track, tags);
                    track.genre_id = genre.as_ref().map(|genre| genre.id);
                    track
                })
                .await?;

            for artist in artists {
                self.bulk.register_relationship(&track, &artist.link)?;
            }

            self.pending_keywords
                .push(SearchDocument::new(&track, related.iter().map(String::as_str)));
            debug!(path = %file.file.path.display(), "created track");
            return Ok(IndexEvent::new(IndexOperation::Create, &file.file.path, Some(track)));
        };

        let genre_id = genre.as_ref().map(|genre| genre.id);
        let artists_changed = stored.artist_ids != artist_ids;
        let references_changed = artists_changed
            || stored.track.album_id != album.id
            || stored.track.genre_id != genre_id
            || self.bulk.is_new(&metadata);

        if references_changed {
            self.bulk.save_changes().await?;
        }

        let mut track = stored.track;
        track.title = track_title(file);
        apply_tags(&mut track, tags);
        track.album_id = album.id;
        track.genre_id = genre_id;
        track.updated_at = Utc::now();

        self.deps
            .repository
            .update_track(&TrackUpdate {
                track: track.clone(),
                audio_metadata_id: metadata.id,
                size_bytes: file.file.size_bytes,
                modified_at: file.file.modified_at,
            })
            .await?;

        if artists_changed {
            self.deps
                .repository
                .replace_track_artists(track.id, &artist_ids)
                .await?;
            debug!(path = %file.file.path.display(), "track artists changed");
        }

        self.deps
            .search
            .replace_keywords(&SearchDocument::new(
                &track,
                related.iter().map(String::as_str),
            ))
            .await?;

        debug!(path = %file.file.path.display(), "updated track");
        Ok(IndexEvent::new(IndexOperation::Update, &file.file.path, Some(track)))
    }

    /// Remember where the album's cover comes from, once per album: the first
    /// image next to the file, else a picture embedded in the file itself.
    async fn queue_artwork(&mut self, album: &Album, audio_file: &Path) {
        if !self.artwork_albums.insert(album.id) {
            return;
        }

        let source = match first_image_in(audio_file.parent()).await {
            Some(image) => Some(image),
            None => match self.deps.artwork.extract_embedded_artwork(audio_file).await {
                Ok(extracted) => extracted,
                Err(err) => {
                    warn!(path = %audio_file.display(), error = %err, "artwork extraction failed");
                    None
                }
            },
        };

        if let Some(source) = source {
            self.pending_artwork.push(PendingArtwork {
                album: album.clone(),
                source,
            });
        }
    }

    async fn store_pending_artwork(&mut self) -> Result<usize> {
        let pending = std::mem::take(&mut self.pending_artwork);
        let mut stored = 0;

        for PendingArtwork { album, source } in pending {
            let target = match self.deps.artwork.process_artwork(album.id, &source).await {
                Ok(target) => path_key(&target),
                Err(err) => {
                    warn!(
                        album = %album.name,
                        source = %source.display(),
                        error = %err,
                        "failed to store album artwork"
                    );
                    continue;
                }
            };

            let artwork = self
                .bulk
                .get_or_add(&ARTWORK_BY_ALBUM, || Artwork::new(album.id, target.clone()))
                .await?;

            if self.bulk.is_new(&artwork) {
                stored += 1;
            } else if artwork.path != target
                && let Err(err) = self
                    .deps
                    .artwork
                    .delete_artwork(&Artwork::new(album.id, target))
                    .await
            {
                debug!(album = %album.name, error = %err, "failed to drop duplicate artwork");
            }
        }

        Ok(stored)
    }
}

fn track_title(file: &DecodedFile) -> String {
    file.tags.title.clone().unwrap_or_else(|| {
        file.file
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    })
}

fn apply_tags(track: &mut Track, tags: &DecodedTrack) {
    track.duration_secs = tags.duration_secs;
    track.disc_number = tags.disc_number;
    track.track_number = tags.track_number;
    track.comment = tags.comment.clone();
    track.isrc = tags.isrc.clone();
}

fn distinct_main_artists(artists: &[ResolvedArtist]) -> usize {
    artists
        .iter()
        .filter(|artist| artist.link.role == ArtistRole::Main)
        .map(|artist| artist.artist.id)
        .collect::<BTreeSet<_>>()
        .len()
}

async fn first_image_in(directory: Option<&Path>) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(directory?).await.ok()?;
    let mut images = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if is_image_file(&path) {
            images.push(path);
        }
    }
    images.sort();
    images.into_iter().next()
}

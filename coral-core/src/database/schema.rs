//! Table descriptors, row mappings and dedup keys for the music library
//! schema. Column order here must match `migrations/0001_library.sql`.

use std::path::PathBuf;

use coral_model::{
    Album, AlbumType, Artist, ArtistRole, ArtistWithRole, Artwork, AudioFile, AudioMetadata,
    Genre, Keyword, LibraryID, MusicLibrary, RecordLabel, Track,
};
use uuid::Uuid;

use crate::bulk::{
    BulkEntity, Column, EntityKind, ForeignKey, JunctionSchema, KeySelector, Row, SchemaRegistry,
    TableSchema, Value,
};
use crate::error::Result;

const LIBRARY_COLUMNS: &[Column] = &[
    Column::uuid("id"),
    Column::text("library_path"),
    Column::timestamp("last_scan"),
    Column::timestamp("created_at"),
    Column::timestamp("updated_at"),
];

const NAMED_COLUMNS: &[Column] = &[
    Column::uuid("id"),
    Column::text("name"),
    Column::timestamp("created_at"),
    Column::timestamp("updated_at"),
];

const ARTIST_ROLE_COLUMNS: &[Column] = &[
    Column::uuid("id"),
    Column::uuid("artist_id"),
    Column::int("role"),
    Column::timestamp("created_at"),
    Column::timestamp("updated_at"),
];

const ALBUM_COLUMNS: &[Column] = &[
    Column::uuid("id"),
    Column::text("name"),
    Column::int("release_year"),
    Column::int("disc_total"),
    Column::int("track_total"),
    Column::int("album_type"),
    Column::text("catalog_number"),
    Column::uuid("label_id"),
    Column::timestamp("created_at"),
    Column::timestamp("updated_at"),
];

const ARTWORK_COLUMNS: &[Column] = &[
    Column::uuid("id"),
    Column::uuid("album_id"),
    Column::text("path"),
    Column::timestamp("created_at"),
    Column::timestamp("updated_at"),
];

const AUDIO_METADATA_COLUMNS: &[Column] = &[
    Column::uuid("id"),
    Column::text("codec"),
    Column::int("bitrate"),
    Column::int("sample_rate"),
    Column::int("bit_depth"),
    Column::int("channels"),
    Column::timestamp("created_at"),
    Column::timestamp("updated_at"),
];

const AUDIO_FILE_COLUMNS: &[Column] = &[
    Column::uuid("id"),
    Column::uuid("library_id"),
    Column::uuid("audio_metadata_id"),
    Column::text("path"),
    Column::int("size_bytes"),
    Column::timestamp("modified_at"),
    Column::timestamp("created_at"),
    Column::timestamp("updated_at"),
];

const TRACK_COLUMNS: &[Column] = &[
    Column::uuid("id"),
    Column::text("title"),
    Column::int("duration_secs"),
    Column::int("disc_number"),
    Column::int("track_number"),
    Column::text("comment"),
    Column::text("isrc"),
    Column::uuid("album_id"),
    Column::uuid("genre_id"),
    Column::uuid("audio_file_id"),
    Column::timestamp("created_at"),
    Column::timestamp("updated_at"),
];

const KEYWORD_COLUMNS: &[Column] = &[
    Column::uuid("id"),
    Column::text("value"),
    Column::timestamp("created_at"),
    Column::timestamp("updated_at"),
];

/// `music_libraries`.
pub const LIBRARIES: TableSchema = TableSchema {
    kind: EntityKind::Library,
    table: "music_libraries",
    columns: LIBRARY_COLUMNS,
    foreign_keys: &[],
};

/// `artists`, unique by name.
pub const ARTISTS: TableSchema = TableSchema {
    kind: EntityKind::Artist,
    table: "artists",
    columns: NAMED_COLUMNS,
    foreign_keys: &[],
};

/// `artists_with_roles`, one row per artist and role.
pub const ARTISTS_WITH_ROLES: TableSchema = TableSchema {
    kind: EntityKind::ArtistWithRole,
    table: "artists_with_roles",
    columns: ARTIST_ROLE_COLUMNS,
    foreign_keys: &[ForeignKey {
        column: "artist_id",
        references: EntityKind::Artist,
    }],
};

/// `record_labels`.
pub const RECORD_LABELS: TableSchema = TableSchema {
    kind: EntityKind::RecordLabel,
    table: "record_labels",
    columns: NAMED_COLUMNS,
    foreign_keys: &[],
};

/// `albums`.
pub const ALBUMS: TableSchema = TableSchema {
    kind: EntityKind::Album,
    table: "albums",
    columns: ALBUM_COLUMNS,
    foreign_keys: &[ForeignKey {
        column: "label_id",
        references: EntityKind::RecordLabel,
    }],
};

/// `artworks`, at most one per album.
pub const ARTWORKS: TableSchema = TableSchema {
    kind: EntityKind::Artwork,
    table: "artworks",
    columns: ARTWORK_COLUMNS,
    foreign_keys: &[ForeignKey {
        column: "album_id",
        references: EntityKind::Album,
    }],
};

/// `genres`.
pub const GENRES: TableSchema = TableSchema {
    kind: EntityKind::Genre,
    table: "genres",
    columns: NAMED_COLUMNS,
    foreign_keys: &[],
};

/// `audio_metadata`, shared by files of the same format.
pub const AUDIO_METADATA: TableSchema = TableSchema {
    kind: EntityKind::AudioMetadata,
    table: "audio_metadata",
    columns: AUDIO_METADATA_COLUMNS,
    foreign_keys: &[],
};

/// `audio_files`.
pub const AUDIO_FILES: TableSchema = TableSchema {
    kind: EntityKind::AudioFile,
    table: "audio_files",
    columns: AUDIO_FILE_COLUMNS,
    foreign_keys: &[
        ForeignKey {
            column: "library_id",
            references: EntityKind::Library,
        },
        ForeignKey {
            column: "audio_metadata_id",
            references: EntityKind::AudioMetadata,
        },
    ],
};

/// `tracks`, one per audio file.
pub const TRACKS: TableSchema = TableSchema {
    kind: EntityKind::Track,
    table: "tracks",
    columns: TRACK_COLUMNS,
    foreign_keys: &[
        ForeignKey {
            column: "album_id",
            references: EntityKind::Album,
        },
        ForeignKey {
            column: "genre_id",
            references: EntityKind::Genre,
        },
        ForeignKey {
            column: "audio_file_id",
            references: EntityKind::AudioFile,
        },
    ],
};

/// `keywords`.
pub const KEYWORDS: TableSchema = TableSchema {
    kind: EntityKind::Keyword,
    table: "keywords",
    columns: KEYWORD_COLUMNS,
    foreign_keys: &[],
};

/// Credited artists of a track.
pub const TRACK_ARTISTS: JunctionSchema = JunctionSchema {
    left: EntityKind::Track,
    right: EntityKind::ArtistWithRole,
    table: "track_artists",
    left_column: "track_id",
    right_column: "artist_with_role_id",
};

/// Every artist credited anywhere on an album.
pub const ALBUM_ARTISTS: JunctionSchema = JunctionSchema {
    left: EntityKind::Album,
    right: EntityKind::ArtistWithRole,
    table: "album_artists",
    left_column: "album_id",
    right_column: "artist_with_role_id",
};

/// Search keywords of a track.
pub const TRACK_KEYWORDS: JunctionSchema = JunctionSchema {
    left: EntityKind::Track,
    right: EntityKind::Keyword,
    table: "track_keywords",
    left_column: "track_id",
    right_column: "keyword_id",
};

/// Registry describing every table written by the indexing pipeline.
pub fn library_schema() -> SchemaRegistry {
    SchemaRegistry::new()
        .with_table(LIBRARIES)
        .with_table(ARTISTS)
        .with_table(ARTISTS_WITH_ROLES)
        .with_table(RECORD_LABELS)
        .with_table(ALBUMS)
        .with_table(ARTWORKS)
        .with_table(GENRES)
        .with_table(AUDIO_METADATA)
        .with_table(AUDIO_FILES)
        .with_table(TRACKS)
        .with_table(KEYWORDS)
        .with_junction(TRACK_ARTISTS)
        .with_junction(ALBUM_ARTISTS)
        .with_junction(TRACK_KEYWORDS)
}

/// Case-sensitive exact name.
pub const ARTIST_BY_NAME: KeySelector<Artist> =
    KeySelector::new("artist_name", &["name"], |artist| vec![artist.name.clone().into()]);

/// Artist and role.
pub const ARTIST_ROLE_BY_ARTIST: KeySelector<ArtistWithRole> = KeySelector::new(
    "artist_role",
    &["artist_id", "role"],
    |link| vec![link.artist_id.into(), link.role.as_i64().into()],
);

/// Genre name.
pub const GENRE_BY_NAME: KeySelector<Genre> =
    KeySelector::new("genre_name", &["name"], |genre| vec![genre.name.clone().into()]);

/// Label name.
pub const RECORD_LABEL_BY_NAME: KeySelector<RecordLabel> =
    KeySelector::new("label_name", &["name"], |label| vec![label.name.clone().into()]);

/// Name, release year, disc total and track total.
pub const ALBUM_BY_IDENTITY: KeySelector<Album> = KeySelector::new(
    "album_identity",
    &["name", "release_year", "disc_total", "track_total"],
    |album| {
        vec![
            album.name.clone().into(),
            album.release_year.into(),
            album.disc_total.into(),
            album.track_total.into(),
        ]
    },
);

/// Owning album.
pub const ARTWORK_BY_ALBUM: KeySelector<Artwork> =
    KeySelector::new("artwork_album", &["album_id"], |artwork| vec![artwork.album_id.into()]);

/// Codec, bitrate and sample rate.
pub const AUDIO_METADATA_BY_FORMAT: KeySelector<AudioMetadata> = KeySelector::new(
    "audio_format",
    &["codec", "bitrate", "sample_rate"],
    |meta| {
        vec![
            meta.codec.clone().into(),
            meta.bitrate.into(),
            meta.sample_rate.into(),
        ]
    },
);

/// Absolute file path.
pub const AUDIO_FILE_BY_PATH: KeySelector<AudioFile> =
    KeySelector::new("audio_file_path", &["path"], |file| vec![file.path.clone().into()]);

/// Backing audio file.
pub const TRACK_BY_AUDIO_FILE: KeySelector<Track> = KeySelector::new(
    "track_audio_file",
    &["audio_file_id"],
    |track| vec![track.audio_file_id.into()],
);

/// Keyword text.
pub const KEYWORD_BY_VALUE: KeySelector<Keyword> =
    KeySelector::new("keyword_value", &["value"], |keyword| vec![keyword.value.clone().into()]);

impl BulkEntity for MusicLibrary {
    const KIND: EntityKind = EntityKind::Library;

    fn id(&self) -> Uuid {
        self.id.to_uuid()
    }

    fn to_row(&self) -> Row {
        Row::new(vec![
            self.id.into(),
            self.path.to_string_lossy().into_owned().into(),
            self.last_scan.into(),
            self.created_at.into(),
            self.updated_at.into(),
        ])
    }

    fn from_row(row: &Row) -> Result<Self> {
        let mut r = row.reader();
        Ok(Self {
            id: LibraryID(r.uuid()?),
            path: PathBuf::from(r.text()?),
            last_scan: r.opt_timestamp()?,
            created_at: r.timestamp()?,
            updated_at: r.timestamp()?,
        })
    }
}

impl BulkEntity for Artist {
    const KIND: EntityKind = EntityKind::Artist;

    fn id(&self) -> Uuid {
        self.id
    }

    fn to_row(&self) -> Row {
        Row::new(vec![
            self.id.into(),
            self.name.clone().into(),
            self.created_at.into(),
            self.updated_at.into(),
        ])
    }

    fn from_row(row: &Row) -> Result<Self> {
        let mut r = row.reader();
        Ok(Self {
            id: r.uuid()?,
            name: r.text()?,
            created_at: r.timestamp()?,
            updated_at: r.timestamp()?,
        })
    }
}

impl BulkEntity for ArtistWithRole {
    const KIND: EntityKind = EntityKind::ArtistWithRole;

    fn id(&self) -> Uuid {
        self.id
    }

    fn to_row(&self) -> Row {
        Row::new(vec![
            self.id.into(),
            self.artist_id.into(),
            self.role.as_i64().into(),
            self.created_at.into(),
            self.updated_at.into(),
        ])
    }

    fn from_row(row: &Row) -> Result<Self> {
        let mut r = row.reader();
        Ok(Self {
            id: r.uuid()?,
            artist_id: r.uuid()?,
            role: ArtistRole::try_from(r.int()?)?,
            created_at: r.timestamp()?,
            updated_at: r.timestamp()?,
        })
    }
}

impl BulkEntity for RecordLabel {
    const KIND: EntityKind = EntityKind::RecordLabel;

    fn id(&self) -> Uuid {
        self.id
    }

    fn to_row(&self) -> Row {
        Row::new(vec![
            self.id.into(),
            self.name.clone().into(),
            self.created_at.into(),
            self.updated_at.into(),
        ])
    }

    fn from_row(row: &Row) -> Result<Self> {
        let mut r = row.reader();
        Ok(Self {
            id: r.uuid()?,
            name: r.text()?,
            created_at: r.timestamp()?,
            updated_at: r.timestamp()?,
        })
    }
}

impl BulkEntity for Album {
    const KIND: EntityKind = EntityKind::Album;

    fn id(&self) -> Uuid {
        self.id
    }

    fn to_row(&self) -> Row {
        Row::new(vec![
            self.id.into(),
            self.name.clone().into(),
            self.release_year.into(),
            self.disc_total.into(),
            self.track_total.into(),
            self.album_type.map(AlbumType::as_i64).into(),
            self.catalog_number.clone().into(),
            self.label_id.into(),
            self.created_at.into(),
            self.updated_at.into(),
        ])
    }

    fn from_row(row: &Row) -> Result<Self> {
        let mut r = row.reader();
        Ok(Self {
            id: r.uuid()?,
            name: r.text()?,
            release_year: r.opt_i32()?,
            disc_total: r.opt_i32()?,
            track_total: r.opt_i32()?,
            album_type: r.opt_int()?.map(AlbumType::try_from).transpose()?,
            catalog_number: r.opt_text()?,
            label_id: r.opt_uuid()?,
            created_at: r.timestamp()?,
            updated_at: r.timestamp()?,
        })
    }
}

impl BulkEntity for Artwork {
    const KIND: EntityKind = EntityKind::Artwork;

    fn id(&self) -> Uuid {
        self.id
    }

    fn to_row(&self) -> Row {
        Row::new(vec![
            self.id.into(),
            self.album_id.into(),
            self.path.clone().into(),
            self.created_at.into(),
            self.updated_at.into(),
        ])
    }

    fn from_row(row: &Row) -> Result<Self> {
        let mut r = row.reader();
        Ok(Self {
            id: r.uuid()?,
            album_id: r.uuid()?,
            path: r.text()?,
            created_at: r.timestamp()?,
            updated_at: r.timestamp()?,
        })
    }
}

impl BulkEntity for Genre {
    const KIND: EntityKind = EntityKind::Genre;

    fn id(&self) -> Uuid {
        self.id
    }

    fn to_row(&self) -> Row {
        Row::new(vec![
            self.id.into(),
            self.name.clone().into(),
            self.created_at.into(),
            self.updated_at.into(),
        ])
    }

    fn from_row(row: &Row) -> Result<Self> {
        let mut r = row.reader();
        Ok(Self {
            id: r.uuid()?,
            name: r.text()?,
            created_at: r.timestamp()?,
            updated_at: r.timestamp()?,
        })
    }
}

impl BulkEntity for AudioMetadata {
    const KIND: EntityKind = EntityKind::AudioMetadata;

    fn id(&self) -> Uuid {
        self.id
    }

    fn to_row(&self) -> Row {
        Row::new(vec![
            self.id.into(),
            self.codec.clone().into(),
            self.bitrate.into(),
            self.sample_rate.into(),
            self.bit_depth.into(),
            self.channels.into(),
            self.created_at.into(),
            self.updated_at.into(),
        ])
    }

    fn from_row(row: &Row) -> Result<Self> {
        let mut r = row.reader();
        Ok(Self {
            id: r.uuid()?,
            codec: r.text()?,
            bitrate: r.opt_i32()?,
            sample_rate: r.opt_i32()?,
            bit_depth: r.opt_i32()?,
            channels: r.opt_i32()?,
            created_at: r.timestamp()?,
            updated_at: r.timestamp()?,
        })
    }
}

impl BulkEntity for AudioFile {
    const KIND: EntityKind = EntityKind::AudioFile;

    fn id(&self) -> Uuid {
        self.id
    }

    fn to_row(&self) -> Row {
        Row::new(vec![
            self.id.into(),
            self.library_id.into(),
            self.audio_metadata_id.into(),
            self.path.clone().into(),
            self.size_bytes.into(),
            self.modified_at.into(),
            self.created_at.into(),
            self.updated_at.into(),
        ])
    }

    fn from_row(row: &Row) -> Result<Self> {
        let mut r = row.reader();
        Ok(Self {
            id: r.uuid()?,
            library_id: LibraryID(r.uuid()?),
            audio_metadata_id: r.uuid()?,
            path: r.text()?,
            size_bytes: r.int()?,
            modified_at: r.timestamp()?,
            created_at: r.timestamp()?,
            updated_at: r.timestamp()?,
        })
    }
}

impl BulkEntity for Track {
    const KIND: EntityKind = EntityKind::Track;

    fn id(&self) -> Uuid {
        self.id
    }

    fn to_row(&self) -> Row {
        Row::new(vec![
            self.id.into(),
            self.title.clone().into(),
            self.duration_secs.into(),
            self.disc_number.into(),
            self.track_number.into(),
            self.comment.clone().into(),
            self.isrc.clone().into(),
            self.album_id.into(),
            self.genre_id.into(),
            self.audio_file_id.into(),
            self.created_at.into(),
            self.updated_at.into(),
        ])
    }

    fn from_row(row: &Row) -> Result<Self> {
        let mut r = row.reader();
        Ok(Self {
            id: r.uuid()?,
            title: r.text()?,
            duration_secs: r.i32()?,
            disc_number: r.opt_i32()?,
            track_number: r.opt_i32()?,
            comment: r.opt_text()?,
            isrc: r.opt_text()?,
            album_id: r.uuid()?,
            genre_id: r.opt_uuid()?,
            audio_file_id: r.uuid()?,
            created_at: r.timestamp()?,
            updated_at: r.timestamp()?,
        })
    }
}

impl BulkEntity for Keyword {
    const KIND: EntityKind = EntityKind::Keyword;

    fn id(&self) -> Uuid {
        self.id
    }

    fn to_row(&self) -> Row {
        Row::new(vec![
            self.id.into(),
            self.value.clone().into(),
            self.created_at.into(),
            self.updated_at.into(),
        ])
    }

    fn from_row(row: &Row) -> Result<Self> {
        let mut r = row.reader();
        Ok(Self {
            id: r.uuid()?,
            value: r.text()?,
            created_at: r.timestamp()?,
            updated_at: r.timestamp()?,
        })
    }
}

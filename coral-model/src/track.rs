use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::ids::{LibraryID, new_entity_id};

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Track {
    pub id: Uuid,
    pub title: String,
    pub duration_secs: i32,
    pub disc_number: Option<i32>,
    pub track_number: Option<i32>,
    pub comment: Option<String>,
    pub isrc: Option<String>,
    pub album_id: Uuid,
    pub genre_id: Option<Uuid>,
    pub audio_file_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Track {
    pub fn new(title: impl Into<String>, album_id: Uuid, audio_file_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: new_entity_id(),
            title: title.into(),
            duration_secs: 0,
            disc_number: None,
            track_number: None,
            comment: None,
            isrc: None,
            album_id,
            genre_id: None,
            audio_file_id,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Physical file backing a [`Track`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AudioFile {
    pub id: Uuid,
    pub library_id: LibraryID,
    pub audio_metadata_id: Uuid,
    pub path: String,
    pub size_bytes: i64,
    /// Filesystem modification time, truncated to microseconds.
    pub modified_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AudioFile {
    pub fn new(
        library_id: LibraryID,
        audio_metadata_id: Uuid,
        path: impl Into<String>,
        size_bytes: i64,
        modified_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_entity_id(),
            library_id,
            audio_metadata_id,
            path: path.into(),
            size_bytes,
            modified_at,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Stream properties shared by every file with the same codec, bitrate and
/// sample rate.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AudioMetadata {
    pub id: Uuid,
    pub codec: String,
    pub bitrate: Option<i32>,
    pub sample_rate: Option<i32>,
    pub bit_depth: Option<i32>,
    pub channels: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AudioMetadata {
    pub fn new(codec: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_entity_id(),
            codec: codec.into(),
            bitrate: None,
            sample_rate: None,
            bit_depth: None,
            channels: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Genre {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Genre {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_entity_id(),
            name: name.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Lower-cased search token linked many-to-many with tracks.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Keyword {
    pub id: Uuid,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Keyword {
    pub fn new(value: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_entity_id(),
            value: value.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

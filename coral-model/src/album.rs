use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{ModelError, Result};
use crate::ids::new_entity_id;

/// Release format derived from track count and main artist count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AlbumType {
    Single,
    EP,
    MiniAlbum,
    Album,
    Compilation,
}

impl AlbumType {
    /// Classify a release. Four or more distinct main artists always make a
    /// compilation; otherwise the track count decides.
    pub fn classify(distinct_main_artists: usize, track_count: usize) -> Self {
        if distinct_main_artists >= 4 {
            return AlbumType::Compilation;
        }

        match track_count {
            0..=2 => AlbumType::Single,
            3..=4 => AlbumType::EP,
            5..=9 => AlbumType::MiniAlbum,
            _ => AlbumType::Album,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            AlbumType::Single => 0,
            AlbumType::EP => 1,
            AlbumType::MiniAlbum => 2,
            AlbumType::Album => 3,
            AlbumType::Compilation => 4,
        }
    }
}

impl TryFrom<i64> for AlbumType {
    type Error = ModelError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(AlbumType::Single),
            1 => Ok(AlbumType::EP),
            2 => Ok(AlbumType::MiniAlbum),
            3 => Ok(AlbumType::Album),
            4 => Ok(AlbumType::Compilation),
            other => Err(ModelError::InvalidValue {
                field: "album_type",
                value: other,
            }),
        }
    }
}

/// An album is identified by `(name, release_year, disc_total, track_total)`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Album {
    pub id: Uuid,
    pub name: String,
    pub release_year: Option<i32>,
    pub disc_total: Option<i32>,
    pub track_total: Option<i32>,
    pub album_type: Option<AlbumType>,
    pub catalog_number: Option<String>,
    pub label_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Album {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_entity_id(),
            name: name.into(),
            release_year: None,
            disc_total: None,
            track_total: None,
            album_type: None,
            catalog_number: None,
            label_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RecordLabel {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecordLabel {
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

/// Cover art stored on disk for an album.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Artwork {
    pub id: Uuid,
    pub album_id: Uuid,
    pub path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Artwork {
    pub fn new(album_id: Uuid, path: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_entity_id(),
            album_id,
            path: path.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AlbumType;

    #[test]
    fn classifies_by_track_count() {
        assert_eq!(AlbumType::classify(1, 1), AlbumType::Single);
        assert_eq!(AlbumType::classify(1, 2), AlbumType::Single);
        assert_eq!(AlbumType::classify(1, 3), AlbumType::EP);
        assert_eq!(AlbumType::classify(2, 4), AlbumType::EP);
        assert_eq!(AlbumType::classify(3, 5), AlbumType::MiniAlbum);
        assert_eq!(AlbumType::classify(1, 9), AlbumType::MiniAlbum);
        assert_eq!(AlbumType::classify(1, 10), AlbumType::Album);
    }

    #[test]
    fn four_main_artists_make_a_compilation_at_any_length() {
        assert_eq!(AlbumType::classify(4, 1), AlbumType::Compilation);
        assert_eq!(AlbumType::classify(4, 4), AlbumType::Compilation);
        assert_eq!(AlbumType::classify(7, 20), AlbumType::Compilation);
    }

    #[test]
    fn round_trips_storage_value() {
        for kind in [
            AlbumType::Single,
            AlbumType::EP,
            AlbumType::MiniAlbum,
            AlbumType::Album,
            AlbumType::Compilation,
        ] {
            assert_eq!(AlbumType::try_from(kind.as_i64()).unwrap(), kind);
        }
        assert!(AlbumType::try_from(9).is_err());
    }
}

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{ModelError, Result};
use crate::ids::new_entity_id;

/// Name used when a file carries no usable artist tag.
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Artist {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Artist {
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

/// How an artist participates in a track or album.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ArtistRole {
    Main,
    Guest,
    Remixer,
}

impl ArtistRole {
    pub fn as_i64(self) -> i64 {
        match self {
            ArtistRole::Main => 0,
            ArtistRole::Guest => 1,
            ArtistRole::Remixer => 2,
        }
    }
}

impl TryFrom<i64> for ArtistRole {
    type Error = ModelError;

    fn try_from(value: i64) -> Result<Self> {
        match value {
            0 => Ok(ArtistRole::Main),
            1 => Ok(ArtistRole::Guest),
            2 => Ok(ArtistRole::Remixer),
            other => Err(ModelError::InvalidValue {
                field: "artist_role",
                value: other,
            }),
        }
    }
}

impl fmt::Display for ArtistRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ArtistRole::Main => "main",
            ArtistRole::Guest => "guest",
            ArtistRole::Remixer => "remixer",
        };
        f.write_str(label)
    }
}

/// An artist in a specific role. Tracks and albums link to these rows rather
/// than to [`Artist`] directly, so a single artist can appear as main artist
/// on one track and remixer on another.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ArtistWithRole {
    pub id: Uuid,
    pub artist_id: Uuid,
    pub role: ArtistRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ArtistWithRole {
    pub fn new(artist_id: Uuid, role: ArtistRole) -> Self {
        let now = Utc::now();
        Self {
            id: new_entity_id(),
            artist_id,
            role,
            created_at: now,
            updated_at: now,
        }
    }
}

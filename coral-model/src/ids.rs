use std::str::FromStr;

use uuid::Uuid;

use crate::error::ModelError;

/// Strongly typed ID for music libraries
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LibraryID(pub Uuid);

impl Default for LibraryID {
    fn default() -> Self {
        Self::new()
    }
}

impl LibraryID {
    pub fn new() -> Self {
        LibraryID(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn to_uuid(&self) -> Uuid {
        self.0
    }
}

impl AsRef<Uuid> for LibraryID {
    fn as_ref(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for LibraryID {
    fn from(value: Uuid) -> Self {
        LibraryID(value)
    }
}

impl FromStr for LibraryID {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(LibraryID)
            .map_err(|_| ModelError::InvalidId(s.to_string()))
    }
}

impl std::fmt::Display for LibraryID {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation identifier attached to a scan request and every progress
/// update, embedding job and log line it produces.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RequestId(pub Uuid);

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestId {
    pub fn new() -> Self {
        RequestId(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fresh time-ordered identifier for a persisted entity.
pub fn new_entity_id() -> Uuid {
    Uuid::now_v7()
}

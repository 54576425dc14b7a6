//! Persisted entities of the Coral music library, shared between the indexing
//! pipeline and its consumers.

/// Albums, genres, labels and artwork.
pub mod album;
/// Artists and credit roles.
pub mod artist;
/// Parse errors.
pub mod error;
/// Typed identifiers.
pub mod ids;
/// Library roots.
pub mod library;
/// Tracks, audio files and keywords.
pub mod track;

pub use album::{Album, AlbumType, Artwork, RecordLabel};
pub use artist::{Artist, ArtistRole, ArtistWithRole, UNKNOWN_ARTIST};
pub use error::{ModelError, Result as ModelResult};
pub use ids::{LibraryID, RequestId, new_entity_id};
pub use library::MusicLibrary;
pub use track::{AudioFile, AudioMetadata, Genre, Keyword, Track};

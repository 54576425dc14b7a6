//! Storage schema, repository ports and their adapters.

pub mod memory;
/// Repository traits.
pub mod ports;
/// sqlx-backed store.
pub mod postgres;
pub mod schema;

pub use memory::{InMemoryLibraryStore, InsertRecord};
pub use ports::{
    DeletedTrack, EmbeddingCandidate, EmbeddingRepository, KnownFile, LibraryRepository,
    RenameOutcome, StoredTrack, TrackUpdate,
};
pub use postgres::PostgresLibraryStore;
pub use schema::library_schema;

//! Collaborators the indexer delegates to: artwork storage and search keywords.

/// Album artwork files.
pub mod artwork;
/// Search keywords.
pub mod search;

pub use artwork::{ArtworkService, FsArtworkService};
pub use search::{KeywordSearchService, SearchDocument, SearchService, keywords};

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use coral_model::{Keyword, Track};

use crate::bulk::BulkInsertContext;
use crate::database::LibraryRepository;
use crate::database::schema::KEYWORD_BY_VALUE;
use crate::error::Result;

/// Searchable text assembled for one track.
#[derive(Clone, Debug)]
pub struct SearchDocument {
    pub track: Track,
    pub text: String,
}

impl SearchDocument {
    /// Join the track title with related names (artists, album, genre, label).
    pub fn new<'a>(track: &Track, related: impl IntoIterator<Item = &'a str>) -> Self {
        let mut text = track.title.clone();
        for part in related {
            text.push(' ');
            text.push_str(part);
        }
        Self {
            track: track.clone(),
            text,
        }
    }
}

/// Lowercase alphanumeric tokens of `text`, first occurrence order.
pub fn keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .filter(|token| seen.insert(token.clone()))
        .collect()
}

#[async_trait]
pub trait SearchService: Send + Sync {
    /// Register keywords of freshly created tracks. The tracks must have been
    /// resolved through `bulk`; links are written by the next save.
    async fn insert_keywords(
        &self,
        bulk: &mut BulkInsertContext,
        documents: &[SearchDocument],
    ) -> Result<()>;

    /// Rebuild the keywords of one existing track right away.
    async fn replace_keywords(&self, document: &SearchDocument) -> Result<()>;
}

/// [`SearchService`] splitting track text into lowercase keywords.
pub struct KeywordSearchService {
    repository: Arc<dyn LibraryRepository>,
}

impl fmt::Debug for KeywordSearchService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeywordSearchService").finish_non_exhaustive()
    }
}

impl KeywordSearchService {
    /// Service writing single-track keywords through `repository`.
    pub fn new(repository: Arc<dyn LibraryRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl SearchService for KeywordSearchService {
    async fn insert_keywords(
        &self,
        bulk: &mut BulkInsertContext,
        documents: &[SearchDocument],
    ) -> Result<()> {
        for document in documents {
            for value in keywords(&document.text) {
                let keyword = bulk
                    .get_or_add(&KEYWORD_BY_VALUE, || Keyword::new(value))
                    .await?;
                bulk.register_relationship(&document.track, &keyword)?;
            }
        }
        Ok(())
    }

    async fn replace_keywords(&self, document: &SearchDocument) -> Result<()> {
        self.repository
            .replace_track_keywords(document.track.id, &keywords(&document.text))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenises_to_distinct_lowercase_words() {
        assert_eq!(
            keywords("Song (feat. B) - Song & Album!"),
            vec!["song", "feat", "b", "album"]
        );
        assert!(keywords(" -- ").is_empty());
    }
}

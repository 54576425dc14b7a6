//! Audio tag decoding with retry on transient read failures.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use lofty::error::ErrorKind;
use lofty::picture::MimeType;
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, Tag};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::orchestration::config::IndexerConfig;
use crate::error::{CoralError, Result};

/// Metadata read from one audio file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodedTrack {
    pub title: Option<String>,
    /// Raw artist string as tagged, before featuring/remixer parsing.
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub disc_number: Option<i32>,
    pub disc_total: Option<i32>,
    pub track_number: Option<i32>,
    pub track_total: Option<i32>,
    pub duration_secs: i32,
    pub isrc: Option<String>,
    pub label: Option<String>,
    pub catalog_number: Option<String>,
    pub comment: Option<String>,
    pub codec: String,
    pub bitrate: Option<i32>,
    pub sample_rate: Option<i32>,
    pub bit_depth: Option<i32>,
    pub channels: Option<i32>,
}

/// Picture embedded in an audio file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmbeddedPicture {
    pub data: Vec<u8>,
    pub extension: &'static str,
}

#[derive(Debug, Error)]
pub enum TagError {
    /// The file could not be read right now (locked, still being copied).
    #[error("transient read failure for {path}: {reason}")]
    Transient { path: PathBuf, reason: String },

    /// The file was read but its container or tags are unusable.
    #[error("unreadable tags in {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
}

/// Synchronous tag reader. Callers run it on the blocking pool.
pub trait TagDecoder: Send + Sync + 'static {
    fn decode(&self, path: &Path) -> std::result::Result<DecodedTrack, TagError>;

    fn embedded_picture(
        &self,
        path: &Path,
    ) -> std::result::Result<Option<EmbeddedPicture>, TagError>;
}

/// [`TagDecoder`] backed by `lofty`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoftyTagDecoder;

fn lofty_error(path: &Path, err: lofty::error::LoftyError) -> TagError {
    match err.kind() {
        ErrorKind::Io(_) => TagError::Transient {
            path: path.to_path_buf(),
            reason: err.to_string(),
        },
        _ => TagError::Unreadable {
            path: path.to_path_buf(),
            reason: err.to_string(),
        },
    }
}

fn non_blank(value: Option<std::borrow::Cow<'_, str>>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn item(tag: &Tag, key: &ItemKey) -> Option<String> {
    tag.get_string(key)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn small(value: Option<u32>) -> Option<i32> {
    value.and_then(|value| i32::try_from(value).ok())
}

impl TagDecoder for LoftyTagDecoder {
    fn decode(&self, path: &Path) -> std::result::Result<DecodedTrack, TagError> {
        let tagged = Probe::open(path)
            .map_err(|err| lofty_error(path, err))?
            .read()
            .map_err(|err| lofty_error(path, err))?;

        let properties = tagged.properties();
        let mut decoded = DecodedTrack {
            duration_secs: i32::try_from(properties.duration().as_secs()).unwrap_or(i32::MAX),
            codec: format!("{:?}", tagged.file_type()).to_uppercase(),
            bitrate: small(properties.audio_bitrate()),
            sample_rate: small(properties.sample_rate()),
            bit_depth: properties.bit_depth().map(i32::from),
            channels: properties.channels().map(i32::from),
            ..DecodedTrack::default()
        };

        if let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) {
            decoded.title = non_blank(tag.title());
            decoded.artist = non_blank(tag.artist());
            decoded.album = non_blank(tag.album());
            decoded.genre = non_blank(tag.genre());
            decoded.comment = non_blank(tag.comment());
            decoded.year = small(tag.year());
            decoded.track_number = small(tag.track());
            decoded.track_total = small(tag.track_total());
            decoded.disc_number = small(tag.disk());
            decoded.disc_total = small(tag.disk_total());
            decoded.isrc = item(tag, &ItemKey::Isrc);
            decoded.label = item(tag, &ItemKey::Label);
            decoded.catalog_number = item(tag, &ItemKey::CatalogNumber);
        }

        Ok(decoded)
    }

    fn embedded_picture(
        &self,
        path: &Path,
    ) -> std::result::Result<Option<EmbeddedPicture>, TagError> {
        let tagged = Probe::open(path)
            .map_err(|err| lofty_error(path, err))?
            .read()
            .map_err(|err| lofty_error(path, err))?;

        let picture = tagged
            .tags()
            .iter()
            .flat_map(|tag| tag.pictures())
            .find(|picture| !picture.data().is_empty());

        Ok(picture.map(|picture| EmbeddedPicture {
            data: picture.data().to_vec(),
            extension: match picture.mime_type() {
                Some(MimeType::Png) => "png",
                _ => "jpg",
            },
        }))
    }
}

/// Decode `path`, retrying transient failures with a linearly growing delay.
///
/// Returns `Ok(None)` for files that are skipped: unreadable tags, or a
/// transient failure that outlived every attempt. Cancellation between
/// attempts is reported as [`CoralError::Cancelled`].
pub async fn decode_with_retry(
    decoder: Arc<dyn TagDecoder>,
    path: &Path,
    config: &IndexerConfig,
    cancel: &CancellationToken,
) -> Result<Option<DecodedTrack>> {
    let max_attempts = config.max_decode_attempts.max(1);

    for attempt in 1..=max_attempts {
        let task_decoder = Arc::clone(&decoder);
        let task_path = path.to_path_buf();
        let outcome = tokio::task::spawn_blocking(move || task_decoder.decode(&task_path))
            .await
            .map_err(|err| CoralError::Internal(format!("tag decode task failed: {err}")))?;

        match outcome {
            Ok(decoded) => return Ok(Some(decoded)),
            Err(err @ TagError::Unreadable { .. }) => {
                warn!(path = %path.display(), error = %err, "skipping file with unreadable tags");
                return Ok(None);
            }
            Err(err @ TagError::Transient { .. }) => {
                if attempt == max_attempts {
                    warn!(
                        path = %path.display(),
                        attempts = attempt,
                        error = %err,
                        "giving up on file after repeated read failures"
                    );
                    return Ok(None);
                }

                let delay = config.decode_retry_base() * attempt;
                debug!(path = %path.display(), attempt, ?delay, "retrying tag decode");
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(CoralError::Cancelled(format!(
                            "decoding {} cancelled",
                            path.display()
                        )));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyDecoder {
        failures: u32,
        calls: AtomicU32,
    }

    impl TagDecoder for FlakyDecoder {
        fn decode(&self, path: &Path) -> std::result::Result<DecodedTrack, TagError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(TagError::Transient {
                    path: path.to_path_buf(),
                    reason: "locked".into(),
                });
            }
            Ok(DecodedTrack {
                title: Some("ok".into()),
                ..DecodedTrack::default()
            })
        }

        fn embedded_picture(
            &self,
            _path: &Path,
        ) -> std::result::Result<Option<EmbeddedPicture>, TagError> {
            Ok(None)
        }
    }

    fn config(attempts: u32) -> IndexerConfig {
        IndexerConfig {
            max_decode_attempts: attempts,
            decode_retry_base_ms: 100,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let decoder = Arc::new(FlakyDecoder {
            failures: 3,
            calls: AtomicU32::new(0),
        });
        let decoded = decode_with_retry(
            decoder.clone(),
            Path::new("/music/a.flac"),
            &config(10),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(decoded.unwrap().title.as_deref(), Some("ok"));
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let decoder = Arc::new(FlakyDecoder {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let decoded = decode_with_retry(
            decoder.clone(),
            Path::new("/music/a.flac"),
            &config(3),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(decoded.is_none());
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_retries() {
        let decoder = Arc::new(FlakyDecoder {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result =
            decode_with_retry(decoder, Path::new("/music/a.flac"), &config(10), &cancel).await;
        assert!(matches!(result, Err(CoralError::Cancelled(_))));
    }
}

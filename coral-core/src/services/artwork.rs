use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use coral_model::Artwork;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CoralError, Result};
use crate::scan::tags::TagDecoder;

/// Album artwork storage.
#[async_trait]
pub trait ArtworkService: Send + Sync {
    /// Write the first picture embedded in `audio_file` to a staging
    /// location. `None` when the file carries no picture.
    async fn extract_embedded_artwork(&self, audio_file: &Path) -> Result<Option<PathBuf>>;

    /// Store `source` as the artwork of `album_id` and return the stored path.
    async fn process_artwork(&self, album_id: Uuid, source: &Path) -> Result<PathBuf>;

    /// Remove the stored file of an artwork row that is being dropped.
    async fn delete_artwork(&self, artwork: &Artwork) -> Result<()>;
}

/// Keeps artwork as plain files below one directory.
pub struct FsArtworkService {
    artwork_dir: PathBuf,
    decoder: Arc<dyn TagDecoder>,
}

impl fmt::Debug for FsArtworkService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsArtworkService")
            .field("artwork_dir", &self.artwork_dir)
            .finish_non_exhaustive()
    }
}

fn encode_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    let digest = hasher.finalize();
    URL_SAFE_NO_PAD.encode(&digest[..16])
}

impl FsArtworkService {
    /// Store artwork files under `artwork_dir`.
    pub fn new(artwork_dir: impl Into<PathBuf>, decoder: Arc<dyn TagDecoder>) -> Self {
        Self {
            artwork_dir: artwork_dir.into(),
            decoder,
        }
    }

    fn staging_dir(&self) -> PathBuf {
        self.artwork_dir.join("staging")
    }
}

#[async_trait]
impl ArtworkService for FsArtworkService {
    async fn extract_embedded_artwork(&self, audio_file: &Path) -> Result<Option<PathBuf>> {
        let decoder = Arc::clone(&self.decoder);
        let source = audio_file.to_path_buf();
        let picture = tokio::task::spawn_blocking(move || decoder.embedded_picture(&source))
            .await
            .map_err(|err| CoralError::Internal(format!("artwork extraction task failed: {err}")))?;

        let picture = match picture {
            Ok(Some(picture)) => picture,
            Ok(None) => return Ok(None),
            Err(err) => {
                debug!(path = %audio_file.display(), error = %err, "no embedded artwork");
                return Ok(None);
            }
        };

        let staging = self.staging_dir();
        tokio::fs::create_dir_all(&staging).await?;
        let name = encode_hash(&["embedded", &audio_file.to_string_lossy()]);
        let staged = staging.join(format!("{name}.{}", picture.extension));
        tokio::fs::write(&staged, &picture.data).await?;
        Ok(Some(staged))
    }

    async fn process_artwork(&self, album_id: Uuid, source: &Path) -> Result<PathBuf> {
        let extension = source
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| "jpg".to_string());

        tokio::fs::create_dir_all(&self.artwork_dir).await?;
        let target = self.artwork_dir.join(format!(
            "{}.{extension}",
            encode_hash(&["album", &album_id.to_string()])
        ));
        tokio::fs::copy(source, &target).await?;

        if source.starts_with(self.staging_dir())
            && let Err(err) = tokio::fs::remove_file(source).await
        {
            debug!(path = %source.display(), error = %err, "failed to drop staged artwork");
        }

        Ok(target)
    }

    async fn delete_artwork(&self, artwork: &Artwork) -> Result<()> {
        match tokio::fs::remove_file(&artwork.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                warn!(path = %artwork.path, error = %err, "failed to delete artwork file");
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::tags::{DecodedTrack, EmbeddedPicture, TagError};
    use tempfile::TempDir;

    struct PictureDecoder;

    impl TagDecoder for PictureDecoder {
        fn decode(&self, _path: &Path) -> std::result::Result<DecodedTrack, TagError> {
            Ok(DecodedTrack::default())
        }

        fn embedded_picture(
            &self,
            _path: &Path,
        ) -> std::result::Result<Option<EmbeddedPicture>, TagError> {
            Ok(Some(EmbeddedPicture {
                data: vec![0x89, b'P', b'N', b'G'],
                extension: "png",
            }))
        }
    }

    #[tokio::test]
    async fn embedded_picture_is_staged_then_stored() {
        let temp = TempDir::new().unwrap();
        let service = FsArtworkService::new(temp.path().join("artwork"), Arc::new(PictureDecoder));
        let album_id = Uuid::now_v7();

        let staged = service
            .extract_embedded_artwork(Path::new("/music/a/01.flac"))
            .await
            .unwrap()
            .unwrap();
        assert!(staged.exists());

        let stored = service.process_artwork(album_id, &staged).await.unwrap();
        assert!(stored.exists());
        assert!(!staged.exists());
        assert_eq!(stored.extension().unwrap(), "png");

        let artwork = Artwork::new(album_id, stored.to_string_lossy());
        service.delete_artwork(&artwork).await.unwrap();
        assert!(!stored.exists());
        service.delete_artwork(&artwork).await.unwrap();
    }

    #[tokio::test]
    async fn directory_image_is_copied() {
        let temp = TempDir::new().unwrap();
        let cover = temp.path().join("Cover.JPG");
        std::fs::write(&cover, b"jpeg").unwrap();
        let service = FsArtworkService::new(temp.path().join("artwork"), Arc::new(PictureDecoder));

        let stored = service.process_artwork(Uuid::now_v7(), &cover).await.unwrap();
        assert!(cover.exists());
        assert_eq!(std::fs::read(&stored).unwrap(), b"jpeg");
        assert_eq!(stored.extension().unwrap(), "jpg");
    }
}

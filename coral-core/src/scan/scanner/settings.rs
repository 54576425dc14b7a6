use std::path::Path;

/// Audio formats picked up by the scanner and the filesystem watcher.
pub const AUDIO_FILE_EXTENSIONS: &[&str] = &[
    "flac", "mp3", "mp2", "wav", "m4a", "ogg", "alac", "aif", "opus",
];

/// Cover images looked up next to audio files.
pub const IMAGE_FILE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

fn has_extension(path: &Path, allowed: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| allowed.iter().any(|candidate| ext.eq_ignore_ascii_case(candidate)))
}

pub fn is_audio_file(path: &Path) -> bool {
    has_extension(path, AUDIO_FILE_EXTENSIONS)
}

pub fn is_image_file(path: &Path) -> bool {
    has_extension(path, IMAGE_FILE_EXTENSIONS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_match_ignores_case() {
        assert!(is_audio_file(Path::new("/music/a/01 - Intro.FLAC")));
        assert!(is_audio_file(Path::new("song.opus")));
        assert!(!is_audio_file(Path::new("cover.jpg")));
        assert!(!is_audio_file(Path::new("README")));
        assert!(is_image_file(Path::new("Folder.JPEG")));
    }
}

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::Context;
use tracing::debug;

/// Artwork directory used when `CORAL_ARTWORK_DIR` is unset.
pub const DEFAULT_ARTWORK_DIR: &str = "./data/artwork";

/// Process settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub database_url: String,
    pub artwork_dir: PathBuf,
    /// Library roots registered at startup.
    pub libraries: Vec<PathBuf>,
    /// Base URL of the embedding inference service, if any.
    pub embedding_url: Option<String>,
}

impl Config {
    /// Load `.env` (when present) and read the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => debug!(path = %path.display(), "loaded .env"),
            Err(err) if err.not_found() => {}
            Err(err) => return Err(err).context("failed to load .env"),
        }
        Self::from_lookup(|name| env::var_os(name))
    }

    /// Build from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> anyhow::Result<Self> {
        let text = |name: &str| {
            lookup(name)
                .map(|value| value.to_string_lossy().trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let database_url = text("DATABASE_URL").context("DATABASE_URL must be set")?;
        let artwork_dir = text("CORAL_ARTWORK_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTWORK_DIR));
        let libraries = lookup("CORAL_LIBRARIES")
            .map(|raw| {
                env::split_paths(&raw)
                    .filter(|path| !path.as_os_str().is_empty())
                    .collect()
            })
            .unwrap_or_default();
        let embedding_url = text("CORAL_EMBEDDING_URL");

        Ok(Self {
            database_url,
            artwork_dir,
            libraries,
            embedding_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<OsString> {
        let vars: HashMap<String, OsString> = vars
            .iter()
            .map(|(name, value)| (name.to_string(), OsString::from(value)))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn database_url_is_required() {
        let err = Config::from_lookup(lookup(&[("DATABASE_URL", "  ")])).unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
    }

    #[test]
    fn optional_settings_fall_back() {
        let config =
            Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://localhost/coral")])).unwrap();

        assert_eq!(config.database_url, "postgres://localhost/coral");
        assert_eq!(config.artwork_dir, PathBuf::from(DEFAULT_ARTWORK_DIR));
        assert!(config.libraries.is_empty());
        assert_eq!(config.embedding_url, None);
    }

    #[test]
    fn library_roots_use_the_platform_separator() {
        let roots = env::join_paths(["/music/a", "/music/b"]).unwrap();
        let roots = roots.to_string_lossy().into_owned();
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/coral"),
            ("CORAL_LIBRARIES", roots.as_str()),
            ("CORAL_EMBEDDING_URL", "http://inference:8000"),
        ]))
        .unwrap();

        assert_eq!(
            config.libraries,
            vec![PathBuf::from("/music/a"), PathBuf::from("/music/b")]
        );
        assert_eq!(config.embedding_url.as_deref(), Some("http://inference:8000"));
    }
}

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use coral_core::scan::orchestration::ScanConfig;
use serde::{Deserialize, Serialize};

/// Where the scanner configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ScannerConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// Scanner settings. Every section is optional; missing keys keep their
/// defaults.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Watch debounce, batch sizes, embedding pool, decode retries, queue
    /// capacity and scan schedule.
    pub scan: ScanConfig,
}

impl ScannerConfig {
    /// Load scanner configuration overrides.
    ///
    /// Evaluation order:
    /// 1) `$SCANNER_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$SCANNER_CONFIG_JSON` (inline JSON),
    /// 3) `scanner.toml|json` or `config/scanner.toml|json` in the working
    ///    directory,
    /// 4) defaults.
    pub fn load_from_env() -> anyhow::Result<(Self, ScannerConfigSource)> {
        if let Ok(path) = env::var("SCANNER_CONFIG_PATH")
            && !path.trim().is_empty()
        {
            let path = PathBuf::from(path);
            let config = Self::load_from_file(&path)?;
            return Ok((config, ScannerConfigSource::EnvPath(path)));
        }

        if let Ok(raw) = env::var("SCANNER_CONFIG_JSON")
            && !raw.trim().is_empty()
        {
            let config = Self::parse_json(&raw).context("failed to parse SCANNER_CONFIG_JSON")?;
            return Ok((config, ScannerConfigSource::EnvInline));
        }

        if let Some(path) = Self::find_default_file(Path::new(".")) {
            let config = Self::load_from_file(&path)?;
            return Ok((config, ScannerConfigSource::File(path)));
        }

        Ok((Self::default(), ScannerConfigSource::Default))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read scanner config from {}", path.display()))?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents)
                .with_context(|| format!("invalid scanner config {}", path.display())),
            Some("toml") => toml::from_str(&contents)
                .map_err(|err| anyhow!("invalid scanner config {}: {err}", path.display())),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    /// Parse `contents` as TOML, falling back to JSON.
    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse scanner config {origin}: toml error: {toml_err}; json error: {json_err}"
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).map_err(|err| anyhow!("invalid scanner config json: {err}"))
    }

    fn find_default_file(base: &Path) -> Option<PathBuf> {
        const CANDIDATES: &[&str] = &[
            "scanner.toml",
            "scanner.json",
            "config/scanner.toml",
            "config/scanner.json",
        ];

        CANDIDATES
            .iter()
            .map(|candidate| base.join(candidate))
            .find(|path| path.exists())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn toml_overrides_keep_other_defaults() {
        let config = ScannerConfig::parse_from_str(
            r#"
            [scan.watch]
            debounce_secs = 2

            [scan.schedule]
            interval_minutes = 30
            "#,
            "inline",
        )
        .unwrap();

        assert_eq!(config.scan.watch.debounce(), Duration::from_secs(2));
        assert_eq!(
            config.scan.schedule.interval(),
            Some(Duration::from_secs(1_800))
        );
        assert!(config.scan.schedule.scan_on_startup);
        assert_eq!(config.scan.embedding.max_concurrency, 10);
    }

    #[test]
    fn json_is_accepted_where_toml_fails() {
        let config = ScannerConfig::parse_from_str(
            r#"{ "scan": { "bulk": { "entity_batch_size": 500 } } }"#,
            "inline",
        )
        .unwrap();

        assert_eq!(config.scan.bulk.entity_batch_size, 500);
        assert_eq!(config.scan.bulk.relationship_batch_size, 50_000);
    }

    #[test]
    fn garbage_reports_both_parsers() {
        let err = ScannerConfig::parse_from_str("{{ nope", "inline").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("toml error"));
        assert!(message.contains("json error"));
    }

    #[test]
    fn file_format_follows_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scanner.json");
        fs::write(&path, r#"{ "scan": { "queue": { "scan_queue_capacity": 8 } } }"#).unwrap();

        let config = ScannerConfig::load_from_file(&path).unwrap();
        assert_eq!(config.scan.queue.scan_queue_capacity, 8);

        let broken = dir.path().join("broken.toml");
        fs::write(&broken, "scan = 3").unwrap();
        assert!(ScannerConfig::load_from_file(&broken).is_err());
    }

    #[test]
    fn default_file_lookup_prefers_top_level() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(ScannerConfig::find_default_file(dir.path()), None);

        fs::create_dir(dir.path().join("config")).unwrap();
        fs::write(dir.path().join("config/scanner.json"), "{}").unwrap();
        assert_eq!(
            ScannerConfig::find_default_file(dir.path()),
            Some(dir.path().join("config/scanner.json"))
        );

        fs::write(dir.path().join("scanner.toml"), "").unwrap();
        assert_eq!(
            ScannerConfig::find_default_file(dir.path()),
            Some(dir.path().join("scanner.toml"))
        );
    }
}

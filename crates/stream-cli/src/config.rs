//! Settings file loading.
//!
//! The file is optional; every key has a default. Command-line flags are
//! applied on top of whatever the file provides.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use stream_player::EngineSettings;

use crate::cli::Args;

/// Top-level settings file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub log: Option<String>,
    /// Engine settings.
    pub player: EngineSettings,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<FileConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    /// Load `path` if given, defaults otherwise.
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }
}

/// Overlay command-line flags on `settings`.
pub fn apply_overrides(mut settings: EngineSettings, args: &Args) -> EngineSettings {
    if let Some(db) = args.volume_db {
        settings.volume_db = db;
    }
    if let Some(dir) = &args.save_dir {
        settings.save_dir = Some(dir.clone());
    }
    if let Some(dir) = &args.temp_dir {
        settings.temp_dir = Some(dir.clone());
    }
    if let Some(device) = &args.device {
        settings.device = Some(device.clone());
    }
    if args.unbounded_retries {
        settings.max_retries = None;
    } else if let Some(max) = args.max_retries {
        settings.max_retries = Some(max);
    }
    if let Some(secs) = args.io_timeout_secs {
        settings.io_timeout_secs = secs;
    }
    if let Some(secs) = args.buffer_seconds {
        settings.buffer_seconds = secs;
    }
    if let Some(frames) = args.refill_max_frames {
        settings.refill_max_frames = frames;
    }
    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::PathBuf;

    fn write_config(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("stream-play.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn loads_player_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            &dir,
            r#"
            log = "debug"

            [player]
            volume_db = -4.0
            save_dir = "/srv/radio"
            max_retries = 2
            "#,
        );
        let cfg = FileConfig::load(&path).unwrap();
        assert_eq!(cfg.log.as_deref(), Some("debug"));
        assert_eq!(cfg.player.volume_db, -4.0);
        assert_eq!(cfg.player.save_dir, Some(PathBuf::from("/srv/radio")));
        assert_eq!(cfg.player.max_retries, Some(2));
        assert_eq!(cfg.player.io_timeout_secs, 10);
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = FileConfig::load(&path).unwrap_err();
        assert!(format!("{err:#}").contains("absent.toml"));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(&dir, "[player]\nvolume_db = \"loud\"\n");
        assert!(FileConfig::load(&path).is_err());
    }

    #[test]
    fn flags_override_file_values() {
        let file = EngineSettings {
            volume_db: -4.0,
            max_retries: Some(2),
            ..EngineSettings::default()
        };
        let args = Args::try_parse_from([
            "stream-play",
            "a.mp3",
            "--volume-db",
            "1.5",
            "--unbounded-retries",
            "--io-timeout-secs",
            "3",
        ])
        .unwrap();
        let settings = apply_overrides(file, &args);
        assert_eq!(settings.volume_db, 1.5);
        assert_eq!(settings.max_retries, None);
        assert_eq!(settings.io_timeout_secs, 3);
        assert!(settings.save_dir.is_none());
    }

    #[test]
    fn absent_flags_keep_file_values() {
        let file = EngineSettings {
            volume_db: -4.0,
            device: Some("USB".into()),
            ..EngineSettings::default()
        };
        let args = Args::try_parse_from(["stream-play", "a.mp3"]).unwrap();
        let settings = apply_overrides(file, &args);
        assert_eq!(settings.volume_db, -4.0);
        assert_eq!(settings.device.as_deref(), Some("USB"));
        assert_eq!(settings.max_retries, Some(5));
    }
}

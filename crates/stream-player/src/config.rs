use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Engine settings shared by every stage of a session.
///
/// Loaded from the host's settings file and/or command line; every field has
/// a default so partial TOML documents deserialize cleanly.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// User volume adjustment in dB (added to the track's replay gain).
    pub volume_db: f32,
    /// Root directory for recordings; `None` disables recording.
    pub save_dir: Option<PathBuf>,
    /// Directory for in-progress recordings (defaults to the system temp dir).
    pub temp_dir: Option<PathBuf>,
    /// Inactivity timeout for opening and reading the stream, in seconds.
    pub io_timeout_secs: u64,
    /// Cap on retry-by-reseek cycles per track; `None` retries without limit.
    pub max_retries: Option<u32>,
    /// Output queue depth in seconds.
    pub buffer_seconds: f32,
    /// Max frames pulled per output callback refill.
    pub refill_max_frames: usize,
    /// Max frames per filtered chunk handed to the device.
    pub max_frame_samples: usize,
    /// Output device substring match; `None` uses the host default.
    pub device: Option<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            volume_db: 0.0,
            save_dir: None,
            temp_dir: None,
            io_timeout_secs: 10,
            max_retries: Some(5),
            buffer_seconds: 2.0,
            refill_max_frames: 4096,
            max_frame_samples: 4096,
            device: None,
        }
    }
}

impl EngineSettings {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs.max(1))
    }

    /// Directory used for in-progress recordings.
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = EngineSettings::default();
        assert_eq!(s.io_timeout(), Duration::from_secs(10));
        assert_eq!(s.max_retries, Some(5));
        assert!(s.save_dir.is_none());
        assert_eq!(s.max_frame_samples, 4096);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let s: EngineSettings = toml::from_str(
            r#"
            volume_db = -3.5
            save_dir = "/music/radio"
            "#,
        )
        .unwrap();
        assert_eq!(s.volume_db, -3.5);
        assert_eq!(s.save_dir, Some(PathBuf::from("/music/radio")));
        assert_eq!(s.io_timeout_secs, 10);
        assert_eq!(s.buffer_seconds, 2.0);
    }

    #[test]
    fn zero_timeout_is_clamped() {
        let s = EngineSettings {
            io_timeout_secs: 0,
            ..EngineSettings::default()
        };
        assert_eq!(s.io_timeout(), Duration::from_secs(1));
    }
}

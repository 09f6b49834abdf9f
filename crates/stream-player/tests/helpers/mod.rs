//! Shared fixtures for session tests.

#![allow(dead_code)]

pub mod http;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hound::{WavSpec, WavWriter};
use stream_player::output::CaptureBackend;
use stream_player::recorder::TrackIdentity;
use stream_player::ui::MemorySink;
use stream_player::{EngineSettings, PlayerHandle, PlayerMode, TrackRequest};

pub const RATE: u32 = 8_000;

/// A mono ramp that never repeats within `frames`, so reordering or loss
/// shows up as a mismatch.
pub fn ramp(frames: usize) -> Vec<i16> {
    (0..frames).map(|i| ((i % 30_000) as i16) - 15_000).collect()
}

pub fn write_wav(path: &Path, samples: &[i16]) {
    let spec = WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec).unwrap();
    for s in samples {
        writer.write_sample(*s).unwrap();
    }
    writer.finalize().unwrap();
}

pub fn read_wav(path: &Path) -> Vec<i16> {
    hound::WavReader::open(path)
        .unwrap()
        .samples::<i16>()
        .map(|s| s.unwrap())
        .collect()
}

pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub input: PathBuf,
    pub samples: Vec<i16>,
}

impl Fixture {
    pub fn new(frames: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.wav");
        let samples = ramp(frames);
        write_wav(&input, &samples);
        Self {
            dir,
            input,
            samples,
        }
    }

    pub fn save_dir(&self) -> PathBuf {
        self.dir.path().join("saved")
    }

    pub fn temp_dir(&self) -> PathBuf {
        let p = self.dir.path().join("tmp");
        std::fs::create_dir_all(&p).unwrap();
        p
    }

    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            max_frame_samples: 256,
            io_timeout_secs: 2,
            ..EngineSettings::default()
        }
    }

    pub fn recording_settings(&self) -> EngineSettings {
        EngineSettings {
            save_dir: Some(self.save_dir()),
            temp_dir: Some(self.temp_dir()),
            ..self.settings()
        }
    }

    pub fn track(&self) -> TrackRequest {
        TrackRequest {
            url: self.input.to_string_lossy().into_owned(),
            identity: identity(),
            gain_db: 0.0,
        }
    }

    /// The same track, fetched from `url` instead of the local file.
    pub fn track_at(&self, url: &str) -> TrackRequest {
        TrackRequest {
            url: url.to_string(),
            ..self.track()
        }
    }

    pub fn final_path(&self) -> PathBuf {
        self.save_dir().join("Test FM").join("Artist - Song.wav")
    }

    pub fn temp_path(&self) -> PathBuf {
        self.temp_dir().join("Artist - Song.wav")
    }
}

pub fn identity() -> TrackIdentity {
    TrackIdentity {
        station: "Test FM".into(),
        artist: "Artist".into(),
        title: "Song".into(),
    }
}

pub fn start(
    track: TrackRequest,
    settings: EngineSettings,
    backend: &CaptureBackend,
) -> (PlayerHandle, Arc<MemorySink>) {
    let ui = Arc::new(MemorySink::default());
    let handle = PlayerHandle::start(track, settings, Arc::new(backend.clone()), ui.clone())
        .unwrap();
    (handle, ui)
}

/// Poll `cond` until it holds or `limit` passes.
pub fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

pub fn wait_for_mode(handle: &PlayerHandle, mode: PlayerMode) -> bool {
    wait_until(Duration::from_secs(5), || handle.status().mode == mode)
}

pub fn assert_close(actual: &[i16], expected: &[i16], tolerance: i32) {
    assert_eq!(actual.len(), expected.len(), "sample count");
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (*a as i32 - *e as i32).abs() <= tolerance,
            "sample {i}: got {a}, expected {e}"
        );
    }
}

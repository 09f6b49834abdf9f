//! Control surface for a running session.

use std::sync::Arc;
use std::thread::JoinHandle;

use stream_player_types::{PlayerMode, PlayerReturn, PlayerStatus};

use crate::config::EngineSettings;
use crate::error::PlayerError;
use crate::output::OutputBackend;
use crate::player::Worker;
use crate::session::{SessionShared, TrackRequest};
use crate::ui::MessageSink;

/// Thread-safe handle to one playback session.
///
/// Dropping the handle detaches the worker; call [`PlayerHandle::request_quit`]
/// first to stop it.
pub struct PlayerHandle {
    shared: Arc<SessionShared>,
    join: JoinHandle<PlayerReturn>,
}

impl PlayerHandle {
    /// Spawn the worker thread for `track` and return immediately.
    pub fn start(
        track: TrackRequest,
        settings: EngineSettings,
        backend: Arc<dyn OutputBackend>,
        ui: Arc<dyn MessageSink>,
    ) -> Result<Self, PlayerError> {
        let shared = Arc::new(SessionShared::new(settings.volume_db, track.gain_db));
        tracing::info!(
            url = %track.url,
            station = %track.identity.station,
            title = %track.identity.title,
            gain_db = shared.gain().db(),
            "starting playback"
        );
        let worker = Worker {
            track,
            settings,
            shared: shared.clone(),
            backend,
            ui,
        };
        let join = std::thread::Builder::new()
            .name("stream-player".into())
            .spawn(move || worker.run())?;
        Ok(Self { shared, join })
    }

    pub fn request_pause(&self) {
        tracing::debug!("pause requested");
        self.shared.set_paused(true);
    }

    pub fn request_resume(&self) {
        tracing::debug!("resume requested");
        self.shared.set_paused(false);
    }

    /// Flip pause; returns the new paused state.
    pub fn toggle_pause(&self) -> bool {
        let paused = !self.shared.pause_requested();
        self.shared.set_paused(paused);
        paused
    }

    pub fn is_paused(&self) -> bool {
        self.shared.pause_requested()
    }

    /// Set the user volume in dB. Applies from the next frame.
    pub fn set_volume(&self, db: f32) {
        if !self.shared.set_volume_db(db) {
            tracing::warn!(volume_db = db, "ignoring invalid volume");
        }
    }

    pub fn volume(&self) -> f32 {
        self.shared.volume_db()
    }

    /// Set the track replay gain in dB.
    pub fn set_gain(&self, db: f32) {
        if !self.shared.set_gain_db(db) {
            tracing::warn!(gain_db = db, "ignoring invalid gain");
        }
    }

    pub fn gain(&self) -> f32 {
        self.shared.gain_db()
    }

    /// Ask the worker to stop. Also wakes it if paused.
    pub fn request_quit(&self) {
        tracing::debug!("quit requested");
        self.shared.request_quit();
    }

    pub fn status(&self) -> PlayerStatus {
        self.shared.status()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.mode() == PlayerMode::Finished || self.join.is_finished()
    }

    /// Wait for the worker and return its result code.
    pub fn join(self) -> PlayerReturn {
        self.join.join().unwrap_or_else(|_| {
            tracing::error!("playback worker panicked");
            PlayerReturn::HardFail
        })
    }
}

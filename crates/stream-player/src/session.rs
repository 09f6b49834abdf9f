//! State shared between a playback worker and its controllers.
//!
//! The worker is the only writer of mode, position and duration; controllers
//! only read them. Pause uses one mutex + condvar pair, everything else is a
//! plain atomic.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use stream_player_types::{PlayerMode, PlayerStatus};

use crate::filter::GainControl;
use crate::output::DeviceFlags;
use crate::recorder::TrackIdentity;

/// What to play.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TrackRequest {
    pub url: String,
    #[serde(default)]
    pub identity: TrackIdentity,
    /// Track replay gain in dB, added to the user volume.
    #[serde(default)]
    pub gain_db: f32,
}

impl TrackRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug)]
pub(crate) struct SessionShared {
    mode: AtomicU8,
    flags: DeviceFlags,
    pause: Mutex<bool>,
    pause_cv: Condvar,
    volume_db: AtomicU32,
    gain_db: AtomicU32,
    gain: GainControl,
    position_bits: AtomicU64,
    duration_bits: AtomicU64,
}

impl SessionShared {
    pub(crate) fn new(volume_db: f32, gain_db: f32) -> Self {
        let volume_db = finite_or_zero(volume_db);
        let gain_db = finite_or_zero(gain_db);
        Self {
            mode: AtomicU8::new(PlayerMode::Opening.as_u8()),
            flags: DeviceFlags::default(),
            pause: Mutex::new(false),
            pause_cv: Condvar::new(),
            volume_db: AtomicU32::new(volume_db.to_bits()),
            gain_db: AtomicU32::new(gain_db.to_bits()),
            gain: GainControl::new(volume_db + gain_db),
            position_bits: AtomicU64::new(0f64.to_bits()),
            duration_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    fn pause_lock(&self) -> MutexGuard<'_, bool> {
        self.pause.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn mode(&self) -> PlayerMode {
        PlayerMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    /// Move to `mode` unless the session already finished.
    pub(crate) fn set_mode(&self, mode: PlayerMode) {
        let _ = self
            .mode
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| {
                (PlayerMode::from_u8(cur) != PlayerMode::Finished).then_some(mode.as_u8())
            });
    }

    pub(crate) fn device_flags(&self) -> &DeviceFlags {
        &self.flags
    }

    pub(crate) fn quit_flag(&self) -> Arc<AtomicBool> {
        self.flags.cancel.clone()
    }

    pub(crate) fn is_quit(&self) -> bool {
        self.flags.cancel.load(Ordering::Acquire)
    }

    /// Raise the quit flag and wake a worker blocked in the pause gate.
    pub(crate) fn request_quit(&self) {
        if self.flags.cancel.swap(true, Ordering::AcqRel) {
            return;
        }
        let _g = self.pause_lock();
        self.pause_cv.notify_all();
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        let mut g = self.pause_lock();
        *g = paused;
        self.flags.paused.store(paused, Ordering::Release);
        drop(g);
        if !paused {
            self.pause_cv.notify_all();
        }
    }

    pub(crate) fn pause_requested(&self) -> bool {
        *self.pause_lock()
    }

    /// Block while paused. Returns `false` if quit was requested.
    pub(crate) fn wait_for_resume(&self) -> bool {
        let mut g = self.pause_lock();
        while *g && !self.is_quit() {
            g = match self.pause_cv.wait(g) {
                Ok(g) => g,
                Err(e) => e.into_inner(),
            };
        }
        !self.is_quit()
    }

    pub(crate) fn gain(&self) -> &GainControl {
        &self.gain
    }

    pub(crate) fn set_volume_db(&self, db: f32) -> bool {
        self.update_gain(&self.volume_db, db)
    }

    pub(crate) fn set_gain_db(&self, db: f32) -> bool {
        self.update_gain(&self.gain_db, db)
    }

    fn update_gain(&self, slot: &AtomicU32, db: f32) -> bool {
        if !db.is_finite() {
            return false;
        }
        slot.store(db.to_bits(), Ordering::Relaxed);
        self.gain.set_db(self.volume_db() + self.gain_db())
    }

    pub(crate) fn volume_db(&self) -> f32 {
        f32::from_bits(self.volume_db.load(Ordering::Relaxed))
    }

    pub(crate) fn gain_db(&self) -> f32 {
        f32::from_bits(self.gain_db.load(Ordering::Relaxed))
    }

    pub(crate) fn set_position(&self, seconds: f64) {
        self.position_bits.store(seconds.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn set_duration(&self, seconds: f64) {
        self.duration_bits.store(seconds.to_bits(), Ordering::Relaxed);
    }

    pub(crate) fn status(&self) -> PlayerStatus {
        let mut mode = self.mode();
        if mode == PlayerMode::Playing && self.pause_requested() {
            mode = PlayerMode::Paused;
        }
        PlayerStatus {
            mode,
            position_seconds: f64::from_bits(self.position_bits.load(Ordering::Relaxed)),
            duration_seconds: f64::from_bits(self.duration_bits.load(Ordering::Relaxed)),
        }
    }
}

fn finite_or_zero(db: f32) -> f32 {
    if db.is_finite() { db } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn finished_is_terminal() {
        let s = SessionShared::new(0.0, 0.0);
        s.set_mode(PlayerMode::Playing);
        s.set_mode(PlayerMode::Finished);
        s.set_mode(PlayerMode::Playing);
        assert_eq!(s.mode(), PlayerMode::Finished);
    }

    #[test]
    fn volume_and_gain_are_additive() {
        let s = SessionShared::new(-3.0, -2.0);
        assert_eq!(s.gain().db(), -5.0);
        assert!(s.set_volume_db(1.0));
        assert_eq!(s.gain().db(), -1.0);
        assert!(s.set_gain_db(0.5));
        assert_eq!(s.gain().db(), 1.5);
        assert!(!s.set_volume_db(f32::NAN));
        assert_eq!(s.volume_db(), 1.0);
    }

    #[test]
    fn status_reports_pending_pause_while_playing() {
        let s = SessionShared::new(0.0, 0.0);
        s.set_mode(PlayerMode::Playing);
        s.set_paused(true);
        assert_eq!(s.status().mode, PlayerMode::Paused);
        assert!(s.device_flags().paused.load(Ordering::Relaxed));
        s.set_paused(false);
        assert_eq!(s.status().mode, PlayerMode::Playing);
    }

    #[test]
    fn quit_wakes_paused_waiter() {
        let s = Arc::new(SessionShared::new(0.0, 0.0));
        s.set_paused(true);
        let waiter = s.clone();
        let handle = thread::spawn(move || waiter.wait_for_resume());
        thread::sleep(Duration::from_millis(20));
        s.request_quit();
        assert!(!handle.join().unwrap());
    }

    #[test]
    fn resume_wakes_paused_waiter() {
        let s = Arc::new(SessionShared::new(0.0, 0.0));
        s.set_paused(true);
        let waiter = s.clone();
        let handle = thread::spawn(move || waiter.wait_for_resume());
        thread::sleep(Duration::from_millis(20));
        s.set_paused(false);
        assert!(handle.join().unwrap());
    }
}

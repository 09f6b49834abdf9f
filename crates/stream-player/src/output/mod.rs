//! Output sink: the device the rendered s16 stream is written to.
//!
//! A backend is shared by the host and opens one device per open attempt.
//! Devices live on the playback worker thread and are never moved across
//! threads; pause and cancel reach them through [`DeviceFlags`].

mod callback;
mod capture;
mod cpal_backend;
pub mod device;
mod queue;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

pub use capture::{Capture, CaptureBackend};
pub use cpal_backend::CpalBackend;

use crate::error::PlayerError;

/// The engine's single device format: interleaved signed 16-bit PCM.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl OutputFormat {
    pub const BYTES_PER_SAMPLE: u64 = 2;

    pub fn bytes_per_second(&self) -> u64 {
        self.sample_rate as u64 * self.channels as u64 * Self::BYTES_PER_SAMPLE
    }
}

/// Session flags a device observes.
#[derive(Clone, Debug, Default)]
pub struct DeviceFlags {
    /// Set once by the session on quit; blocked writes return promptly.
    pub cancel: Arc<AtomicBool>,
    /// While `true` the device renders silence and stops consuming data.
    pub paused: Arc<AtomicBool>,
}

/// An open playback device.
pub trait OutputDevice {
    /// Write interleaved samples, blocking until the device accepts them.
    ///
    /// Returns early without error when the session is cancelled.
    fn play(&mut self, samples: &[i16]) -> Result<(), PlayerError>;

    /// Release the device. With `drain` the queued tail is played first.
    /// Safe to call more than once.
    fn close(&mut self, drain: bool);
}

/// Factory for output devices.
pub trait OutputBackend: Send + Sync {
    fn open(
        &self,
        format: &OutputFormat,
        flags: &DeviceFlags,
    ) -> Result<Box<dyn OutputDevice>, PlayerError>;
}

//! In-process output backend.
//!
//! Records everything written to it instead of playing it. Used by the
//! integration tests and by the CLI's `--null-output` mode.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use super::{DeviceFlags, OutputBackend, OutputDevice, OutputFormat};
use crate::error::PlayerError;

const PAUSE_POLL: Duration = Duration::from_millis(5);

/// What a [`CaptureBackend`] has seen so far.
#[derive(Clone, Debug, Default)]
pub struct Capture {
    /// Format of every device opened, in order.
    pub formats: Vec<OutputFormat>,
    /// Every sample written, in write order (empty when discarding).
    pub samples: Vec<i16>,
    pub bytes_written: u64,
    pub writes: usize,
    pub closes: usize,
}

#[derive(Clone, Copy, Debug)]
enum Pacing {
    Unpaced,
    PerWrite(Duration),
    Realtime,
}

#[derive(Clone, Debug)]
pub struct CaptureBackend {
    shared: Arc<Mutex<Capture>>,
    keep_samples: bool,
    pacing: Pacing,
    fail_open: Option<String>,
}

impl Default for CaptureBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(Capture::default())),
            keep_samples: true,
            pacing: Pacing::Unpaced,
            fail_open: None,
        }
    }

    /// Count writes without keeping sample data.
    pub fn discarding() -> Self {
        Self {
            keep_samples: false,
            ..Self::new()
        }
    }

    /// Sleep `delay` after every write.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.pacing = Pacing::PerWrite(delay);
        self
    }

    /// Sleep for the duration of the audio in every write.
    pub fn realtime(mut self) -> Self {
        self.pacing = Pacing::Realtime;
        self
    }

    /// Refuse to open devices, as if the hardware were busy.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            fail_open: Some(reason.into()),
            ..Self::new()
        }
    }

    pub fn snapshot(&self) -> Capture {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Capture> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl OutputBackend for CaptureBackend {
    fn open(
        &self,
        format: &OutputFormat,
        flags: &DeviceFlags,
    ) -> Result<Box<dyn OutputDevice>, PlayerError> {
        if let Some(reason) = &self.fail_open {
            return Err(PlayerError::Device(reason.clone()));
        }
        self.lock().formats.push(*format);
        Ok(Box::new(CaptureDevice {
            backend: self.clone(),
            format: *format,
            flags: flags.clone(),
            open: true,
        }))
    }
}

struct CaptureDevice {
    backend: CaptureBackend,
    format: OutputFormat,
    flags: DeviceFlags,
    open: bool,
}

impl CaptureDevice {
    fn cancelled(&self) -> bool {
        self.flags.cancel.load(Ordering::Relaxed)
    }
}

impl OutputDevice for CaptureDevice {
    fn play(&mut self, samples: &[i16]) -> Result<(), PlayerError> {
        if !self.open {
            return Err(PlayerError::Device("write after close".into()));
        }
        // A paused device stops consuming, so the writer blocks.
        while self.flags.paused.load(Ordering::Relaxed) && !self.cancelled() {
            thread::sleep(PAUSE_POLL);
        }
        if self.cancelled() {
            return Ok(());
        }

        let delay = match self.backend.pacing {
            Pacing::Unpaced => None,
            Pacing::PerWrite(d) => Some(d),
            Pacing::Realtime => {
                let bytes = samples.len() as u64 * OutputFormat::BYTES_PER_SAMPLE;
                let bps = self.format.bytes_per_second().max(1);
                Some(Duration::from_secs_f64(bytes as f64 / bps as f64))
            }
        };
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let mut capture = self.backend.lock();
        capture.writes += 1;
        capture.bytes_written += samples.len() as u64 * OutputFormat::BYTES_PER_SAMPLE;
        if self.backend.keep_samples {
            capture.samples.extend_from_slice(samples);
        }
        Ok(())
    }

    fn close(&mut self, _drain: bool) {
        if std::mem::take(&mut self.open) {
            self.backend.lock().closes += 1;
        }
    }
}

impl Drop for CaptureDevice {
    fn drop(&mut self) {
        self.close(false);
    }
}

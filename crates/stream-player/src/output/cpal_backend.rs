use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Context;
use cpal::traits::{DeviceTrait, StreamTrait};

use super::callback::{CallbackConfig, build_output_stream};
use super::queue::{SampleQueue, calc_max_buffered_samples};
use super::{DeviceFlags, OutputBackend, OutputDevice, OutputFormat, device};
use crate::config::EngineSettings;
use crate::error::PlayerError;

/// Default backend: the host's audio output through cpal.
#[derive(Clone, Debug)]
pub struct CpalBackend {
    device: Option<String>,
    buffer_seconds: f32,
    refill_max_frames: usize,
}

impl CpalBackend {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            device: settings.device.clone(),
            buffer_seconds: settings.buffer_seconds,
            refill_max_frames: settings.refill_max_frames,
        }
    }

    fn open_stream(
        &self,
        format: &OutputFormat,
        flags: &DeviceFlags,
    ) -> anyhow::Result<CpalDevice> {
        let host = cpal::default_host();
        let device = device::pick_device(&host, self.device.as_deref())?;
        let name = device
            .description()
            .map(|d| d.to_string())
            .unwrap_or_else(|_| "unknown".into());
        let config = device::pick_output_config(&device, format.sample_rate, format.channels)
            .with_context(|| format!("device {name}"))?;

        let mut stream_config: cpal::StreamConfig = config.clone().into();
        if let Some(size) = device::pick_buffer_size(&config) {
            stream_config.buffer_size = size;
        }

        let channels = format.channels as usize;
        let queue = Arc::new(SampleQueue::new(
            channels,
            calc_max_buffered_samples(format.sample_rate, channels, self.buffer_seconds),
        ));
        let underruns = Arc::new(AtomicU64::new(0));
        let stream = build_output_stream(
            &device,
            &stream_config,
            config.sample_format(),
            &queue,
            CallbackConfig {
                refill_max_frames: self.refill_max_frames,
                paused: flags.paused.clone(),
                underruns: underruns.clone(),
            },
        )?;
        stream.play()?;

        tracing::info!(
            device = %name,
            rate_hz = format.sample_rate,
            channels = format.channels,
            device_channels = stream_config.channels,
            sample_format = ?config.sample_format(),
            "output device opened"
        );

        Ok(CpalDevice {
            stream: Some(stream),
            queue,
            flags: flags.clone(),
            underruns,
            drain_limit: Duration::from_secs_f32(self.buffer_seconds.clamp(0.1, 30.0) + 1.0),
        })
    }
}

impl OutputBackend for CpalBackend {
    fn open(
        &self,
        format: &OutputFormat,
        flags: &DeviceFlags,
    ) -> Result<Box<dyn OutputDevice>, PlayerError> {
        self.open_stream(format, flags)
            .map(|d| Box::new(d) as Box<dyn OutputDevice>)
            .map_err(|e| PlayerError::Device(format!("{e:#}")))
    }
}

struct CpalDevice {
    stream: Option<cpal::Stream>,
    queue: Arc<SampleQueue>,
    flags: DeviceFlags,
    underruns: Arc<AtomicU64>,
    drain_limit: Duration,
}

impl OutputDevice for CpalDevice {
    fn play(&mut self, samples: &[i16]) -> Result<(), PlayerError> {
        if self.stream.is_none() {
            return Err(PlayerError::Device("write after close".into()));
        }
        self.queue.push_blocking(samples, &self.flags.cancel);
        Ok(())
    }

    fn close(&mut self, drain: bool) {
        let Some(stream) = self.stream.take() else {
            return;
        };
        if drain && !self.queue.wait_drained_or_cancel(&self.flags.cancel, self.drain_limit) {
            tracing::debug!(
                queued_samples = self.queue.len_samples(),
                "output closed before drain"
            );
        }
        self.queue.close();
        drop(stream);
        let underruns = self.underruns.load(Ordering::Relaxed);
        if underruns > 0 {
            tracing::debug!(underruns, "output device closed");
        }
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.close(false);
    }
}

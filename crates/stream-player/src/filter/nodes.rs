//! Concrete pipeline stages.

use symphonia::core::audio::{AudioBufferRef, SampleBuffer};
use symphonia::core::conv::FromSample;

use super::{DecoderFormat, FilterNode, Frame, FrameFormat, SampleEncoding, Samples, advance_ts};
use crate::error::PlayerError;
use crate::filter::gain::GainControl;

/// Entry point: turns decoder buffers into interleaved `f32` frames.
pub(crate) struct SourceNode {
    out: FrameFormat,
}

impl SourceNode {
    pub(crate) fn new(format: DecoderFormat) -> Result<Self, PlayerError> {
        if format.sample_rate == 0 {
            return Err(PlayerError::Filter("source: sample rate is zero".into()));
        }
        let channels = format.channels.map(|c| c.count()).unwrap_or(0);
        if channels == 0 {
            return Err(PlayerError::Filter("source: channel layout is empty".into()));
        }
        if format.time_base.numer == 0 || format.time_base.denom == 0 {
            return Err(PlayerError::Filter("source: invalid time base".into()));
        }
        let channels = u16::try_from(channels)
            .map_err(|_| PlayerError::Filter(format!("source: {channels} channels")))?;
        Ok(Self {
            out: FrameFormat {
                sample_rate: format.sample_rate,
                channels,
                encoding: SampleEncoding::F32,
            },
        })
    }

    pub(crate) fn output(&self) -> FrameFormat {
        self.out
    }

    /// Convert one decoded buffer. Buffers whose layout changed mid-stream
    /// are dropped.
    pub(crate) fn convert(&self, decoded: AudioBufferRef<'_>, pts: u64) -> Option<Frame> {
        let spec = *decoded.spec();
        if spec.rate != self.out.sample_rate || spec.channels.count() != self.out.channels as usize {
            tracing::warn!(
                rate = spec.rate,
                channels = spec.channels.count(),
                "decoded buffer layout changed; dropping frame"
            );
            return None;
        }
        if decoded.frames() == 0 {
            return None;
        }
        let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buf.copy_interleaved_ref(decoded);
        Some(Frame {
            pts,
            samples: Samples::F32(buf.samples().to_vec()),
        })
    }
}

/// Multiplies every sample by the live gain factor.
pub(crate) struct GainNode {
    control: GainControl,
}

impl GainNode {
    pub(crate) fn new(control: GainControl) -> Self {
        Self { control }
    }
}

impl FilterNode for GainNode {
    fn name(&self) -> &'static str {
        "gain"
    }

    fn configure(&mut self, input: FrameFormat) -> Result<FrameFormat, PlayerError> {
        expect_encoding(self.name(), input, SampleEncoding::F32)?;
        Ok(input)
    }

    fn process(&mut self, mut frame: Frame, out: &mut Vec<Frame>) -> Result<(), PlayerError> {
        let factor = self.control.factor();
        if let Samples::F32(samples) = &mut frame.samples {
            if factor != 1.0 {
                for s in samples.iter_mut() {
                    *s *= factor;
                }
            }
        }
        out.push(frame);
        Ok(())
    }
}

/// Converts `f32` to signed 16-bit, saturating at full scale.
pub(crate) struct FormatNode;

impl FilterNode for FormatNode {
    fn name(&self) -> &'static str {
        "format"
    }

    fn configure(&mut self, input: FrameFormat) -> Result<FrameFormat, PlayerError> {
        expect_encoding(self.name(), input, SampleEncoding::F32)?;
        Ok(FrameFormat {
            encoding: SampleEncoding::S16,
            ..input
        })
    }

    fn process(&mut self, frame: Frame, out: &mut Vec<Frame>) -> Result<(), PlayerError> {
        let samples = match frame.samples {
            Samples::F32(v) => Samples::S16(v.into_iter().map(i16::from_sample).collect()),
            s @ Samples::S16(_) => s,
        };
        out.push(Frame {
            pts: frame.pts,
            samples,
        });
        Ok(())
    }
}

/// Re-chunks output into frames of at most `max_frames` sample frames.
pub(crate) struct SinkNode {
    max_frames: usize,
    format: Option<FrameFormat>,
    pending: Vec<i16>,
    pending_pts: u64,
    time_base: symphonia::core::units::TimeBase,
}

impl SinkNode {
    pub(crate) fn new(max_frames: usize, time_base: symphonia::core::units::TimeBase) -> Self {
        Self {
            max_frames: max_frames.max(1),
            format: None,
            pending: Vec::new(),
            pending_pts: 0,
            time_base,
        }
    }

    fn emit(&mut self, samples: Vec<i16>, out: &mut Vec<Frame>) {
        let Some(format) = self.format else { return };
        let frames = samples.len() / format.channels.max(1) as usize;
        out.push(Frame {
            pts: self.pending_pts,
            samples: Samples::S16(samples),
        });
        self.pending_pts = advance_ts(self.pending_pts, frames as u64, format.sample_rate, self.time_base);
    }
}

impl FilterNode for SinkNode {
    fn name(&self) -> &'static str {
        "sink"
    }

    fn configure(&mut self, input: FrameFormat) -> Result<FrameFormat, PlayerError> {
        expect_encoding(self.name(), input, SampleEncoding::S16)?;
        self.format = Some(input);
        Ok(input)
    }

    fn process(&mut self, frame: Frame, out: &mut Vec<Frame>) -> Result<(), PlayerError> {
        let Some(format) = self.format else {
            return Err(PlayerError::Filter("sink: not configured".into()));
        };
        let Samples::S16(samples) = frame.samples else {
            return Err(PlayerError::Filter("sink: expected s16 samples".into()));
        };
        if self.pending.is_empty() {
            self.pending_pts = frame.pts;
        }
        self.pending.extend_from_slice(&samples);

        let chunk = self.max_frames * format.channels as usize;
        while self.pending.len() >= chunk {
            let rest = self.pending.split_off(chunk);
            let full = std::mem::replace(&mut self.pending, rest);
            self.emit(full, out);
        }
        Ok(())
    }

    fn flush(&mut self, out: &mut Vec<Frame>) -> Result<(), PlayerError> {
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.emit(tail, out);
        }
        Ok(())
    }
}

fn expect_encoding(
    node: &str,
    input: FrameFormat,
    want: SampleEncoding,
) -> Result<(), PlayerError> {
    if input.encoding == want {
        Ok(())
    } else {
        Err(PlayerError::Filter(format!(
            "{node}: cannot link {:?} input (expects {:?})",
            input.encoding, want
        )))
    }
}

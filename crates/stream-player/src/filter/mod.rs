//! Filter pipeline: decoder buffers → gain → s16 → device-sized chunks.
//!
//! The graph is fixed and linear. It is built once per open attempt against
//! the decoder's parameters; gain changes flow through a shared
//! [`GainControl`] so they never require a rebuild.

mod gain;
mod nodes;

pub use gain::{GainControl, db_to_factor};

use symphonia::core::audio::{AudioBufferRef, Channels};
use symphonia::core::sample::SampleFormat;
use symphonia::core::units::TimeBase;

use crate::error::PlayerError;
use crate::output::OutputFormat;
use nodes::{FormatNode, GainNode, SinkNode, SourceNode};

/// Decoder-side parameters the source node is built against.
#[derive(Clone, Copy, Debug)]
pub struct DecoderFormat {
    pub time_base: TimeBase,
    pub sample_rate: u32,
    pub channels: Option<Channels>,
    pub sample_format: Option<SampleFormat>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleEncoding {
    F32,
    S16,
}

/// Format flowing across one link of the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub encoding: SampleEncoding,
}

/// Interleaved samples in one of the supported encodings.
#[derive(Clone, Debug, PartialEq)]
pub enum Samples {
    F32(Vec<f32>),
    S16(Vec<i16>),
}

/// A block of interleaved samples tagged with its stream timestamp.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub pts: u64,
    pub samples: Samples,
}

/// One block of rendered output, ready for the device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PcmChunk {
    pub pts: u64,
    pub samples: Vec<i16>,
}

/// A processing stage between the source and the device.
pub trait FilterNode: Send {
    fn name(&self) -> &'static str;

    /// Accept `input` and return the format this node emits.
    fn configure(&mut self, input: FrameFormat) -> Result<FrameFormat, PlayerError>;

    /// Consume one frame, appending zero or more frames to `out`.
    fn process(&mut self, frame: Frame, out: &mut Vec<Frame>) -> Result<(), PlayerError>;

    /// Emit anything held back internally.
    fn flush(&mut self, _out: &mut Vec<Frame>) -> Result<(), PlayerError> {
        Ok(())
    }
}

pub struct Pipeline {
    source: SourceNode,
    nodes: Vec<Box<dyn FilterNode>>,
    output: FrameFormat,
}

impl Pipeline {
    /// Build and link source → gain → format(s16) → sink.
    pub fn build(
        input: DecoderFormat,
        gain: GainControl,
        max_frame_samples: usize,
    ) -> Result<Self, PlayerError> {
        let source = SourceNode::new(input)?;
        let nodes: Vec<Box<dyn FilterNode>> = vec![
            Box::new(GainNode::new(gain.clone())),
            Box::new(FormatNode),
            Box::new(SinkNode::new(max_frame_samples, input.time_base)),
        ];
        Self::link(source, nodes, &gain, input)
    }

    fn link(
        source: SourceNode,
        mut nodes: Vec<Box<dyn FilterNode>>,
        gain: &GainControl,
        input: DecoderFormat,
    ) -> Result<Self, PlayerError> {
        let mut format = source.output();
        for node in nodes.iter_mut() {
            format = node.configure(format)?;
        }
        if format.encoding != SampleEncoding::S16 {
            return Err(PlayerError::Filter(format!(
                "graph ends in {:?}, device needs S16",
                format.encoding
            )));
        }
        tracing::debug!(
            rate_hz = format.sample_rate,
            channels = format.channels,
            decoder_format = ?input.sample_format,
            gain_db = gain.db(),
            "filter pipeline configured"
        );
        Ok(Self {
            source,
            nodes,
            output: format,
        })
    }

    /// Feed one decoded buffer and drain every chunk now available.
    ///
    /// A missing timestamp is treated as zero.
    pub fn push(
        &mut self,
        decoded: AudioBufferRef<'_>,
        pts: Option<u64>,
    ) -> Result<Vec<PcmChunk>, PlayerError> {
        match self.source.convert(decoded, pts.unwrap_or(0)) {
            Some(frame) => self.run_from(0, vec![frame]),
            None => Ok(Vec::new()),
        }
    }

    /// Drain frames buffered inside the graph (end of stream).
    pub fn flush(&mut self) -> Result<Vec<PcmChunk>, PlayerError> {
        let mut chunks = Vec::new();
        for idx in 0..self.nodes.len() {
            let mut held = Vec::new();
            self.nodes[idx].flush(&mut held)?;
            if !held.is_empty() {
                chunks.extend(self.run_from(idx + 1, held)?);
            }
        }
        Ok(chunks)
    }

    fn run_from(&mut self, start: usize, mut batch: Vec<Frame>) -> Result<Vec<PcmChunk>, PlayerError> {
        for node in self.nodes.iter_mut().skip(start) {
            let mut next = Vec::with_capacity(batch.len());
            for frame in batch {
                node.process(frame, &mut next)?;
            }
            batch = next;
        }
        batch
            .into_iter()
            .map(|frame| match frame.samples {
                Samples::S16(samples) => Ok(PcmChunk {
                    pts: frame.pts,
                    samples,
                }),
                Samples::F32(_) => Err(PlayerError::Filter("sink produced non-s16 frame".into())),
            })
            .collect()
    }

    pub fn output_format(&self) -> OutputFormat {
        OutputFormat {
            sample_rate: self.output.sample_rate,
            channels: self.output.channels,
        }
    }
}

/// Advance `ts` by `frames` sample frames.
pub(crate) fn advance_ts(ts: u64, frames: u64, sample_rate: u32, time_base: TimeBase) -> u64 {
    if sample_rate == 0 || time_base.numer == 0 {
        return ts;
    }
    let delta = frames as u128 * time_base.denom as u128
        / (time_base.numer as u128 * sample_rate as u128);
    ts.saturating_add(delta.min(u64::MAX as u128) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::audio::{AsAudioBufferRef, AudioBuffer, Signal, SignalSpec};

    const STEREO: Channels = Channels::FRONT_LEFT.union(Channels::FRONT_RIGHT);

    fn format(rate: u32) -> DecoderFormat {
        DecoderFormat {
            time_base: TimeBase::new(1, rate),
            sample_rate: rate,
            channels: Some(STEREO),
            sample_format: Some(SampleFormat::F32),
        }
    }

    fn stereo_buffer(rate: u32, frames: usize, value: f32) -> AudioBuffer<f32> {
        let mut buf = AudioBuffer::<f32>::new(frames as u64, SignalSpec::new(rate, STEREO));
        buf.render_reserved(Some(frames));
        for ch in 0..2 {
            buf.chan_mut(ch).fill(value);
        }
        buf
    }

    fn run(pipeline: &mut Pipeline, frames: usize, value: f32, pts: u64) -> Vec<PcmChunk> {
        let buf = stereo_buffer(8_000, frames, value);
        pipeline.push(buf.as_audio_buffer_ref(), Some(pts)).unwrap()
    }

    #[test]
    fn build_rejects_zero_rate_and_empty_layout() {
        let mut f = format(8_000);
        f.sample_rate = 0;
        assert!(matches!(
            Pipeline::build(f, GainControl::default(), 64),
            Err(PlayerError::Filter(_))
        ));

        let mut f = format(8_000);
        f.channels = None;
        assert!(matches!(
            Pipeline::build(f, GainControl::default(), 64),
            Err(PlayerError::Filter(_))
        ));
    }

    #[test]
    fn link_rejects_mismatched_nodes() {
        let input = format(8_000);
        let source = SourceNode::new(input).unwrap();
        // Sink before format: sink wants s16 but receives f32.
        let nodes: Vec<Box<dyn FilterNode>> = vec![
            Box::new(SinkNode::new(64, input.time_base)),
            Box::new(FormatNode),
        ];
        let err = Pipeline::link(source, nodes, &GainControl::default(), input)
            .err()
            .unwrap();
        assert!(matches!(err, PlayerError::Filter(_)));
        assert_eq!(err.fail_kind(), stream_player_types::PlayerReturn::HardFail);
    }

    #[test]
    fn output_format_is_s16_with_source_layout() {
        let pipeline = Pipeline::build(format(44_100), GainControl::default(), 64).unwrap();
        let out = pipeline.output_format();
        assert_eq!(out.sample_rate, 44_100);
        assert_eq!(out.channels, 2);
    }

    #[test]
    fn unity_gain_converts_to_full_scale_s16() {
        let mut pipeline = Pipeline::build(format(8_000), GainControl::default(), 4).unwrap();
        let chunks = run(&mut pipeline, 4, 0.5, 0);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].samples.iter().all(|s| *s == 16_384));
    }

    #[test]
    fn format_node_clips_out_of_range_samples() {
        let mut pipeline = Pipeline::build(format(8_000), GainControl::new(12.0), 2).unwrap();
        let chunks = run(&mut pipeline, 2, 0.9, 0);
        assert!(chunks[0].samples.iter().all(|s| *s == i16::MAX));
    }

    #[test]
    fn sink_rechunks_and_flushes_tail() {
        let mut pipeline = Pipeline::build(format(8_000), GainControl::default(), 3).unwrap();
        let first = run(&mut pipeline, 5, 0.25, 0);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].samples.len(), 6);
        assert_eq!(first[0].pts, 0);

        let second = run(&mut pipeline, 2, 0.25, 5);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].pts, 3);

        let tail = pipeline.flush().unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].samples.len(), 2);
        assert_eq!(tail[0].pts, 6);
        assert!(pipeline.flush().unwrap().is_empty());
    }

    #[test]
    fn missing_pts_becomes_zero() {
        let mut pipeline = Pipeline::build(format(8_000), GainControl::default(), 2).unwrap();
        let buf = stereo_buffer(8_000, 2, 0.1);
        let chunks = pipeline.push(buf.as_audio_buffer_ref(), None).unwrap();
        assert_eq!(chunks[0].pts, 0);
    }

    #[test]
    fn gain_update_applies_to_next_frame_without_rebuild() {
        let gain = GainControl::default();
        let mut pipeline = Pipeline::build(format(8_000), gain.clone(), 2).unwrap();
        let before = run(&mut pipeline, 2, 0.5, 0);
        assert!(gain.set_db(-6.0206));
        let after = run(&mut pipeline, 2, 0.5, 2);
        assert_eq!(before[0].samples[0], 16_384);
        assert!((after[0].samples[0] as i32 - 8_192).abs() <= 1);
    }

    #[test]
    fn setting_same_gain_twice_matches_setting_once() {
        let once = GainControl::default();
        let mut a = Pipeline::build(format(8_000), once.clone(), 8).unwrap();
        once.set_db(-3.0);

        let twice = GainControl::default();
        let mut b = Pipeline::build(format(8_000), twice.clone(), 8).unwrap();
        twice.set_db(-3.0);
        twice.set_db(-3.0);

        assert_eq!(run(&mut a, 8, 0.3, 0), run(&mut b, 8, 0.3, 0));
    }

    #[test]
    fn invalid_gain_leaves_output_unchanged() {
        let gain = GainControl::new(-6.0206);
        let mut pipeline = Pipeline::build(format(8_000), gain.clone(), 2).unwrap();
        assert!(!gain.set_db(f32::NAN));
        let out = run(&mut pipeline, 2, 0.5, 0);
        assert!((out[0].samples[0] as i32 - 8_192).abs() <= 1);
    }

    #[test]
    fn advance_ts_scales_through_time_base() {
        assert_eq!(advance_ts(10, 441, 44_100, TimeBase::new(1, 44_100)), 451);
        assert_eq!(advance_ts(0, 44_100, 44_100, TimeBase::new(1, 1_000)), 1_000);
    }
}

//! Real-time cpal callback.
//!
//! Refills a small local buffer from the [`SampleQueue`] without blocking,
//! maps mono/stereo when the device layout differs, and converts `i16` to the
//! device sample format.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use anyhow::{Result, anyhow};
use cpal::traits::DeviceTrait;

use super::queue::SampleQueue;

#[derive(Clone, Debug)]
pub(crate) struct CallbackConfig {
    /// Max frames pulled from the queue per refill.
    pub refill_max_frames: usize,
    /// When `true` the callback emits silence and leaves the queue untouched.
    pub paused: Arc<AtomicBool>,
    /// Incremented each time the callback runs dry while playing.
    pub underruns: Arc<AtomicU64>,
}

pub(crate) fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    queue: &Arc<SampleQueue>,
    cfg: CallbackConfig,
) -> Result<cpal::Stream> {
    match sample_format {
        cpal::SampleFormat::I16 => build_stream::<i16>(device, config, queue, cfg),
        cpal::SampleFormat::F32 => build_stream::<f32>(device, config, queue, cfg),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, config, queue, cfg),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, config, queue, cfg),
        other => Err(anyhow!("Unsupported sample format: {other:?}")),
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: &Arc<SampleQueue>,
    cfg: CallbackConfig,
) -> Result<cpal::Stream>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<i16>,
{
    let channels_out = config.channels as usize;
    let mut state = CallbackState {
        pos: 0,
        src_channels: queue.channels(),
        src: Vec::new(),
    };
    let refill_max_frames = cfg.refill_max_frames.max(1);
    let queue_cb = queue.clone();
    let paused = cfg.paused;
    let underruns = cfg.underruns;

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _| {
            if paused.load(Ordering::Relaxed) {
                data.fill(T::EQUILIBRIUM);
                return;
            }

            let frames = data.len() / channels_out;
            for frame in 0..frames {
                if state.pos >= state.src.len() {
                    state.pos = 0;
                    match queue_cb.pop_up_to(refill_max_frames) {
                        Some(v) => state.src = v,
                        None => {
                            state.src.clear();
                            underruns.fetch_add(1, Ordering::Relaxed);
                            data[frame * channels_out..].fill(T::EQUILIBRIUM);
                            break;
                        }
                    }
                }
                for ch in 0..channels_out {
                    let sample = next_sample_mapped(&mut state, channels_out, ch);
                    data[frame * channels_out + ch] = T::from_sample(sample);
                }
            }
        },
        err_fn,
        None,
    )?;

    Ok(stream)
}

struct CallbackState {
    pos: usize,
    src_channels: usize,
    src: Vec<i16>,
}

/// Read one output sample for `dst_ch`; `pos` advances after the last
/// destination channel of a frame.
fn next_sample_mapped(st: &mut CallbackState, dst_channels: usize, dst_ch: usize) -> i16 {
    if st.pos >= st.src.len() {
        return 0;
    }

    let frame_start = st.pos;
    let get = |ch: usize, st: &CallbackState| -> i16 {
        if ch < st.src_channels && frame_start + ch < st.src.len() {
            st.src[frame_start + ch]
        } else {
            0
        }
    };

    let out = match (st.src_channels, dst_channels) {
        (2, 1) => ((get(0, st) as i32 + get(1, st) as i32) / 2) as i16,
        (1, _) => get(0, st),
        _ => get(dst_ch.min(st.src_channels.saturating_sub(1)), st),
    };

    if dst_ch + 1 == dst_channels {
        st.pos += st.src_channels;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(src: Vec<i16>, src_channels: usize, dst_channels: usize) -> Vec<i16> {
        let mut st = CallbackState {
            pos: 0,
            src_channels,
            src,
        };
        let mut out = Vec::new();
        while st.pos < st.src.len() {
            for ch in 0..dst_channels {
                out.push(next_sample_mapped(&mut st, dst_channels, ch));
            }
        }
        out
    }

    #[test]
    fn stereo_passthrough() {
        assert_eq!(render(vec![1, 2, 3, 4], 2, 2), vec![1, 2, 3, 4]);
    }

    #[test]
    fn mono_duplicates_to_stereo() {
        assert_eq!(render(vec![5, 7], 1, 2), vec![5, 5, 7, 7]);
    }

    #[test]
    fn stereo_averages_to_mono() {
        assert_eq!(render(vec![100, 200, -50, 50], 2, 1), vec![150, 0]);
    }
}

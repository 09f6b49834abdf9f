//! Stream source: open the input, pick the audio track, open its decoder.
//!
//! A [`StreamHandle`] owns the demuxer and decoder for one open attempt and is
//! dropped (closing both) when the playback loop exits or retries.

mod http;

use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use symphonia::core::audio::AudioBufferRef;
use symphonia::core::codecs::{CODEC_TYPE_NULL, CodecParameters, CodecRegistry, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, SeekMode, SeekTo, Track};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::TimeBase;

use crate::error::{PlayerError, ReadStatus};
use crate::filter::DecoderFormat;
use crate::runtime;
use crate::watchdog::{TimeoutPolicy, Watchdog};

/// Read-ahead switch shared between the playback worker and the transport.
///
/// While paused, the transport stops pulling data; resuming restarts the
/// liveness clock so the paused interval never counts as a stall.
#[derive(Debug)]
pub struct ReadAhead {
    paused: Mutex<bool>,
    cv: Condvar,
    watchdog: Arc<Watchdog>,
}

impl ReadAhead {
    pub fn new(watchdog: Arc<Watchdog>) -> Self {
        Self {
            paused: Mutex::new(false),
            cv: Condvar::new(),
            watchdog,
        }
    }

    pub fn pause(&self) {
        let mut g = self.paused.lock().unwrap_or_else(|e| e.into_inner());
        *g = true;
    }

    pub fn resume(&self) {
        let mut g = self.paused.lock().unwrap_or_else(|e| e.into_inner());
        if *g {
            *g = false;
            self.watchdog.ping();
            drop(g);
            self.cv.notify_all();
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block while paused; wakes periodically to observe `stop`.
    pub(crate) fn wait_while_paused(&self, stop: &AtomicBool) {
        let mut g = self.paused.lock().unwrap_or_else(|e| e.into_inner());
        while *g && !stop.load(Ordering::Relaxed) {
            g = match self.cv.wait_timeout(g, Duration::from_millis(200)) {
                Ok((g, _)) => g,
                Err(e) => e.into_inner().0,
            };
        }
    }
}

/// Per-open inputs that come from the session rather than the URL.
#[derive(Clone, Debug)]
pub struct OpenOptions {
    /// Inactivity window for the opening read and subsequent reads.
    pub timeout: Duration,
    /// Session quit flag, polled by blocking transports.
    pub quit: Arc<AtomicBool>,
}

/// An opened input with its selected audio track and decoder.
pub struct StreamHandle {
    // Field order is drop order: decoder before demuxer.
    decoder: Box<dyn Decoder>,
    format: Box<dyn FormatReader>,
    track_id: u32,
    params: CodecParameters,
    time_base: TimeBase,
    duration_seconds: f64,
    read_ahead: Arc<ReadAhead>,
}

impl StreamHandle {
    /// Open `url`, probe it, select the best audio track and open its decoder.
    ///
    /// When `resume_ts` is positive a coarse seek to that timestamp is
    /// attempted; failure to seek is logged and playback continues from
    /// wherever the demuxer is.
    pub fn open(url: &str, resume_ts: u64, opts: &OpenOptions) -> Result<Self, PlayerError> {
        let watchdog = Watchdog::shared(opts.timeout);
        let read_ahead = Arc::new(ReadAhead::new(watchdog.clone()));
        let (source, hint, policy) = open_transport(url, opts, &watchdog, &read_ahead)?;

        let mss = MediaSourceStream::new(source, Default::default());
        let probed = policy
            .with_timeout(|| {
                runtime::probe().format(
                    &hint,
                    mss,
                    &FormatOptions {
                        enable_gapless: true,
                        ..Default::default()
                    },
                    &MetadataOptions::default(),
                )
            })
            .map_err(|e| match e {
                SymphoniaError::IoError(source) => PlayerError::Open {
                    url: url.to_string(),
                    source,
                },
                other => PlayerError::Probe(other),
            })?;
        let mut format = probed.format;

        let registry = runtime::codec_registry();
        let track = select_best_track(format.tracks(), format.default_track(), registry)
            .ok_or(PlayerError::NoAudioTrack)?;
        let track_id = track.id;
        let params = track.codec_params.clone();

        let decoder = registry
            .make(&params, &DecoderOptions::default())
            .map_err(PlayerError::Decoder)?;

        let time_base = stream_time_base(&params).ok_or(PlayerError::NoAudioTrack)?;
        let duration_seconds = params
            .n_frames
            .map(|n| ts_to_seconds(time_base, n))
            .unwrap_or(0.0);

        if resume_ts > 0 {
            match format.seek(
                SeekMode::Coarse,
                SeekTo::TimeStamp {
                    ts: resume_ts,
                    track_id,
                },
            ) {
                Ok(seeked) => tracing::info!(
                    requested_ts = resume_ts,
                    actual_ts = seeked.actual_ts,
                    "resumed stream"
                ),
                Err(e) => tracing::warn!(resume_ts, "seek failed, continuing: {e}"),
            }
        }

        tracing::info!(
            url = %url,
            track_id,
            codec = codec_label(&params),
            sample_rate = params.sample_rate.unwrap_or(0),
            channels = params.channels.map(|c| c.count()).unwrap_or(0),
            duration_s = duration_seconds,
            "stream opened"
        );

        Ok(Self {
            decoder,
            format,
            track_id,
            params,
            time_base,
            duration_seconds,
            read_ahead,
        })
    }

    /// Next packet from the demuxer, or the reason reading stopped.
    pub fn next_packet(&mut self) -> Result<Packet, ReadStatus> {
        self.format
            .next_packet()
            .map_err(|e| ReadStatus::from_read_error(&e))
    }

    /// Decode one packet.
    ///
    /// Errors are per-packet; pass them to [`StreamHandle::skip_packet`].
    pub fn decode(&mut self, packet: &Packet) -> Result<AudioBufferRef<'_>, SymphoniaError> {
        self.decoder.decode(packet)
    }

    /// Recover from a failed [`StreamHandle::decode`]; the packet is dropped.
    pub fn skip_packet(&mut self, ts: u64, err: SymphoniaError) {
        match err {
            SymphoniaError::ResetRequired => {
                tracing::debug!(ts, "decoder reset requested");
                self.decoder.reset();
            }
            e => tracing::debug!(ts, "skipping undecodable packet: {e}"),
        }
    }

    pub fn pause_read_ahead(&self) {
        self.read_ahead.pause();
    }

    pub fn resume_read_ahead(&self) {
        self.read_ahead.resume();
    }

    pub fn track_id(&self) -> u32 {
        self.track_id
    }

    pub fn codec_params(&self) -> &CodecParameters {
        &self.params
    }

    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }

    /// Convert a packet timestamp to seconds.
    pub fn seconds_at(&self, ts: u64) -> f64 {
        ts_to_seconds(self.time_base, ts)
    }

    /// Parameters the filter pipeline's source node is built against.
    pub fn decoder_format(&self) -> DecoderFormat {
        DecoderFormat {
            time_base: self.time_base,
            sample_rate: self.params.sample_rate.unwrap_or(0),
            channels: self.params.channels,
            sample_format: self.params.sample_format,
        }
    }
}

/// Pick the transport for `url` and wrap it for Symphonia.
fn open_transport(
    url: &str,
    opts: &OpenOptions,
    watchdog: &Arc<Watchdog>,
    read_ahead: &Arc<ReadAhead>,
) -> Result<(Box<dyn MediaSource>, Hint, TimeoutPolicy), PlayerError> {
    let mut hint = Hint::new();
    if let Some(ext) = infer_ext_from_url(url) {
        hint.with_extension(&ext);
    }
    let open_err = |source| PlayerError::Open {
        url: url.to_string(),
        source,
    };

    if url.starts_with("http://") || url.starts_with("https://") {
        let stream = http::HttpStream::open(
            url,
            http::HttpConfig {
                timeout: opts.timeout,
                ..http::HttpConfig::default()
            },
            watchdog.clone(),
            opts.quit.clone(),
            read_ahead.clone(),
        )
        .map_err(open_err)?;
        return Ok((
            Box::new(stream),
            hint,
            TimeoutPolicy::Watchdog(watchdog.clone()),
        ));
    }

    let path = url.strip_prefix("file://").unwrap_or(url);
    let file = File::open(Path::new(path)).map_err(open_err)?;
    Ok((Box::new(file), hint, TimeoutPolicy::Native))
}

/// Choose the highest-quality audio track the registry can decode.
///
/// Score is sample rate × channels × bits per sample; the container's default
/// track wins ties.
pub fn select_best_track<'a>(
    tracks: &'a [Track],
    default: Option<&Track>,
    registry: &CodecRegistry,
) -> Option<&'a Track> {
    let default_id = default.map(|t| t.id);
    tracks
        .iter()
        .filter(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .filter(|t| registry.get_codec(t.codec_params.codec).is_some())
        .filter(|t| t.codec_params.sample_rate.is_some())
        .max_by_key(|t| (track_score(&t.codec_params), Some(t.id) == default_id))
}

fn track_score(params: &CodecParameters) -> u64 {
    let rate = params.sample_rate.unwrap_or(0) as u64;
    let channels = params.channels.map(|c| c.count()).unwrap_or(1) as u64;
    let bits = params
        .bits_per_sample
        .or(params.bits_per_coded_sample)
        .unwrap_or(16) as u64;
    rate * channels * bits
}

/// Track time base, falling back to one tick per sample.
fn stream_time_base(params: &CodecParameters) -> Option<TimeBase> {
    params
        .time_base
        .or_else(|| params.sample_rate.filter(|r| *r > 0).map(|r| TimeBase::new(1, r)))
}

pub fn ts_to_seconds(time_base: TimeBase, ts: u64) -> f64 {
    let t = time_base.calc_time(ts);
    t.seconds as f64 + t.frac
}

/// Infer a file extension from the URL path if present.
fn infer_ext_from_url(url: &str) -> Option<String> {
    let tail = url.split('?').next().unwrap_or(url);
    let file = tail.rsplit('/').next().unwrap_or(tail);
    let mut parts = file.rsplit('.');
    let ext = parts.next()?;
    if parts.next().is_some() && !ext.is_empty() {
        Some(ext.to_ascii_lowercase())
    } else {
        None
    }
}

/// Best-effort codec label for logs.
fn codec_label(params: &CodecParameters) -> &'static str {
    use symphonia::core::codecs::*;
    match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_MP2 => "MP2",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => "other",
    }
}

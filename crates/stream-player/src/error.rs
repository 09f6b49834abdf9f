//! Error taxonomy for a playback session.
//!
//! Setup failures are split into "the stream is unplayable" (soft) and "the
//! local environment cannot render" (hard). Read-loop termination is reported
//! separately as a [`ReadStatus`] because only some endings are failures.

use std::io;

use stream_player_types::PlayerReturn;
use symphonia::core::errors::Error as SymphoniaError;

/// Failures raised while setting up or running a session.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    #[error("Unable to open audio stream {url}: {source}")]
    Open {
        url: String,
        #[source]
        source: io::Error,
    },
    #[error("Unable to probe stream format: {0}")]
    Probe(#[source] SymphoniaError),
    #[error("No playable audio track in stream")]
    NoAudioTrack,
    #[error("Cannot open decoder: {0}")]
    Decoder(#[source] SymphoniaError),
    #[error("Cannot build filter pipeline: {0}")]
    Filter(String),
    #[error("Cannot open audio device: {0}")]
    Device(String),
    #[error("Audio engine is not initialized")]
    NotInitialized,
    #[error("Recorder error: {0}")]
    Recorder(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl PlayerError {
    /// Thread result code this failure maps to when it aborts the track.
    pub fn fail_kind(&self) -> PlayerReturn {
        match self {
            PlayerError::Open { .. }
            | PlayerError::Probe(_)
            | PlayerError::NoAudioTrack
            | PlayerError::Decoder(_)
            | PlayerError::Io(_) => PlayerReturn::SoftFail,
            PlayerError::Filter(_) | PlayerError::Device(_) | PlayerError::NotInitialized => {
                PlayerReturn::HardFail
            }
            PlayerError::Recorder(_) => PlayerReturn::Ok,
        }
    }
}

/// Why the read loop stopped.
#[derive(Debug, thiserror::Error)]
pub enum ReadStatus {
    /// The demuxer ran out of packets.
    #[error("end of stream")]
    EndOfStream,
    /// The session's quit flag was observed.
    #[error("cancelled")]
    Cancelled,
    /// The demuxer hit malformed data; the stream is worth reopening.
    #[error("{0}")]
    InvalidData(String),
    /// The transport made no progress within the liveness window.
    #[error("network timeout")]
    TimedOut,
    /// Any other read failure.
    #[error("{0}")]
    Failed(String),
}

impl ReadStatus {
    /// Classify a demuxer error returned by `next_packet`.
    pub fn from_read_error(err: &SymphoniaError) -> Self {
        match err {
            SymphoniaError::IoError(e) => match e.kind() {
                io::ErrorKind::UnexpectedEof => ReadStatus::EndOfStream,
                io::ErrorKind::TimedOut => ReadStatus::TimedOut,
                io::ErrorKind::Interrupted => ReadStatus::Cancelled,
                io::ErrorKind::InvalidData => ReadStatus::InvalidData(e.to_string()),
                _ => ReadStatus::Failed(e.to_string()),
            },
            SymphoniaError::DecodeError(msg) => ReadStatus::InvalidData((*msg).to_string()),
            other => ReadStatus::Failed(other.to_string()),
        }
    }

    /// Only corrupt data justifies tearing down and reseeking.
    pub fn wants_retry(&self) -> bool {
        matches!(self, ReadStatus::InvalidData(_))
    }
}

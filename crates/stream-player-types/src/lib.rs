use serde::{Deserialize, Serialize};

/// Lifecycle of a single playback session.
///
/// Transitions are `Opening -> Playing <-> Paused -> Finished`, or
/// `Opening -> Finished` when setup fails. `Finished` is terminal.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlayerMode {
    /// Stream, pipeline and device are being set up.
    #[default]
    Opening,
    /// Audio is being decoded and rendered.
    Playing,
    /// The worker is parked in the pause gate.
    Paused,
    /// The worker has released every resource; the session is over.
    Finished,
}

impl PlayerMode {
    /// Numeric encoding used for lock-free storage.
    pub fn as_u8(self) -> u8 {
        match self {
            PlayerMode::Opening => 0,
            PlayerMode::Playing => 1,
            PlayerMode::Paused => 2,
            PlayerMode::Finished => 3,
        }
    }

    /// Inverse of [`PlayerMode::as_u8`]; unknown values map to `Finished`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => PlayerMode::Opening,
            1 => PlayerMode::Playing,
            2 => PlayerMode::Paused,
            _ => PlayerMode::Finished,
        }
    }
}

/// Result code returned by a session's worker thread.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlayerReturn {
    /// Track played to the end or was cancelled.
    #[default]
    Ok,
    /// The stream could not be opened, probed or matched to an audio track.
    SoftFail,
    /// The filter pipeline or the output device could not be set up.
    HardFail,
}

/// Point-in-time view of a session, safe to read from any thread.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PlayerStatus {
    pub mode: PlayerMode,
    /// Playback position derived from the last processed packet.
    pub position_seconds: f64,
    /// Declared stream duration; `0.0` for live streams.
    pub duration_seconds: f64,
}

/// Severity attached to messages handed to the host UI.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageSeverity {
    Info,
    Warning,
    Error,
}

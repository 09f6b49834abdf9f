//! Single-track audio stream playback engine.
//!
//! Opens a stream (file or HTTP), decodes it with Symphonia, applies a live
//! gain and converts to s16, plays through an [`output::OutputBackend`], and
//! optionally stream-copies the input to disk.

pub mod config;
pub mod control;
pub mod error;
pub mod filter;
pub mod output;
mod player;
pub mod recorder;
pub mod runtime;
mod session;
pub mod source;
pub mod ui;
pub mod watchdog;

pub use config::EngineSettings;
pub use control::PlayerHandle;
pub use error::{PlayerError, ReadStatus};
pub use session::TrackRequest;
pub use stream_player_types::{MessageSeverity, PlayerMode, PlayerReturn, PlayerStatus};

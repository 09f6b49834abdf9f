use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "stream-play", version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
    /// Stream URL (http://, https://, file://) or local path
    #[arg(required_unless_present = "list_devices")]
    pub url: Option<String>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Settings file (TOML). Flags below override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Station name, used as the recording directory
    #[arg(long, default_value = "")]
    pub station: String,

    /// Track artist, used in the recording file name
    #[arg(long, default_value = "")]
    pub artist: String,

    /// Track title, used in the recording file name
    #[arg(long, default_value = "")]
    pub title: String,

    /// Track replay gain in dB
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub gain_db: f32,

    /// User volume in dB
    #[arg(long, allow_negative_numbers = true)]
    pub volume_db: Option<f32>,

    /// Root directory for recordings (enables recording)
    #[arg(long)]
    pub save_dir: Option<PathBuf>,

    /// Directory for in-progress recordings
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Decode and pace playback without opening an audio device
    #[arg(long)]
    pub null_output: bool,

    /// Max reopen attempts after corrupt data
    #[arg(long, conflicts_with = "unbounded_retries")]
    pub max_retries: Option<u32>,

    /// Reopen after corrupt data without limit
    #[arg(long)]
    pub unbounded_retries: bool,

    /// Seconds without stream progress before giving up
    #[arg(long)]
    pub io_timeout_secs: Option<u64>,

    /// Output queue depth in seconds
    #[arg(long)]
    pub buffer_seconds: Option<f32>,

    /// Playback callback refill cap (frames)
    #[arg(long)]
    pub refill_max_frames: Option<usize>,
}

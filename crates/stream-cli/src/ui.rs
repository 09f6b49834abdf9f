//! Terminal rendering: engine messages, log lines and the status line.
//!
//! The terminal may be in raw mode, so every line ends in `\r\n` and starts
//! by clearing whatever the status line left behind.

use std::io::{self, Write};

use crossterm::cursor::MoveToColumn;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use crossterm::{execute, queue};
use stream_player::ui::MessageSink;
use stream_player::{MessageSeverity, PlayerMode, PlayerStatus};

/// Prints engine messages to stderr on their own line.
#[derive(Debug, Default)]
pub struct TerminalSink;

impl MessageSink for TerminalSink {
    fn message(&self, severity: MessageSeverity, text: &str) {
        print_line(&message_line(severity, text));
    }
}

fn message_line(severity: MessageSeverity, text: &str) -> String {
    let prefix = match severity {
        MessageSeverity::Info => "(i)",
        MessageSeverity::Warning | MessageSeverity::Error => "/!\\",
    };
    format!("{prefix} {text}")
}

/// Print `line` over the status line and move to a fresh one.
pub fn print_line(line: &str) {
    let mut err = io::stderr().lock();
    let _ = execute!(
        err,
        MoveToColumn(0),
        Clear(ClearType::CurrentLine),
        Print(line),
        Print("\r\n")
    );
}

/// Overwrite the current stderr line with `line`.
pub fn draw_status(line: &str) {
    let mut err = io::stderr().lock();
    let _ = execute!(err, MoveToColumn(0), Clear(ClearType::CurrentLine), Print(line));
}

/// Writer for the tracing subscriber that keeps log lines from stair-stepping
/// in raw mode or landing on top of the status line.
pub struct LogWriter<W: Write>(W);

impl LogWriter<io::Stderr> {
    pub fn stderr() -> Self {
        Self(io::stderr())
    }
}

impl<W: Write> Write for LogWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf).replace("\r\n", "\n").replace('\n', "\r\n");
        queue!(self.0, MoveToColumn(0), Clear(ClearType::CurrentLine), Print(text))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// `mm:ss` with minutes allowed past 59.
pub fn format_clock(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds as u64
    } else {
        0
    };
    format!("{:02}:{:02}", total / 60, total % 60)
}

/// One-line playback summary, e.g. `# 01:05/03:30  vol -3.0 dB  [paused]`.
///
/// Live streams (no duration) show elapsed time only.
pub fn format_status(status: &PlayerStatus, volume_db: f32) -> String {
    let mut line = format!("# {}", format_clock(status.position_seconds));
    if status.duration_seconds > 0.0 {
        line.push('/');
        line.push_str(&format_clock(status.duration_seconds));
    }
    line.push_str(&format!("  vol {volume_db:+.1} dB"));
    match status.mode {
        PlayerMode::Opening => line.push_str("  [opening]"),
        PlayerMode::Paused => line.push_str("  [paused]"),
        PlayerMode::Playing | PlayerMode::Finished => {}
    }
    line
}

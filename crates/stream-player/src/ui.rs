//! Message sink the engine reports through.
//!
//! The engine never exits the process; it reports and returns a status code.

use std::sync::Mutex;

use stream_player_types::MessageSeverity;

/// Host-provided receiver for user-facing messages.
pub trait MessageSink: Send + Sync {
    fn message(&self, severity: MessageSeverity, text: &str);
}

/// Drops messages. They still reach the `tracing` log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl MessageSink for LogSink {
    fn message(&self, _severity: MessageSeverity, _text: &str) {}
}

/// Keeps every message in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<(MessageSeverity, String)>>,
}

impl MemorySink {
    pub fn messages(&self) -> Vec<(MessageSeverity, String)> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

impl MessageSink for MemorySink {
    fn message(&self, severity: MessageSeverity, text: &str) {
        if let Ok(mut m) = self.messages.lock() {
            m.push((severity, text.to_string()));
        }
    }
}

/// Log `text` and hand it to `sink`.
pub(crate) fn report(sink: &dyn MessageSink, severity: MessageSeverity, text: &str) {
    match severity {
        MessageSeverity::Info => tracing::info!("{text}"),
        MessageSeverity::Warning => tracing::warn!("{text}"),
        MessageSeverity::Error => tracing::error!("{text}"),
    }
    sink.message(severity, text);
}

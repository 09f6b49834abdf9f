//! Process-wide engine bootstrap.
//!
//! The host calls [`initialize`] once before starting any session and
//! [`shutdown`] once after the last one has finished.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use symphonia::core::codecs::CodecRegistry;
use symphonia::core::probe::Probe;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Register codecs and formats, and mark the engine ready for sessions.
pub fn initialize() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::warn!("audio engine already initialized");
        return;
    }
    let codecs = codec_registry();
    let _ = probe();
    tracing::info!(
        mp3 = codecs.get_codec(symphonia::core::codecs::CODEC_TYPE_MP3).is_some(),
        aac = codecs.get_codec(symphonia::core::codecs::CODEC_TYPE_AAC).is_some(),
        "audio engine initialized"
    );
}

/// Mark the engine as torn down. Sessions started afterwards fail hard.
pub fn shutdown() {
    if !INITIALIZED.swap(false, Ordering::SeqCst) {
        tracing::warn!("audio engine shutdown without initialize");
        return;
    }
    tracing::info!("audio engine shut down");
}

pub fn is_initialized() -> bool {
    INITIALIZED.load(Ordering::SeqCst)
}

/// Codec registry shared by all sessions.
pub fn codec_registry() -> &'static CodecRegistry {
    static CODECS: OnceLock<CodecRegistry> = OnceLock::new();
    CODECS.get_or_init(|| {
        let mut registry = CodecRegistry::new();
        symphonia::default::register_enabled_codecs(&mut registry);
        registry
    })
}

/// Container probe shared by all sessions.
pub fn probe() -> &'static Probe {
    static PROBE: OnceLock<Probe> = OnceLock::new();
    PROBE.get_or_init(|| {
        let mut probe = Probe::default();
        symphonia::default::register_enabled_formats(&mut probe);
        probe
    })
}

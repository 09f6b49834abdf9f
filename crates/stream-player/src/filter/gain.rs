use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

/// Live gain parameter shared between the control surface and the gain node.
///
/// Stored as `f32` bits so readers on the playback thread never block.
#[derive(Clone, Debug)]
pub struct GainControl {
    db_bits: Arc<AtomicU32>,
}

impl GainControl {
    pub fn new(db: f32) -> Self {
        let db = if db.is_finite() { db } else { 0.0 };
        Self {
            db_bits: Arc::new(AtomicU32::new(db.to_bits())),
        }
    }

    /// Replace the gain. Returns `false` (and keeps the old value) for NaN/inf.
    pub fn set_db(&self, db: f32) -> bool {
        if !db.is_finite() {
            return false;
        }
        self.db_bits.store(db.to_bits(), Ordering::Relaxed);
        true
    }

    pub fn db(&self) -> f32 {
        f32::from_bits(self.db_bits.load(Ordering::Relaxed))
    }

    /// Linear amplitude factor, `10^(dB/20)`.
    pub fn factor(&self) -> f32 {
        db_to_factor(self.db())
    }
}

impl Default for GainControl {
    fn default() -> Self {
        Self::new(0.0)
    }
}

pub fn db_to_factor(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

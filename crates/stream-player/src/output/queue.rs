//! Bounded queue between the playback worker and the device callback.
//!
//! The worker pushes rendered `i16` samples and blocks while the queue is
//! full; the callback drains it without ever waiting. That wait is what paces
//! the whole session to real time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

const CANCEL_POLL: Duration = Duration::from_millis(50);

pub(crate) struct SampleQueue {
    channels: usize,
    inner: Mutex<QueueInner>,
    cv: Condvar,
    max_buffered_samples: usize,
}

struct QueueInner {
    queue: VecDeque<i16>,
    done: bool,
}

/// Queue capacity in samples for `buffer_seconds` of audio.
///
/// Non-finite or non-positive durations fall back to two seconds.
pub(crate) fn calc_max_buffered_samples(rate_hz: u32, channels: usize, buffer_seconds: f32) -> usize {
    let secs = if buffer_seconds.is_finite() && buffer_seconds > 0.0 {
        buffer_seconds
    } else {
        2.0
    };
    let frames = (rate_hz as f32 * secs).ceil() as usize;
    frames.saturating_mul(channels).max(channels)
}

impl SampleQueue {
    pub(crate) fn new(channels: usize, max_buffered_samples: usize) -> Self {
        Self {
            channels: channels.max(1),
            inner: Mutex::new(QueueInner {
                queue: VecDeque::new(),
                done: false,
            }),
            cv: Condvar::new(),
            max_buffered_samples: max_buffered_samples.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub(crate) fn channels(&self) -> usize {
        self.channels
    }

    pub(crate) fn len_samples(&self) -> usize {
        self.lock().queue.len()
    }

    /// Stop accepting data and wake every waiter. Idempotent.
    pub(crate) fn close(&self) {
        self.lock().done = true;
        self.cv.notify_all();
    }

    /// Push all of `samples`, blocking while the queue is full.
    ///
    /// Returns `false` if the queue was closed or `cancel` was raised before
    /// everything was queued; the remainder is dropped.
    pub(crate) fn push_blocking(&self, samples: &[i16], cancel: &AtomicBool) -> bool {
        let mut offset = 0;
        while offset < samples.len() {
            let mut g = self.lock();
            while g.queue.len() >= self.max_buffered_samples && !g.done {
                if cancel.load(Ordering::Relaxed) {
                    return false;
                }
                g = match self.cv.wait_timeout(g, CANCEL_POLL) {
                    Ok((g, _)) => g,
                    Err(e) => e.into_inner().0,
                };
            }
            if g.done || cancel.load(Ordering::Relaxed) {
                return false;
            }

            let room = self.max_buffered_samples - g.queue.len();
            let take = room.min(samples.len() - offset);
            g.queue.extend(&samples[offset..offset + take]);
            offset += take;
            drop(g);
            self.cv.notify_all();
        }
        true
    }

    /// Take up to `max_frames` whole frames without blocking.
    pub(crate) fn pop_up_to(&self, max_frames: usize) -> Option<Vec<i16>> {
        let mut g = self.lock();
        let take_frames = (g.queue.len() / self.channels).min(max_frames);
        let take = take_frames * self.channels;
        if take == 0 {
            return None;
        }
        let out: Vec<i16> = g.queue.drain(..take).collect();
        drop(g);
        self.cv.notify_all();
        Some(out)
    }

    /// Block until the queue is empty or `cancel` is raised.
    ///
    /// Returns `true` if the queue drained.
    pub(crate) fn wait_drained_or_cancel(&self, cancel: &AtomicBool, limit: Duration) -> bool {
        let deadline = std::time::Instant::now() + limit;
        let mut g = self.lock();
        loop {
            if g.queue.len() < self.channels {
                return true;
            }
            if cancel.load(Ordering::Relaxed) || std::time::Instant::now() >= deadline {
                return false;
            }
            g = match self.cv.wait_timeout(g, CANCEL_POLL) {
                Ok((g, _)) => g,
                Err(e) => e.into_inner().0,
            };
        }
    }
}

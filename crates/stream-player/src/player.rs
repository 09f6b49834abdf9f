//! Playback worker: one thread drives one track from open to finish.
//!
//! Each open attempt builds source → pipeline → device, runs the
//! read/record/pause/decode/play loop, and tears the stages down again.
//! Corrupt data reopens the stream at the last played timestamp.

use std::sync::Arc;

use stream_player_types::{MessageSeverity, PlayerMode, PlayerReturn};

use crate::config::EngineSettings;
use crate::error::{PlayerError, ReadStatus};
use crate::filter::Pipeline;
use crate::output::{OutputBackend, OutputDevice};
use crate::recorder::{Recorder, plan_recording};
use crate::runtime;
use crate::session::{SessionShared, TrackRequest};
use crate::source::{OpenOptions, StreamHandle};
use crate::ui::{MessageSink, report};

/// Everything one open attempt owns. Dropping releases it in order:
/// device, pipeline, then decoder and input.
#[derive(Default)]
struct Stages {
    device: Option<Box<dyn OutputDevice>>,
    pipeline: Option<Pipeline>,
    stream: Option<StreamHandle>,
}

impl Stages {
    /// Release whatever was opened. Idempotent.
    fn cleanup(&mut self, drain: bool) {
        if let Some(mut device) = self.device.take() {
            device.close(drain);
        }
        self.pipeline.take();
        self.stream.take();
    }
}

impl Drop for Stages {
    fn drop(&mut self) {
        self.cleanup(false);
    }
}

/// How the session ended.
enum Outcome {
    /// Setup failed before or during an open attempt.
    Failed(PlayerError),
    /// The read loop stopped.
    Ended(ReadStatus),
    /// Corrupt data kept coming back after every reopen.
    RetriesExhausted(String),
}

pub(crate) struct Worker {
    pub(crate) track: TrackRequest,
    pub(crate) settings: EngineSettings,
    pub(crate) shared: Arc<SessionShared>,
    pub(crate) backend: Arc<dyn OutputBackend>,
    pub(crate) ui: Arc<dyn MessageSink>,
}

impl Worker {
    pub(crate) fn run(self) -> PlayerReturn {
        let (outcome, recorder) = if runtime::is_initialized() {
            self.play_track()
        } else {
            (Outcome::Failed(PlayerError::NotInitialized), None)
        };

        self.shared.set_mode(PlayerMode::Finished);

        // A truncated recording is still kept unless the user quit.
        if let Some(recorder) = recorder {
            if !self.shared.is_quit() {
                if let Err(e) = recorder.finalize() {
                    report(&*self.ui, MessageSeverity::Warning, &e.to_string());
                }
            } else {
                recorder.abandon();
            }
        }

        let ret = match outcome {
            Outcome::Failed(e) => {
                report(&*self.ui, MessageSeverity::Error, &e.to_string());
                e.fail_kind()
            }
            Outcome::RetriesExhausted(msg) => {
                report(
                    &*self.ui,
                    MessageSeverity::Error,
                    &format!("Giving up on corrupt stream: {msg}"),
                );
                PlayerReturn::SoftFail
            }
            Outcome::Ended(ReadStatus::TimedOut) => {
                report(&*self.ui, MessageSeverity::Warning, "Network timeout, skipping track");
                PlayerReturn::Ok
            }
            Outcome::Ended(ReadStatus::Failed(msg)) => {
                report(
                    &*self.ui,
                    MessageSeverity::Warning,
                    &format!("Playback stopped: {msg}"),
                );
                PlayerReturn::Ok
            }
            Outcome::Ended(_) => PlayerReturn::Ok,
        };
        tracing::info!(url = %self.track.url, result = ?ret, "session finished");
        ret
    }

    fn play_track(&self) -> (Outcome, Option<Recorder>) {
        let mut recorder: Option<Recorder> = None;
        let mut recording_planned = false;
        let mut last_played: Option<u64> = None;
        let mut retries = 0u32;

        loop {
            if self.shared.is_quit() {
                return (Outcome::Ended(ReadStatus::Cancelled), recorder);
            }

            let resume_ts = last_played.unwrap_or(0);
            let mut stages = Stages::default();
            if let Err(e) = self.open_stages(&mut stages, resume_ts) {
                return (Outcome::Failed(e), recorder);
            }

            if !recording_planned {
                recording_planned = true;
                recorder = stages.stream.as_ref().and_then(|s| self.create_recorder(s));
            }
            self.shared.set_mode(PlayerMode::Playing);

            let reopened = retries > 0;
            let status = match self.play_loop(&mut stages, &mut recorder, &mut last_played, reopened) {
                Ok(status) => status,
                Err(e) => return (Outcome::Failed(e), recorder),
            };
            stages.cleanup(matches!(status, ReadStatus::EndOfStream));

            if !status.wants_retry() || self.shared.is_quit() {
                return (Outcome::Ended(status), recorder);
            }
            let msg = status.to_string();
            if !should_retry(retries, self.settings.max_retries) {
                return (Outcome::RetriesExhausted(msg), recorder);
            }
            retries += 1;
            tracing::warn!(
                retries,
                resume_ts = last_played.unwrap_or(0),
                "invalid data, reopening stream: {msg}"
            );
        }
    }

    fn open_stages(&self, stages: &mut Stages, resume_ts: u64) -> Result<(), PlayerError> {
        let stream = StreamHandle::open(
            &self.track.url,
            resume_ts,
            &OpenOptions {
                timeout: self.settings.io_timeout(),
                quit: self.shared.quit_flag(),
            },
        )?;
        self.shared.set_duration(stream.duration_seconds());

        let pipeline = Pipeline::build(
            stream.decoder_format(),
            self.shared.gain().clone(),
            self.settings.max_frame_samples,
        )?;
        stages.stream = Some(stream);

        let device = self
            .backend
            .open(&pipeline.output_format(), self.shared.device_flags())?;
        stages.pipeline = Some(pipeline);
        stages.device = Some(device);
        Ok(())
    }

    fn create_recorder(&self, stream: &StreamHandle) -> Option<Recorder> {
        let plan = plan_recording(
            self.settings.save_dir.as_deref(),
            &self.settings.temp_dir(),
            &self.track.identity,
            stream.codec_params(),
        )?;
        match Recorder::create(plan, stream.codec_params(), stream.time_base()) {
            Ok(r) => Some(r),
            Err(e) => {
                report(&*self.ui, MessageSeverity::Warning, &e.to_string());
                None
            }
        }
    }

    /// Run until the stream ends, quit is requested, or reading fails.
    fn play_loop(
        &self,
        stages: &mut Stages,
        recorder: &mut Option<Recorder>,
        last_played: &mut Option<u64>,
        reopened: bool,
    ) -> Result<ReadStatus, PlayerError> {
        let (Some(stream), Some(pipeline), Some(device)) = (
            stages.stream.as_mut(),
            stages.pipeline.as_mut(),
            stages.device.as_mut(),
        ) else {
            return Err(PlayerError::Filter("playback stages not open".into()));
        };
        let track_id = stream.track_id();
        // After a reopen, skip everything already played.
        let mut catch_up = if reopened { *last_played } else { None };

        loop {
            if self.shared.is_quit() {
                return Ok(ReadStatus::Cancelled);
            }

            let packet = match stream.next_packet() {
                Ok(p) => p,
                Err(status) => {
                    if matches!(status, ReadStatus::EndOfStream | ReadStatus::InvalidData(_)) {
                        for chunk in pipeline.flush()? {
                            device.play(&chunk.samples)?;
                        }
                    }
                    return Ok(status);
                }
            };
            if packet.track_id() != track_id {
                continue;
            }
            let ts = packet.ts();
            if let Some(until) = catch_up {
                if ts <= until {
                    continue;
                }
                catch_up = None;
            }

            if let Some(rec) = recorder.as_mut() {
                if let Err(e) = rec.mirror(&packet) {
                    report(&*self.ui, MessageSeverity::Warning, &e.to_string());
                    if let Some(rec) = recorder.take() {
                        rec.abandon();
                    }
                }
            }

            if self.shared.pause_requested() {
                stream.pause_read_ahead();
                self.shared.set_mode(PlayerMode::Paused);
                let resumed = self.shared.wait_for_resume();
                stream.resume_read_ahead();
                if !resumed {
                    return Ok(ReadStatus::Cancelled);
                }
                self.shared.set_mode(PlayerMode::Playing);
            }

            let decoded = match stream.decode(&packet) {
                Ok(decoded) => Ok(pipeline.push(decoded, Some(ts))?),
                Err(e) => Err(e),
            };
            match decoded {
                Ok(chunks) => {
                    for chunk in chunks {
                        device.play(&chunk.samples)?;
                    }
                }
                Err(e) => {
                    stream.skip_packet(ts, e);
                    continue;
                }
            }

            *last_played = Some(ts);
            self.shared.set_position(stream.seconds_at(ts));
        }
    }
}

/// Whether another reopen is allowed after `retries` earlier ones.
fn should_retry(retries: u32, max_retries: Option<u32>) -> bool {
    max_retries.is_none_or(|max| retries < max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_cap() {
        assert!(should_retry(0, Some(5)));
        assert!(should_retry(4, Some(5)));
        assert!(!should_retry(5, Some(5)));
        assert!(!should_retry(0, Some(0)));
    }

    #[test]
    fn unbounded_retries() {
        assert!(should_retry(1_000, None));
    }

    #[test]
    fn cleanup_is_idempotent_on_empty_stages() {
        let mut stages = Stages::default();
        stages.cleanup(true);
        stages.cleanup(false);
        assert!(stages.device.is_none() && stages.stream.is_none());
    }
}

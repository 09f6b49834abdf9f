//! Optional stream-copy recorder.
//!
//! Packets are mirrored to a temp file while the track plays. When the track
//! ends without a quit, even early, that file moves to
//! `<save_dir>/<station>/<artist> - <title>.<ext>`; until then nothing exists
//! at the final path.

mod container;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use symphonia::core::codecs::CodecParameters;
use symphonia::core::formats::Packet;
use symphonia::core::units::TimeBase;

pub use container::ContainerKind;
use container::{ContainerWriter, create_writer};

use crate::error::PlayerError;

/// Who is playing; used only to name the recording.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackIdentity {
    pub station: String,
    pub artist: String,
    pub title: String,
}

/// Replace characters that cannot appear in a path component.
pub fn sanitize_component(s: &str) -> String {
    s.chars()
        .map(|c| if c == '/' || c == '\0' { ' ' } else { c })
        .collect()
}

/// Where a session records to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordingPlan {
    pub kind: ContainerKind,
    pub temp_path: PathBuf,
    pub final_path: PathBuf,
}

/// Decide whether and where to record. `None` disables recording.
///
/// Creates the station directory when recording is enabled.
pub fn plan_recording(
    save_dir: Option<&Path>,
    temp_dir: &Path,
    identity: &TrackIdentity,
    params: &CodecParameters,
) -> Option<RecordingPlan> {
    let save_dir = save_dir?;
    let Some(kind) = ContainerKind::for_codec(params) else {
        tracing::warn!(codec = ?params.codec, "codec cannot be stream-copied; not recording");
        return None;
    };

    let station_dir = save_dir.join(sanitize_component(&identity.station));
    let filename = format!(
        "{} - {}.{}",
        sanitize_component(&identity.artist),
        sanitize_component(&identity.title),
        kind.extension()
    );
    let final_path = station_dir.join(&filename);
    if final_path.exists() {
        tracing::info!(path = %final_path.display(), "recording exists; not overwriting");
        return None;
    }
    if let Err(e) = fs::create_dir_all(&station_dir) {
        tracing::warn!(dir = %station_dir.display(), "cannot create station dir: {e}");
        return None;
    }

    Some(RecordingPlan {
        kind,
        temp_path: temp_dir.join(&filename),
        final_path,
    })
}

/// Rescale `ts` between time bases, rounding down.
pub fn rescale_ts(ts: u64, from: TimeBase, to: TimeBase) -> u64 {
    if from.denom == 0 || to.numer == 0 {
        return ts;
    }
    let num = ts as u128 * from.numer as u128 * to.denom as u128;
    let den = from.denom as u128 * to.numer as u128;
    (num / den).min(u64::MAX as u128) as u64
}

/// An open recording.
pub struct Recorder {
    writer: Box<dyn ContainerWriter>,
    plan: RecordingPlan,
    in_time_base: TimeBase,
    out_time_base: TimeBase,
    last_ts: Option<u64>,
    packets: u64,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("plan", &self.plan)
            .field("last_ts", &self.last_ts)
            .field("packets", &self.packets)
            .finish()
    }
}

impl Recorder {
    /// Open the temp file and write the container header.
    pub fn create(
        plan: RecordingPlan,
        params: &CodecParameters,
        in_time_base: TimeBase,
    ) -> Result<Self, PlayerError> {
        let rate = params
            .sample_rate
            .filter(|r| *r > 0)
            .ok_or_else(|| PlayerError::Recorder("stream has no sample rate".into()))?;
        let writer = create_writer(plan.kind, &plan.temp_path, params).map_err(|e| {
            PlayerError::Recorder(format!("{}: {e}", plan.temp_path.display()))
        })?;
        tracing::info!(
            temp = %plan.temp_path.display(),
            dest = %plan.final_path.display(),
            container = ?plan.kind,
            "recording"
        );
        Ok(Self {
            writer,
            plan,
            in_time_base,
            out_time_base: TimeBase::new(1, rate),
            last_ts: None,
            packets: 0,
        })
    }

    /// Append one compressed packet. Returns `false` when the packet was
    /// already recorded (its timestamp is not after the last one written).
    pub fn mirror(&mut self, packet: &Packet) -> Result<bool, PlayerError> {
        let ts = rescale_ts(packet.ts(), self.in_time_base, self.out_time_base);
        if self.last_ts.is_some_and(|last| ts <= last) {
            return Ok(false);
        }
        self.writer
            .write_packet(&packet.data)
            .map_err(|e| PlayerError::Recorder(format!("write: {e}")))?;
        self.last_ts = Some(ts);
        self.packets += 1;
        Ok(true)
    }

    /// Write the trailer and move the recording into place.
    pub fn finalize(self) -> Result<PathBuf, PlayerError> {
        let Recorder {
            writer,
            plan,
            packets,
            ..
        } = self;
        writer
            .finish()
            .map_err(|e| PlayerError::Recorder(format!("trailer: {e}")))?;
        if plan.final_path.exists() {
            return Err(PlayerError::Recorder(format!(
                "{} appeared during playback; left recording at {}",
                plan.final_path.display(),
                plan.temp_path.display()
            )));
        }
        move_into_place(&plan.temp_path, &plan.final_path)
            .map_err(|e| PlayerError::Recorder(format!("move: {e}")))?;
        tracing::info!(path = %plan.final_path.display(), packets, "recording saved");
        Ok(plan.final_path)
    }

    /// Leave the temp file where it is.
    pub fn abandon(self) {
        tracing::info!(temp = %self.plan.temp_path.display(), "recording abandoned");
    }
}

/// Rename `from` to `to`. Across filesystems, copy to `<to>.part` next to the
/// destination first so `to` still appears in one step.
fn move_into_place(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            tracing::debug!("rename failed ({rename_err}); copying");
            let mut part = to.as_os_str().to_owned();
            part.push(".part");
            let part = PathBuf::from(part);
            fs::copy(from, &part)?;
            fs::File::open(&part)?.sync_all()?;
            if let Err(e) = fs::rename(&part, to) {
                let _ = fs::remove_file(&part);
                return Err(e);
            }
            fs::remove_file(from)
        }
    }
}

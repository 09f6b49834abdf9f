//! Stream-copy container writers.
//!
//! Each writer takes compressed packets exactly as the demuxer produced them
//! and wraps them in the smallest container that plays back standalone.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use symphonia::core::codecs::{
    CODEC_TYPE_AAC, CODEC_TYPE_MP1, CODEC_TYPE_MP2, CODEC_TYPE_MP3, CODEC_TYPE_PCM_F32LE,
    CODEC_TYPE_PCM_S16LE, CODEC_TYPE_PCM_S24LE, CODEC_TYPE_PCM_S32LE, CodecParameters,
};

/// Output container chosen from the input codec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContainerKind {
    /// MPEG audio frames back to back.
    MpegElementary,
    /// AAC raw frames, each behind a synthesized ADTS header.
    Adts,
    /// Little-endian PCM in a RIFF/WAVE file.
    Wav,
}

impl ContainerKind {
    pub fn for_codec(params: &CodecParameters) -> Option<Self> {
        match params.codec {
            CODEC_TYPE_MP1 | CODEC_TYPE_MP2 | CODEC_TYPE_MP3 => Some(Self::MpegElementary),
            CODEC_TYPE_AAC => Some(Self::Adts),
            CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S32LE
            | CODEC_TYPE_PCM_F32LE => Some(Self::Wav),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::MpegElementary => "mp3",
            Self::Adts => "aac",
            Self::Wav => "wav",
        }
    }
}

pub(crate) trait ContainerWriter: Send {
    fn write_packet(&mut self, data: &[u8]) -> io::Result<()>;

    /// Write the trailer, flush and sync to disk.
    fn finish(self: Box<Self>) -> io::Result<()>;
}

/// Create the temp file at `path` and write the container header.
pub(crate) fn create_writer(
    kind: ContainerKind,
    path: &Path,
    params: &CodecParameters,
) -> io::Result<Box<dyn ContainerWriter>> {
    let file = File::create(path)?;
    match kind {
        ContainerKind::MpegElementary => Ok(Box::new(RawWriter::new(file, None)?)),
        ContainerKind::Adts => {
            let header = AdtsHeader::from_params(params)?;
            Ok(Box::new(RawWriter::new(file, Some(header))?))
        }
        ContainerKind::Wav => Ok(Box::new(WavWriter::new(file, params)?)),
    }
}

struct RawWriter {
    sync: File,
    out: BufWriter<File>,
    adts: Option<AdtsHeader>,
}

impl RawWriter {
    fn new(file: File, adts: Option<AdtsHeader>) -> io::Result<Self> {
        Ok(Self {
            sync: file.try_clone()?,
            out: BufWriter::new(file),
            adts,
        })
    }
}

impl ContainerWriter for RawWriter {
    fn write_packet(&mut self, data: &[u8]) -> io::Result<()> {
        if let Some(adts) = &self.adts {
            self.out.write_all(&adts.encode(data.len())?)?;
        }
        self.out.write_all(data)
    }

    fn finish(mut self: Box<Self>) -> io::Result<()> {
        self.out.flush()?;
        self.sync.sync_all()
    }
}

/// Fixed part of an ADTS header for one AAC stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct AdtsHeader {
    object_type: u8,
    sample_rate_index: u8,
    channel_config: u8,
}

const ADTS_HEADER_LEN: usize = 7;
const ADTS_MAX_FRAME_LEN: usize = (1 << 13) - 1;
const AAC_SAMPLE_RATES: [u32; 13] = [
    96_000, 88_200, 64_000, 48_000, 44_100, 32_000, 24_000, 22_050, 16_000, 12_000, 11_025, 8_000,
    7_350,
];

impl AdtsHeader {
    /// Prefer the AudioSpecificConfig in `extra_data`; otherwise assume AAC-LC
    /// at the declared rate and channel count.
    pub(crate) fn from_params(params: &CodecParameters) -> io::Result<Self> {
        if let Some(asc) = params.extra_data.as_deref() {
            if asc.len() >= 2 {
                let object_type = asc[0] >> 3;
                let sample_rate_index = ((asc[0] & 0x07) << 1) | (asc[1] >> 7);
                let channel_config = (asc[1] >> 3) & 0x0F;
                if (1..=4).contains(&object_type) && sample_rate_index < 13 && channel_config > 0 {
                    return Ok(Self {
                        object_type,
                        sample_rate_index,
                        channel_config,
                    });
                }
            }
        }

        let rate = params.sample_rate.unwrap_or(0);
        let sample_rate_index = AAC_SAMPLE_RATES
            .iter()
            .position(|r| *r == rate)
            .ok_or_else(|| invalid(format!("no ADTS index for {rate} Hz")))?
            as u8;
        let channels = params.channels.map(|c| c.count()).unwrap_or(0);
        let channel_config = match channels {
            1..=6 => channels as u8,
            8 => 7,
            n => return Err(invalid(format!("no ADTS channel config for {n} channels"))),
        };
        Ok(Self {
            object_type: 2,
            sample_rate_index,
            channel_config,
        })
    }

    pub(crate) fn encode(&self, payload_len: usize) -> io::Result<[u8; ADTS_HEADER_LEN]> {
        let frame_len = payload_len + ADTS_HEADER_LEN;
        if frame_len > ADTS_MAX_FRAME_LEN {
            return Err(invalid(format!("AAC frame of {payload_len} bytes too large for ADTS")));
        }
        let profile = (self.object_type - 1) & 0x03;
        let ch = self.channel_config;
        Ok([
            0xFF,
            0xF1,
            (profile << 6) | ((self.sample_rate_index & 0x0F) << 2) | ((ch >> 2) & 0x01),
            ((ch & 0x03) << 6) | ((frame_len >> 11) & 0x03) as u8,
            ((frame_len >> 3) & 0xFF) as u8,
            (((frame_len & 0x07) << 5) as u8) | 0x1F,
            0xFC,
        ])
    }
}

#[derive(Clone, Copy, Debug)]
enum PcmLayout {
    S16,
    S24,
    S32,
    F32,
}

impl PcmLayout {
    fn width(self) -> usize {
        match self {
            Self::S16 => 2,
            Self::S24 => 3,
            Self::S32 | Self::F32 => 4,
        }
    }
}

struct WavWriter {
    sync: File,
    out: hound::WavWriter<BufWriter<File>>,
    layout: PcmLayout,
    partial: Vec<u8>,
}

impl WavWriter {
    fn new(file: File, params: &CodecParameters) -> io::Result<Self> {
        let (layout, bits, sample_format) = match params.codec {
            CODEC_TYPE_PCM_S16LE => (PcmLayout::S16, 16, hound::SampleFormat::Int),
            CODEC_TYPE_PCM_S24LE => (PcmLayout::S24, 24, hound::SampleFormat::Int),
            CODEC_TYPE_PCM_S32LE => (PcmLayout::S32, 32, hound::SampleFormat::Int),
            CODEC_TYPE_PCM_F32LE => (PcmLayout::F32, 32, hound::SampleFormat::Float),
            _ => return Err(invalid("unsupported PCM layout for WAV".into())),
        };
        let channels = params.channels.map(|c| c.count()).unwrap_or(0);
        let sample_rate = params.sample_rate.unwrap_or(0);
        if channels == 0 || sample_rate == 0 {
            return Err(invalid("PCM stream without rate or channels".into()));
        }
        let spec = hound::WavSpec {
            channels: channels as u16,
            sample_rate,
            bits_per_sample: bits,
            sample_format,
        };
        let sync = file.try_clone()?;
        let out = hound::WavWriter::new(BufWriter::new(file), spec).map_err(hound_to_io)?;
        Ok(Self {
            sync,
            out,
            layout,
            partial: Vec::new(),
        })
    }
}

impl ContainerWriter for WavWriter {
    fn write_packet(&mut self, data: &[u8]) -> io::Result<()> {
        let width = self.layout.width();
        self.partial.extend_from_slice(data);
        let whole = self.partial.len() - self.partial.len() % width;
        for b in self.partial[..whole].chunks_exact(width) {
            let res = match self.layout {
                PcmLayout::S16 => self.out.write_sample(i16::from_le_bytes([b[0], b[1]])),
                PcmLayout::S24 => {
                    self.out
                        .write_sample(i32::from_le_bytes([0, b[0], b[1], b[2]]) >> 8)
                }
                PcmLayout::S32 => self
                    .out
                    .write_sample(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
                PcmLayout::F32 => self
                    .out
                    .write_sample(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            };
            res.map_err(hound_to_io)?;
        }
        self.partial.drain(..whole);
        Ok(())
    }

    fn finish(self: Box<Self>) -> io::Result<()> {
        let this = *self;
        this.out.finalize().map_err(hound_to_io)?;
        this.sync.sync_all()
    }
}

fn hound_to_io(err: hound::Error) -> io::Error {
    match err {
        hound::Error::IoError(e) => e,
        other => io::Error::other(other.to_string()),
    }
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use symphonia::core::audio::Channels;

    fn aac_params(rate: u32, channels: Channels) -> CodecParameters {
        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_AAC)
            .with_sample_rate(rate)
            .with_channels(channels);
        params
    }

    #[test]
    fn containers_follow_codec() {
        let mut params = CodecParameters::new();
        params.for_codec(CODEC_TYPE_MP3);
        assert_eq!(ContainerKind::for_codec(&params), Some(ContainerKind::MpegElementary));
        params.for_codec(CODEC_TYPE_PCM_S16LE);
        assert_eq!(ContainerKind::for_codec(&params).map(|k| k.extension()), Some("wav"));
        params.for_codec(symphonia::core::codecs::CODEC_TYPE_FLAC);
        assert_eq!(ContainerKind::for_codec(&params), None);
    }

    #[test]
    fn adts_header_for_lc_stereo_44k() {
        let params = aac_params(44_100, Channels::FRONT_LEFT | Channels::FRONT_RIGHT);
        let header = AdtsHeader::from_params(&params).unwrap();
        let bytes = header.encode(100).unwrap();
        // 107-byte frame, AAC-LC, index 4, two channels.
        assert_eq!(bytes, [0xFF, 0xF1, 0x50, 0x80, 0x0D, 0x7F, 0xFC]);
    }

    #[test]
    fn adts_header_prefers_audio_specific_config() {
        let mut params = aac_params(44_100, Channels::FRONT_LEFT | Channels::FRONT_RIGHT);
        // AAC-LC, 48 kHz (index 3), mono.
        params.with_extra_data(vec![0x11, 0x88].into_boxed_slice());
        let header = AdtsHeader::from_params(&params).unwrap();
        assert_eq!(
            header,
            AdtsHeader {
                object_type: 2,
                sample_rate_index: 3,
                channel_config: 1
            }
        );
    }

    #[test]
    fn adts_rejects_oversized_frames_and_odd_rates() {
        let params = aac_params(44_100, Channels::FRONT_LEFT | Channels::FRONT_RIGHT);
        let header = AdtsHeader::from_params(&params).unwrap();
        assert!(header.encode(ADTS_MAX_FRAME_LEN).is_err());
        assert!(AdtsHeader::from_params(&aac_params(44_000, Channels::FRONT_LEFT)).is_err());
    }

    #[test]
    fn wav_writer_buffers_partial_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        let mut params = CodecParameters::new();
        params
            .for_codec(CODEC_TYPE_PCM_S16LE)
            .with_sample_rate(8_000)
            .with_channels(Channels::FRONT_LEFT);
        let mut writer = create_writer(ContainerKind::Wav, &path, &params).unwrap();
        writer.write_packet(&[0x01, 0x00, 0x02]).unwrap();
        writer.write_packet(&[0x00]).unwrap();
        writer.finish().unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![1, 2]);
    }
}

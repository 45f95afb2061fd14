//! Audio header sniffing for WAV, FLAC, MP3, AAC, Ogg and M4A.

use crate::bmff;
use crate::parser::FormatSet;
use crate::sniff::{be_u64, find, le_u16, le_u32, le_u64, rfind, round_secs};
use crate::Parser;
use blobgate_core::FileMetadata;
use blobgate_error::{ParserError, ParserErrorKind, ParserResult};

const FORMATS: FormatSet = FormatSet {
    content_types: &[
        "audio/mpeg",
        "audio/mp3",
        "audio/wav",
        "audio/x-wav",
        "audio/ogg",
        "audio/flac",
        "audio/aac",
        "audio/m4a",
        "audio/mp4",
    ],
    extensions: &["mp3", "wav", "ogg", "oga", "opus", "flac", "aac", "m4a"],
};

/// How far past an ID3 tag to look for the first MPEG frame.
const FRAME_SEARCH_WINDOW: usize = 4096;

const MP3_V1_BITRATES: [u32; 15] = [
    0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320,
];
const MP3_V2_BITRATES: [u32; 15] = [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160];
const MP3_V1_RATES: [u32; 3] = [44100, 48000, 32000];
const AAC_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Stream parameters read from an audio header.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AudioInfo {
    /// Container or codec name, e.g. `WAV` or `MP3`
    pub format: &'static str,
    /// Channel count
    pub channels: Option<u16>,
    /// Samples per second
    pub sample_rate: Option<u32>,
    /// Bit depth for PCM and lossless formats
    pub bits_per_sample: Option<u16>,
    /// Nominal bitrate in kilobits per second
    pub bitrate_kbps: Option<u32>,
    /// Playback length in seconds
    pub duration_secs: Option<f64>,
}

impl AudioInfo {
    fn named(format: &'static str) -> Self {
        Self {
            format,
            ..Default::default()
        }
    }
}

/// Read audio stream parameters from a payload's header.
pub fn inspect_audio(data: &[u8]) -> ParserResult<AudioInfo> {
    let info = if data.starts_with(b"RIFF") && data.get(8..12) == Some(&b"WAVE"[..]) {
        inspect_wav(data)
    } else if data.starts_with(b"fLaC") {
        inspect_flac(data)
    } else if data.starts_with(b"OggS") {
        inspect_ogg(data)
    } else if bmff::is_bmff(data) {
        bmff::summarize(data).map(|movie| AudioInfo {
            duration_secs: movie.duration_secs.map(round_secs),
            ..AudioInfo::named("M4A")
        })
    } else if let Some(info) = inspect_mpeg(data) {
        Some(info)
    } else {
        return Err(ParserError::new(ParserErrorKind::Unsupported(
            "not a recognized audio format".to_string(),
        )));
    };
    info.ok_or_else(|| ParserError::malformed("truncated audio header"))
}

fn inspect_wav(data: &[u8]) -> Option<AudioInfo> {
    let mut info = AudioInfo::named("WAV");
    let mut byte_rate = None;
    let mut data_len = None;
    let mut at = 12;
    while let Some(size) = le_u32(data, at + 4) {
        let body = at + 8;
        match data.get(at..at + 4)? {
            b"fmt " => {
                info.channels = le_u16(data, body + 2);
                info.sample_rate = le_u32(data, body + 4);
                byte_rate = le_u32(data, body + 8).filter(|r| *r > 0);
                info.bits_per_sample = le_u16(data, body + 14);
            }
            b"data" => {
                data_len = Some(size);
                break;
            }
            _ => {}
        }
        let size = size as usize;
        at = body + size + (size & 1);
    }
    let byte_rate = byte_rate?;
    info.bitrate_kbps = Some((u64::from(byte_rate) * 8 / 1000) as u32);
    info.duration_secs = data_len.map(|len| round_secs(f64::from(len) / f64::from(byte_rate)));
    Some(info)
}

fn inspect_flac(data: &[u8]) -> Option<AudioInfo> {
    // STREAMINFO is always the first metadata block
    if data.get(4)? & 0x7F != 0 {
        return None;
    }
    let packed = be_u64(data, 18)?;
    let sample_rate = (packed >> 44) as u32;
    let total_samples = packed & 0xF_FFFF_FFFF;
    let mut info = AudioInfo::named("FLAC");
    info.sample_rate = Some(sample_rate);
    info.channels = Some(((packed >> 41) & 0x07) as u16 + 1);
    info.bits_per_sample = Some(((packed >> 36) & 0x1F) as u16 + 1);
    if sample_rate > 0 && total_samples > 0 {
        info.duration_secs = Some(round_secs(total_samples as f64 / f64::from(sample_rate)));
    }
    Some(info)
}

fn inspect_ogg(data: &[u8]) -> Option<AudioInfo> {
    let segments = usize::from(*data.get(26)?);
    let payload = 27 + segments;
    let head = data.get(payload..)?;
    let (mut info, granule_rate, pre_skip) = if head.starts_with(b"\x01vorbis") {
        let rate = le_u32(head, 12)?;
        let mut info = AudioInfo::named("OGG");
        info.channels = Some(u16::from(*head.get(11)?));
        info.sample_rate = Some(rate);
        (info, rate, 0)
    } else if head.starts_with(b"OpusHead") {
        let mut info = AudioInfo::named("OPUS");
        info.channels = Some(u16::from(*head.get(9)?));
        info.sample_rate = le_u32(head, 12);
        // Opus granule positions always count 48 kHz samples
        (info, 48_000, u64::from(le_u16(head, 10)?))
    } else {
        return Some(AudioInfo::named("OGG"));
    };
    let granule = rfind(data, b"OggS").and_then(|last| le_u64(data, last + 6));
    if let Some(granule) = granule.filter(|g| *g != u64::MAX)
        && granule_rate > 0
    {
        let samples = granule.saturating_sub(pre_skip);
        info.duration_secs = Some(round_secs(samples as f64 / f64::from(granule_rate)));
    }
    Some(info)
}

/// Offset of the first byte after an ID3v2 tag, or 0.
fn id3_len(data: &[u8]) -> usize {
    if !data.starts_with(b"ID3") {
        return 0;
    }
    let Some(size) = data.get(6..10) else {
        return 0;
    };
    let body = size
        .iter()
        .fold(0usize, |acc, b| (acc << 7) | usize::from(b & 0x7F));
    let footer = if data.get(5).is_some_and(|flags| flags & 0x10 != 0) {
        10
    } else {
        0
    };
    10 + body + footer
}

fn mp3_frame(data: &[u8], at: usize) -> Option<AudioInfo> {
    let header = data.get(at..at + 4)?;
    if header[0] != 0xFF || header[1] & 0xE0 != 0xE0 {
        return None;
    }
    // Layer III only; ADTS shares the sync word with layer bits 00
    if (header[1] >> 1) & 0x03 != 0x01 {
        return None;
    }
    let (bitrates, rate_divisor) = match (header[1] >> 3) & 0x03 {
        3 => (&MP3_V1_BITRATES, 1),
        2 => (&MP3_V2_BITRATES, 2),
        0 => (&MP3_V2_BITRATES, 4),
        _ => return None,
    };
    let bitrate = *bitrates.get(usize::from(header[2] >> 4))?;
    let sample_rate = *MP3_V1_RATES.get(usize::from((header[2] >> 2) & 0x03))? / rate_divisor;
    let mut info = AudioInfo::named("MP3");
    info.sample_rate = Some(sample_rate);
    info.channels = Some(if header[3] >> 6 == 3 { 1 } else { 2 });
    if bitrate > 0 {
        info.bitrate_kbps = Some(bitrate);
        let stream_bytes = data.len().saturating_sub(at) as f64;
        info.duration_secs = Some(round_secs(stream_bytes * 8.0 / f64::from(bitrate * 1000)));
    }
    Some(info)
}

fn adts_frame(data: &[u8], at: usize) -> Option<AudioInfo> {
    let header = data.get(at..at + 4)?;
    if header[0] != 0xFF || header[1] & 0xF6 != 0xF0 {
        return None;
    }
    let mut info = AudioInfo::named("AAC");
    info.sample_rate = AAC_RATES.get(usize::from((header[2] >> 2) & 0x0F)).copied();
    info.channels = Some(u16::from(((header[2] & 0x01) << 2) | (header[3] >> 6)));
    Some(info)
}

fn inspect_mpeg(data: &[u8]) -> Option<AudioInfo> {
    let start = id3_len(data);
    let window_end = data.len().min(start.saturating_add(FRAME_SEARCH_WINDOW));
    let mut at = start;
    while at < window_end {
        let next = find(&data[..window_end], &[0xFF], at)?;
        if let Some(info) = mp3_frame(data, next).or_else(|| adts_frame(data, next)) {
            return Some(info);
        }
        at = next + 1;
    }
    None
}

/// Parser for audio files.
#[derive(Debug, Clone, Default)]
pub struct AudioParser;

#[async_trait::async_trait]
impl Parser for AudioParser {
    fn name(&self) -> &str {
        "audio"
    }

    fn can_handle(&self, content_type: &str, extension: &str) -> bool {
        FORMATS.matches(content_type, extension)
    }

    fn validate(&self, data: &[u8], _metadata: &FileMetadata) -> bool {
        inspect_audio(data).is_ok()
    }

    #[tracing::instrument(skip(self, data, metadata), fields(size = data.len()))]
    async fn parse(&self, data: &[u8], mut metadata: FileMetadata) -> ParserResult<FileMetadata> {
        let info = inspect_audio(data)?;
        metadata.set_custom("format", info.format);
        if let Some(channels) = info.channels {
            metadata.set_custom("channels", channels);
        }
        if let Some(rate) = info.sample_rate {
            metadata.set_custom("sample_rate", rate);
        }
        if let Some(bits) = info.bits_per_sample {
            metadata.set_custom("bits_per_sample", bits);
        }
        if let Some(kbps) = info.bitrate_kbps {
            metadata.set_custom("bitrate_kbps", kbps);
        }
        if let Some(duration) = info.duration_secs {
            metadata.set_custom("duration", duration);
        }
        tracing::debug!(format = info.format, "Parsed audio header");
        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mp3_frame_after_id3() {
        let mut data = b"ID3\x04\0\0\0\0\0\x02xx".to_vec();
        // MPEG-1 layer III, 128 kbps, 44.1 kHz, joint stereo
        data.extend_from_slice(&[0xFF, 0xFB, 0x90, 0x44]);
        data.resize(12 + 16_000, 0);

        let info = inspect_audio(&data).unwrap();
        assert_eq!(info.format, "MP3");
        assert_eq!(info.sample_rate, Some(44100));
        assert_eq!(info.bitrate_kbps, Some(128));
        assert_eq!(info.channels, Some(2));
        assert_eq!(info.duration_secs, Some(1.0));
    }

    #[test]
    fn test_adts_header() {
        // 44.1 kHz, two channels
        let info = inspect_audio(&[0xFF, 0xF1, 0x50, 0x80, 0, 0, 0]).unwrap();
        assert_eq!(info.format, "AAC");
        assert_eq!(info.sample_rate, Some(44100));
        assert_eq!(info.channels, Some(2));
    }

    #[test]
    fn test_unknown_bytes_unsupported() {
        let err = inspect_audio(b"definitely not audio").unwrap_err();
        assert!(matches!(err.kind, ParserErrorKind::Unsupported(_)));
    }
}

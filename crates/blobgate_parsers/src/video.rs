//! Video container sniffing.

use crate::bmff;
use crate::parser::FormatSet;
use crate::sniff::{be_u32, be_u64, find, le_u32, round_secs};
use crate::Parser;
use blobgate_core::FileMetadata;
use blobgate_error::{ParserError, ParserErrorKind, ParserResult};

const FORMATS: FormatSet = FormatSet {
    content_types: &[
        "video/mp4",
        "video/mpeg",
        "video/quicktime",
        "video/x-msvideo",
        "video/x-matroska",
        "video/webm",
        "video/x-flv",
    ],
    extensions: &["mp4", "m4v", "avi", "mov", "mkv", "webm", "flv", "mpeg", "mpg"],
};

const EBML_MAGIC: &[u8] = &[0x1A, 0x45, 0xDF, 0xA3];
const MPEG_TS_PACKET: usize = 188;
/// Matroska header elements live near the start of the file.
const EBML_SCAN_WINDOW: usize = 8192;

/// Container-level fields of a video.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VideoInfo {
    /// Container name, e.g. `MP4` or `WEBM`
    pub format: &'static str,
    /// Playback length in seconds
    pub duration_secs: Option<f64>,
    /// Frame width of the first video track
    pub width: Option<u32>,
    /// Frame height of the first video track
    pub height: Option<u32>,
    /// Whether an audio track is declared, when the container says
    pub has_audio: Option<bool>,
}

impl VideoInfo {
    fn named(format: &'static str) -> Self {
        Self {
            format,
            ..Default::default()
        }
    }
}

/// Read container fields from a video payload.
pub fn inspect_video(data: &[u8]) -> ParserResult<VideoInfo> {
    if bmff::is_bmff(data) {
        let movie = bmff::summarize(data)
            .ok_or_else(|| ParserError::malformed("unreadable ftyp box"))?;
        let format = if movie.brand == "qt" { "MOV" } else { "MP4" };
        return Ok(VideoInfo {
            duration_secs: movie.duration_secs.map(round_secs),
            width: movie.width,
            height: movie.height,
            has_audio: Some(movie.has_audio),
            ..VideoInfo::named(format)
        });
    }
    if data.starts_with(EBML_MAGIC) {
        return Ok(inspect_matroska(data));
    }
    if data.starts_with(b"RIFF") && data.get(8..12) == Some(&b"AVI "[..]) {
        return inspect_avi(data).ok_or_else(|| ParserError::malformed("missing AVI main header"));
    }
    if data.starts_with(b"FLV") {
        let flags = *data
            .get(4)
            .ok_or_else(|| ParserError::malformed("truncated FLV header"))?;
        return Ok(VideoInfo {
            has_audio: Some(flags & 0x04 != 0),
            ..VideoInfo::named("FLV")
        });
    }
    if data.starts_with(&[0x00, 0x00, 0x01, 0xBA]) || data.starts_with(&[0x00, 0x00, 0x01, 0xB3]) {
        return Ok(VideoInfo::named("MPEG"));
    }
    if data.first() == Some(&0x47) && data.get(MPEG_TS_PACKET) == Some(&0x47) {
        return Ok(VideoInfo::named("MPEG-TS"));
    }
    Err(ParserError::new(ParserErrorKind::Unsupported(
        "not a recognized video container".to_string(),
    )))
}

/// Read an EBML unsigned integer or float element body of `len` bytes.
fn ebml_number(data: &[u8], at: usize, len: usize, float: bool) -> Option<f64> {
    match (len, float) {
        (4, true) => be_u32(data, at).map(|bits| f64::from(f32::from_bits(bits))),
        (8, true) => be_u64(data, at).map(f64::from_bits),
        (1..=8, false) => data
            .get(at..at + len)
            .map(|bytes| bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)) as f64),
        _ => None,
    }
}

/// Find a one-byte-size element by ID and decode its value.
fn ebml_element(window: &[u8], id: &[u8], float: bool) -> Option<f64> {
    let pos = find(window, id, 0)?;
    let size_byte = *window.get(pos + id.len())?;
    // Only single-byte size descriptors (high bit set)
    if size_byte & 0x80 == 0 {
        return None;
    }
    let len = usize::from(size_byte & 0x7F);
    ebml_number(window, pos + id.len() + 1, len, float)
}

fn inspect_matroska(data: &[u8]) -> VideoInfo {
    let window = &data[..data.len().min(EBML_SCAN_WINDOW)];
    let format = if find(window, b"webm", 0).is_some() {
        "WEBM"
    } else {
        "MKV"
    };
    let mut info = VideoInfo::named(format);
    let scale_ns = ebml_element(window, &[0x2A, 0xD7, 0xB1], false).unwrap_or(1_000_000.0);
    info.duration_secs = ebml_element(window, &[0x44, 0x89], true)
        .map(|ticks| round_secs(ticks * scale_ns / 1e9));
    info
}

fn inspect_avi(data: &[u8]) -> Option<VideoInfo> {
    let body = find(data, b"avih", 12)? + 8;
    let usec_per_frame = le_u32(data, body)?;
    let frames = le_u32(data, body + 16)?;
    let mut info = VideoInfo::named("AVI");
    info.width = le_u32(data, body + 32);
    info.height = le_u32(data, body + 36);
    if usec_per_frame > 0 {
        info.duration_secs = Some(round_secs(
            f64::from(frames) * f64::from(usec_per_frame) / 1e6,
        ));
    }
    Some(info)
}

/// Parser for video containers.
///
/// Videos are not transformed; parsed payloads are marked `link_only` so
/// callers serve them by reference.
#[derive(Debug, Clone, Default)]
pub struct VideoParser;

#[async_trait::async_trait]
impl Parser for VideoParser {
    fn name(&self) -> &str {
        "video"
    }

    fn can_handle(&self, content_type: &str, extension: &str) -> bool {
        FORMATS.matches(content_type, extension)
    }

    fn validate(&self, data: &[u8], _metadata: &FileMetadata) -> bool {
        inspect_video(data).is_ok()
    }

    #[tracing::instrument(skip(self, data, metadata), fields(size = data.len()))]
    async fn parse(&self, data: &[u8], mut metadata: FileMetadata) -> ParserResult<FileMetadata> {
        let info = inspect_video(data)?;
        metadata.set_custom("format", info.format);
        if let Some(duration) = info.duration_secs {
            metadata.set_custom("duration", duration);
        }
        if let (Some(w), Some(h)) = (info.width, info.height) {
            metadata.set_custom("width", w);
            metadata.set_custom("height", h);
        }
        if let Some(has_audio) = info.has_audio {
            metadata.set_custom("has_audio", has_audio);
        }
        metadata.set_custom("link_only", true);
        tracing::debug!(format = info.format, "Parsed video container");
        Ok(metadata)
    }
}

//! Image header sniffing and metadata stripping.
//!
//! Dimensions, colour mode, frame count and resolution are read from the
//! container headers of PNG, JPEG, GIF, WebP, BMP, TIFF and AVIF files
//! without decoding pixel data.

use crate::parser::FormatSet;
use crate::sniff::{be_u16, be_u32, find, le_u16, le_u24, le_u32};
use crate::{ImageParserConfig, Parser};
use blobgate_core::FileMetadata;
use blobgate_error::{ParserError, ParserErrorKind, ParserResult};
use bytes::Bytes;
use derive_getters::Getters;
use std::ops::Range;

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
const EXIF_HEADER: &[u8] = b"Exif\0\0";
const XMP_HEADER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";
const MAX_TIFF_IFDS: usize = 256;

const FORMATS: FormatSet = FormatSet {
    content_types: &[
        "image/jpeg",
        "image/png",
        "image/gif",
        "image/webp",
        "image/tiff",
        "image/bmp",
        "image/avif",
    ],
    extensions: &[
        "jpg", "jpeg", "png", "gif", "webp", "tiff", "tif", "bmp", "avif",
    ],
};

/// Image container recognized from its leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// Portable Network Graphics
    Png,
    /// JPEG/JFIF
    Jpeg,
    /// GIF87a or GIF89a
    Gif,
    /// RIFF WebP
    WebP,
    /// Windows bitmap
    Bmp,
    /// TIFF, either byte order
    Tiff,
    /// AV1 image file
    Avif,
}

impl ImageFormat {
    /// Identify the container from magic bytes.
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.starts_with(PNG_SIGNATURE) {
            Some(Self::Png)
        } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(Self::Jpeg)
        } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
            Some(Self::Gif)
        } else if data.starts_with(b"RIFF") && data.get(8..12) == Some(&b"WEBP"[..]) {
            Some(Self::WebP)
        } else if data.starts_with(b"BM") && data.len() >= 26 {
            Some(Self::Bmp)
        } else if data.starts_with(b"II*\0") || data.starts_with(b"MM\0*") {
            Some(Self::Tiff)
        } else if data.get(4..8) == Some(&b"ftyp"[..])
            && matches!(data.get(8..12), Some(b"avif") | Some(b"avis"))
        {
            Some(Self::Avif)
        } else {
            None
        }
    }

    /// Upper-case format name as reported in metadata.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Png => "PNG",
            Self::Jpeg => "JPEG",
            Self::Gif => "GIF",
            Self::WebP => "WEBP",
            Self::Bmp => "BMP",
            Self::Tiff => "TIFF",
            Self::Avif => "AVIF",
        }
    }
}

/// Header fields of an image.
#[derive(Debug, Clone, PartialEq, Getters)]
pub struct ImageInfo {
    /// Container format
    format: ImageFormat,
    /// Width in pixels, when the header carries it
    width: Option<u32>,
    /// Height in pixels, when the header carries it
    height: Option<u32>,
    /// Colour mode such as `RGB`, `RGBA`, `L` or `P`
    mode: Option<&'static str>,
    /// Number of frames, 1 for still images
    n_frames: u32,
    /// Horizontal resolution in dots per inch
    dpi: Option<u32>,
    /// Whether an EXIF block is present
    has_exif: bool,
}

impl ImageInfo {
    fn new(format: ImageFormat) -> Self {
        Self {
            format,
            width: None,
            height: None,
            mode: None,
            n_frames: 1,
            dpi: None,
            has_exif: false,
        }
    }

    fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    /// Whether the image has more than one frame.
    pub fn is_animated(&self) -> bool {
        self.n_frames > 1
    }
}

/// Read an image's header fields.
///
/// # Errors
///
/// `Unsupported` when the bytes are not a recognized image, `Malformed`
/// when a recognized header is truncated.
pub fn inspect_image(data: &[u8]) -> ParserResult<ImageInfo> {
    let format = ImageFormat::detect(data).ok_or_else(|| {
        ParserError::new(ParserErrorKind::Unsupported(
            "not a recognized image format".to_string(),
        ))
    })?;
    let info = match format {
        ImageFormat::Png => inspect_png(data),
        ImageFormat::Jpeg => inspect_jpeg(data),
        ImageFormat::Gif => inspect_gif(data),
        ImageFormat::WebP => inspect_webp(data),
        ImageFormat::Bmp => inspect_bmp(data),
        ImageFormat::Tiff => inspect_tiff(data),
        ImageFormat::Avif => Some(inspect_avif(data)),
    };
    info.ok_or_else(|| ParserError::malformed(format!("truncated {} header", format.name())))
}

struct PngChunk<'a> {
    kind: &'a [u8],
    body: &'a [u8],
    span: Range<usize>,
}

fn png_chunks(data: &[u8]) -> Vec<PngChunk<'_>> {
    let mut chunks = Vec::new();
    let mut at = PNG_SIGNATURE.len();
    while let Some(len) = be_u32(data, at) {
        let len = len as usize;
        let Some(end) = at.checked_add(12).and_then(|n| n.checked_add(len)) else {
            break;
        };
        if end > data.len() {
            break;
        }
        let kind = &data[at + 4..at + 8];
        chunks.push(PngChunk {
            kind,
            body: &data[at + 8..at + 8 + len],
            span: at..end,
        });
        at = end;
        if kind == b"IEND" {
            break;
        }
    }
    chunks
}

fn inspect_png(data: &[u8]) -> Option<ImageInfo> {
    let chunks = png_chunks(data);
    let header = chunks.first().filter(|c| c.kind == b"IHDR")?;
    let mut info = ImageInfo::new(ImageFormat::Png)
        .with_size(be_u32(header.body, 0)?, be_u32(header.body, 4)?);
    info.mode = match header.body.get(9)? {
        0 => Some("L"),
        2 => Some("RGB"),
        3 => Some("P"),
        4 => Some("LA"),
        6 => Some("RGBA"),
        _ => None,
    };
    for chunk in &chunks[1..] {
        match chunk.kind {
            b"acTL" => info.n_frames = be_u32(chunk.body, 0).unwrap_or(1).max(1),
            b"eXIf" => info.has_exif = true,
            // Unit 1 is pixels per metre
            b"pHYs" if chunk.body.get(8) == Some(&1) => {
                info.dpi = be_u32(chunk.body, 0)
                    .map(|ppm| (f64::from(ppm) * 0.0254).round() as u32);
            }
            _ => {}
        }
    }
    Some(info)
}

struct JpegSegment {
    marker: u8,
    body: Range<usize>,
    span: Range<usize>,
}

/// Segments up to and including start-of-scan, plus the scan offset.
fn jpeg_segments(data: &[u8]) -> (Vec<JpegSegment>, Option<usize>) {
    let mut segments = Vec::new();
    let mut at = 2;
    while at + 4 <= data.len() {
        if data[at] != 0xFF {
            break;
        }
        let marker = data[at + 1];
        match marker {
            0xFF => {
                at += 1;
                continue;
            }
            0x01 | 0xD0..=0xD7 => {
                at += 2;
                continue;
            }
            0xD9 => break,
            _ => {}
        }
        let Some(len) = be_u16(data, at + 2).map(usize::from) else {
            break;
        };
        let end = at + 2 + len;
        if len < 2 || end > data.len() {
            break;
        }
        segments.push(JpegSegment {
            marker,
            body: at + 4..end,
            span: at..end,
        });
        if marker == 0xDA {
            return (segments, Some(at));
        }
        at = end;
    }
    (segments, None)
}

fn inspect_jpeg(data: &[u8]) -> Option<ImageInfo> {
    let (segments, _) = jpeg_segments(data);
    let mut info = ImageInfo::new(ImageFormat::Jpeg);
    let mut found_frame = false;
    for segment in &segments {
        let body = &data[segment.body.clone()];
        match segment.marker {
            0xC0..=0xCF if !matches!(segment.marker, 0xC4 | 0xC8 | 0xCC) => {
                info = info.with_size(
                    u32::from(be_u16(body, 3)?),
                    u32::from(be_u16(body, 1)?),
                );
                info.mode = match body.get(5) {
                    Some(1) => Some("L"),
                    Some(3) => Some("RGB"),
                    Some(4) => Some("CMYK"),
                    _ => None,
                };
                found_frame = true;
            }
            0xE0 if body.starts_with(b"JFIF\0") => {
                let density = be_u16(body, 8).map(u32::from);
                info.dpi = match body.get(7) {
                    Some(1) => density,
                    Some(2) => density.map(|d| (f64::from(d) * 2.54).round() as u32),
                    _ => None,
                };
            }
            0xE1 if body.starts_with(EXIF_HEADER) => info.has_exif = true,
            _ => {}
        }
    }
    found_frame.then_some(info)
}

fn skip_sub_blocks(data: &[u8], mut at: usize) -> Option<usize> {
    loop {
        let size = usize::from(*data.get(at)?);
        at += 1;
        if size == 0 {
            return Some(at);
        }
        at += size;
    }
}

fn color_table_len(flags: u8) -> usize {
    if flags & 0x80 != 0 {
        3 * (1usize << ((flags & 0x07) + 1))
    } else {
        0
    }
}

fn inspect_gif(data: &[u8]) -> Option<ImageInfo> {
    let width = u32::from(le_u16(data, 6)?);
    let height = u32::from(le_u16(data, 8)?);
    let mut at = 13 + color_table_len(*data.get(10)?);
    let mut frames = 0u32;
    loop {
        match data.get(at) {
            Some(0x2C) => {
                frames += 1;
                let Some(&local) = data.get(at + 9) else {
                    break;
                };
                // Descriptor, local table, then the LZW code size byte
                let Some(next) = skip_sub_blocks(data, at + 10 + color_table_len(local) + 1)
                else {
                    break;
                };
                at = next;
            }
            Some(0x21) => {
                let Some(next) = skip_sub_blocks(data, at + 2) else {
                    break;
                };
                at = next;
            }
            _ => break,
        }
    }
    let mut info = ImageInfo::new(ImageFormat::Gif).with_size(width, height);
    info.mode = Some("P");
    info.n_frames = frames.max(1);
    Some(info)
}

fn inspect_webp(data: &[u8]) -> Option<ImageInfo> {
    let mut info = ImageInfo::new(ImageFormat::WebP);
    let mut frames = 0u32;
    let mut at = 12;
    while let Some(size) = le_u32(data, at + 4) {
        let body = at + 8;
        match data.get(at..at + 4)? {
            b"VP8 " => {
                info = info.with_size(
                    u32::from(le_u16(data, body + 6)? & 0x3FFF),
                    u32::from(le_u16(data, body + 8)? & 0x3FFF),
                );
                if info.mode.is_none() {
                    info.mode = Some("RGB");
                }
            }
            b"VP8L" => {
                let bits = le_u32(data, body + 1)?;
                info = info.with_size((bits & 0x3FFF) + 1, ((bits >> 14) & 0x3FFF) + 1);
                info.mode = Some(if (bits >> 28) & 1 == 1 { "RGBA" } else { "RGB" });
            }
            b"VP8X" => {
                let flags = *data.get(body)?;
                info = info.with_size(le_u24(data, body + 4)? + 1, le_u24(data, body + 7)? + 1);
                info.mode = Some(if flags & 0x10 != 0 { "RGBA" } else { "RGB" });
                info.has_exif |= flags & 0x08 != 0;
            }
            b"ANMF" => frames += 1,
            b"EXIF" => info.has_exif = true,
            _ => {}
        }
        let size = size as usize;
        at = body + size + (size & 1);
    }
    info.n_frames = frames.max(1);
    info.width.is_some().then_some(info)
}

fn inspect_bmp(data: &[u8]) -> Option<ImageInfo> {
    let width = le_u32(data, 18)? as i32;
    let height = le_u32(data, 22)? as i32;
    let mut info =
        ImageInfo::new(ImageFormat::Bmp).with_size(width.unsigned_abs(), height.unsigned_abs());
    info.mode = match le_u16(data, 28) {
        Some(32) => Some("RGBA"),
        Some(24) => Some("RGB"),
        Some(1..=8) => Some("P"),
        _ => None,
    };
    if le_u32(data, 14).is_some_and(|header| header >= 40) {
        info.dpi = le_u32(data, 38)
            .filter(|ppm| *ppm > 0)
            .map(|ppm| (f64::from(ppm) * 0.0254).round() as u32);
    }
    Some(info)
}

struct TiffReader<'a> {
    data: &'a [u8],
    little: bool,
}

impl TiffReader<'_> {
    fn u16(&self, at: usize) -> Option<u16> {
        if self.little {
            le_u16(self.data, at)
        } else {
            be_u16(self.data, at)
        }
    }

    fn u32(&self, at: usize) -> Option<u32> {
        if self.little {
            le_u32(self.data, at)
        } else {
            be_u32(self.data, at)
        }
    }

    /// Inline value of a SHORT or LONG entry.
    fn value(&self, entry: usize) -> Option<u32> {
        match self.u16(entry + 2)? {
            3 => self.u16(entry + 8).map(u32::from),
            4 => self.u32(entry + 8),
            _ => None,
        }
    }
}

fn inspect_tiff(data: &[u8]) -> Option<ImageInfo> {
    let reader = TiffReader {
        data,
        little: data.starts_with(b"II"),
    };
    let mut info = ImageInfo::new(ImageFormat::Tiff);
    let mut offset = reader.u32(4)? as usize;
    let mut frames = 0u32;
    let mut visited = Vec::new();
    while offset != 0 && visited.len() < MAX_TIFF_IFDS && !visited.contains(&offset) {
        visited.push(offset);
        let entries = usize::from(reader.u16(offset)?);
        if frames == 0 {
            let (mut width, mut height) = (None, None);
            for i in 0..entries {
                let entry = offset + 2 + i * 12;
                match reader.u16(entry)? {
                    256 => width = reader.value(entry),
                    257 => height = reader.value(entry),
                    262 => {
                        info.mode = match reader.value(entry) {
                            Some(0 | 1) => Some("L"),
                            Some(2) => Some("RGB"),
                            Some(3) => Some("P"),
                            Some(5) => Some("CMYK"),
                            _ => None,
                        }
                    }
                    34665 => info.has_exif = true,
                    _ => {}
                }
            }
            if let (Some(w), Some(h)) = (width, height) {
                info = info.with_size(w, h);
            }
        }
        frames += 1;
        offset = reader.u32(offset + 2 + entries * 12).unwrap_or(0) as usize;
    }
    info.n_frames = frames.max(1);
    Some(info)
}

fn inspect_avif(data: &[u8]) -> ImageInfo {
    let info = ImageInfo::new(ImageFormat::Avif);
    // Image spatial extents property: size, type, version/flags, width, height
    match find(data, b"ispe", 0) {
        Some(pos) => match (be_u32(data, pos + 8), be_u32(data, pos + 12)) {
            (Some(w), Some(h)) => info.with_size(w, h),
            _ => info,
        },
        None => info,
    }
}

/// Image bytes with privacy-sensitive metadata removed.
#[derive(Debug, Clone, PartialEq, Getters)]
pub struct StrippedImage {
    /// Rewritten image
    data: Vec<u8>,
    /// Kinds of metadata removed, e.g. `exif`, `xmp`, `comment`
    removed: Vec<String>,
}

impl StrippedImage {
    /// Consume into the rewritten bytes.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Remove EXIF, XMP, IPTC and comments from a JPEG, or text, time and
/// EXIF chunks from a PNG.
///
/// Returns `None` when the format is not supported or nothing was removed,
/// so a returned image is always strictly smaller than the input.
///
/// # Examples
///
/// ```
/// use blobgate_parsers::strip_metadata;
///
/// assert!(strip_metadata(b"plain text").is_none());
/// ```
pub fn strip_metadata(data: &[u8]) -> Option<StrippedImage> {
    match ImageFormat::detect(data)? {
        ImageFormat::Jpeg => strip_jpeg(data),
        ImageFormat::Png => strip_png(data),
        _ => None,
    }
}

fn note(removed: &mut Vec<String>, kind: &str) {
    if !removed.iter().any(|k| k == kind) {
        removed.push(kind.to_string());
    }
}

fn strip_jpeg(data: &[u8]) -> Option<StrippedImage> {
    let (segments, scan_start) = jpeg_segments(data);
    let scan_start = scan_start?;
    let mut out = Vec::with_capacity(data.len());
    out.extend_from_slice(&data[..2]);
    let mut removed = Vec::new();
    for segment in &segments {
        if segment.marker == 0xDA {
            break;
        }
        let body = &data[segment.body.clone()];
        let dropped = match segment.marker {
            0xE1 if body.starts_with(EXIF_HEADER) => Some("exif"),
            0xE1 if body.starts_with(XMP_HEADER) => Some("xmp"),
            0xED => Some("iptc"),
            0xFE => Some("comment"),
            _ => None,
        };
        match dropped {
            Some(kind) => note(&mut removed, kind),
            None => out.extend_from_slice(&data[segment.span.clone()]),
        }
    }
    out.extend_from_slice(&data[scan_start..]);
    (!removed.is_empty() && out.len() < data.len()).then_some(StrippedImage { data: out, removed })
}

fn strip_png(data: &[u8]) -> Option<StrippedImage> {
    let chunks = png_chunks(data);
    let last = chunks.last().filter(|c| c.kind == b"IEND")?;
    let tail = last.span.end;
    let mut out = Vec::with_capacity(data.len());
    out.extend_from_slice(PNG_SIGNATURE);
    let mut removed = Vec::new();
    for chunk in &chunks {
        let dropped = match chunk.kind {
            b"tEXt" | b"zTXt" | b"iTXt" => Some("text"),
            b"tIME" => Some("time"),
            b"eXIf" => Some("exif"),
            _ => None,
        };
        match dropped {
            Some(kind) => note(&mut removed, kind),
            None => out.extend_from_slice(&data[chunk.span.clone()]),
        }
    }
    out.extend_from_slice(&data[tail..]);
    (!removed.is_empty() && out.len() < data.len()).then_some(StrippedImage { data: out, removed })
}

/// Parser for still and animated images.
#[derive(Debug, Clone, Default)]
pub struct ImageParser {
    config: ImageParserConfig,
}

impl ImageParser {
    /// Create a parser with the given options.
    pub fn new(config: ImageParserConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl Parser for ImageParser {
    fn name(&self) -> &str {
        "image"
    }

    fn can_handle(&self, content_type: &str, extension: &str) -> bool {
        FORMATS.matches(content_type, extension)
    }

    fn validate(&self, data: &[u8], _metadata: &FileMetadata) -> bool {
        let max = *self.config.max_dimension();
        match inspect_image(data) {
            Ok(info) => match (info.width, info.height) {
                (Some(w), Some(h)) => w > 0 && h > 0 && w <= max && h <= max,
                _ => true,
            },
            Err(e) => {
                tracing::debug!(error = %e, "Image failed validation");
                false
            }
        }
    }

    #[tracing::instrument(skip(self, data, metadata), fields(size = data.len()))]
    async fn parse(&self, data: &[u8], mut metadata: FileMetadata) -> ParserResult<FileMetadata> {
        let info = inspect_image(data)?;
        metadata.set_custom("format", info.format.name());
        if let (Some(w), Some(h)) = (info.width, info.height) {
            metadata.set_custom("width", w);
            metadata.set_custom("height", h);
        }
        if let Some(mode) = info.mode {
            metadata.set_custom("mode", mode);
        }
        metadata.set_custom("is_animated", info.is_animated());
        metadata.set_custom("n_frames", info.n_frames);
        if let Some(dpi) = info.dpi {
            metadata.set_custom("dpi", dpi);
        }
        metadata.set_custom("has_exif", info.has_exif);
        tracing::debug!(format = info.format.name(), "Parsed image header");
        Ok(metadata)
    }

    #[tracing::instrument(skip(self, data, metadata), fields(size = data.len()))]
    async fn optimize(
        &self,
        data: Bytes,
        mut metadata: FileMetadata,
    ) -> ParserResult<(Bytes, FileMetadata)> {
        if !self.config.strip_metadata() {
            return Ok((data, metadata));
        }
        let Some(stripped) = strip_metadata(&data) else {
            return Ok((data, metadata));
        };
        let saved = data.len() - stripped.data.len();
        if metadata.original_size.is_none() {
            metadata.original_size = Some(data.len() as u64);
        }
        metadata.set_custom("optimized", true);
        metadata.set_custom("stripped_metadata", stripped.removed.clone());
        let data = Bytes::from(stripped.into_data());
        metadata.set_payload_len(data.len());
        tracing::debug!(saved, "Stripped image metadata");
        Ok((data, metadata))
    }
}

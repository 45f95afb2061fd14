//! Tests for image header parsing and metadata stripping.

use blobgate_core::FileMetadata;
use blobgate_parsers::{
    ImageFormat, ImageParser, ImageParserConfig, Parser, inspect_image, strip_metadata,
};
use bytes::Bytes;

fn png_chunk(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = (body.len() as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(body);
    out.extend_from_slice(&[0, 0, 0, 0]);
    out
}

fn png(width: u32, height: u32, with_text: bool) -> Vec<u8> {
    let mut ihdr = width.to_be_bytes().to_vec();
    ihdr.extend_from_slice(&height.to_be_bytes());
    ihdr.extend_from_slice(&[8, 6, 0, 0, 0]);

    let mut data = b"\x89PNG\r\n\x1a\n".to_vec();
    data.extend(png_chunk(b"IHDR", &ihdr));
    if with_text {
        data.extend(png_chunk(b"tEXt", b"Comment\0made with care"));
        data.extend(png_chunk(b"tIME", &[0x07, 0xE8, 1, 2, 3, 4, 5]));
    }
    data.extend(png_chunk(b"IDAT", &[0x78, 0x9C, 0x01, 0x02]));
    data.extend(png_chunk(b"IEND", &[]));
    data
}

fn segment(marker: u8, body: &[u8]) -> Vec<u8> {
    let mut out = vec![0xFF, marker];
    out.extend_from_slice(&((body.len() + 2) as u16).to_be_bytes());
    out.extend_from_slice(body);
    out
}

/// 64x32 RGB JPEG header with JFIF at 72 dpi, EXIF and a comment.
fn jpeg() -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8];
    data.extend(segment(0xE0, b"JFIF\0\x01\x01\x01\0\x48\0\x48\0\0"));
    data.extend(segment(0xE1, b"Exif\0\0MM\0*\0\0\0\x08camera details"));
    data.extend(segment(0xFE, b"shot on a phone"));
    let mut sof = vec![8, 0, 32, 0, 64, 3];
    sof.extend_from_slice(&[1, 0x22, 0, 2, 0x11, 1, 3, 0x11, 1]);
    data.extend(segment(0xC0, &sof));
    data.extend(segment(0xDA, &[3, 1, 0, 2, 0x11, 3, 0x11, 0, 0x3F, 0]));
    data.extend_from_slice(&[0x12, 0x34, 0xFF, 0x00, 0x56]);
    data.extend_from_slice(&[0xFF, 0xD9]);
    data
}

/// Two-frame GIF with a two-colour global table.
fn animated_gif() -> Vec<u8> {
    let mut data = b"GIF89a".to_vec();
    data.extend_from_slice(&[10, 0, 12, 0, 0x80, 0, 0]);
    data.extend_from_slice(&[0, 0, 0, 255, 255, 255]);
    data.extend_from_slice(&[0x21, 0xFF, 0x0B]);
    data.extend_from_slice(b"NETSCAPE2.0");
    data.extend_from_slice(&[0x03, 0x01, 0x00, 0x00, 0x00]);
    for _ in 0..2 {
        data.extend_from_slice(&[0x21, 0xF9, 0x04, 0x00, 0x0A, 0x00, 0x00, 0x00]);
        data.extend_from_slice(&[0x2C, 0, 0, 0, 0, 10, 0, 12, 0, 0x00]);
        data.extend_from_slice(&[0x02, 0x02, 0x44, 0x01, 0x00]);
    }
    data.push(0x3B);
    data
}

#[test]
fn test_png_header() {
    let info = inspect_image(&png(300, 200, false)).unwrap();
    assert_eq!(*info.format(), ImageFormat::Png);
    assert_eq!(*info.width(), Some(300));
    assert_eq!(*info.height(), Some(200));
    assert_eq!(*info.mode(), Some("RGBA"));
    assert!(!info.is_animated());
}

#[test]
fn test_jpeg_header() {
    let info = inspect_image(&jpeg()).unwrap();
    assert_eq!(*info.format(), ImageFormat::Jpeg);
    assert_eq!(*info.width(), Some(64));
    assert_eq!(*info.height(), Some(32));
    assert_eq!(*info.mode(), Some("RGB"));
    assert_eq!(*info.dpi(), Some(72));
    assert!(*info.has_exif());
}

#[test]
fn test_gif_frames() {
    let info = inspect_image(&animated_gif()).unwrap();
    assert_eq!(*info.width(), Some(10));
    assert_eq!(*info.height(), Some(12));
    assert_eq!(*info.n_frames(), 2);
    assert!(info.is_animated());
}

#[tokio::test]
async fn test_parse_fills_custom_fields() {
    let data = jpeg();
    let parser = ImageParser::default();
    let metadata = FileMetadata::for_payload("image/jpeg", "jpg", &data);

    assert!(parser.validate(&data, &metadata));
    let parsed = parser.parse(&data, metadata).await.unwrap();
    assert_eq!(parsed.custom["format"], "JPEG");
    assert_eq!(parsed.custom["width"], 64);
    assert_eq!(parsed.custom["height"], 32);
    assert_eq!(parsed.custom["has_exif"], true);
    assert_eq!(parsed.custom["is_animated"], false);
}

#[test]
fn test_validate_rejects_oversized_and_non_images() {
    let parser = ImageParser::new(ImageParserConfig::default().with_max_dimension(48));
    let metadata = FileMetadata::default();
    assert!(!parser.validate(&jpeg(), &metadata));
    assert!(parser.validate(&png(48, 48, false), &metadata));
    assert!(!parser.validate(b"not an image at all", &metadata));
}

#[test]
fn test_strip_jpeg_metadata() {
    let original = jpeg();
    let stripped = strip_metadata(&original).unwrap();

    assert_eq!(stripped.removed(), &vec!["exif".to_string(), "comment".to_string()]);
    assert!(stripped.data().len() < original.len());
    assert!(stripped.data().ends_with(&[0x12, 0x34, 0xFF, 0x00, 0x56, 0xFF, 0xD9]));

    let info = inspect_image(stripped.data()).unwrap();
    assert_eq!(*info.width(), Some(64));
    assert_eq!(*info.dpi(), Some(72));
    assert!(!*info.has_exif());
}

#[test]
fn test_strip_png_metadata() {
    let original = png(4, 4, true);
    let stripped = strip_metadata(&original).unwrap();

    assert_eq!(stripped.removed(), &vec!["text".to_string(), "time".to_string()]);
    assert_eq!(stripped.data(), &png(4, 4, false));
}

#[test]
fn test_strip_without_metadata_is_none() {
    assert!(strip_metadata(&png(4, 4, false)).is_none());
    assert!(strip_metadata(&animated_gif()).is_none());
}

#[tokio::test]
async fn test_optimize_never_grows() {
    let parser = ImageParser::default();

    let data = Bytes::from(jpeg());
    let metadata = FileMetadata::for_payload("image/jpeg", "jpg", &data);
    let (optimized, meta) = parser.optimize(data.clone(), metadata).await.unwrap();
    assert!(optimized.len() < data.len());
    assert_eq!(meta.size, optimized.len() as u64);
    assert_eq!(meta.custom["optimized"], true);
    assert_eq!(meta.origin_size(), data.len() as u64);

    let clean = Bytes::from(png(8, 8, false));
    let metadata = FileMetadata::for_payload("image/png", "png", &clean);
    let (same, meta) = parser.optimize(clean.clone(), metadata.clone()).await.unwrap();
    assert_eq!(same, clean);
    assert_eq!(meta, metadata);
}

#[tokio::test]
async fn test_optimize_respects_strip_flag() {
    let parser = ImageParser::new(ImageParserConfig::default().with_strip_metadata(false));
    let data = Bytes::from(jpeg());
    let metadata = FileMetadata::for_payload("image/jpeg", "jpg", &data);

    let (out, _) = parser.optimize(data.clone(), metadata).await.unwrap();
    assert_eq!(out, data);
}

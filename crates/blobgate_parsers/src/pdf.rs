//! PDF structure sniffing.
//!
//! Reads the header version, page and image object counts, the document
//! information dictionary and, optionally, a text preview from the page
//! content streams. Compressed (`/FlateDecode`) streams are inflated for
//! the preview, up to a byte budget proportional to the preview length;
//! other filters are skipped.

use crate::parser::FormatSet;
use crate::sniff::{count, find, rfind};
use crate::{Parser, TextParserConfig};
use blobgate_core::FileMetadata;
use blobgate_error::{ParserError, ParserErrorKind, ParserResult};
use std::io::Read;

const HEADER: &[u8] = b"%PDF-";
const TRAILER: &[u8] = b"%%EOF";

const FORMATS: FormatSet = FormatSet {
    content_types: &["application/pdf"],
    extensions: &["pdf"],
};

/// Document information keys and the metadata names they are stored under.
const INFO_FIELDS: &[(&str, &[u8])] = &[
    ("title", b"/Title"),
    ("author", b"/Author"),
    ("subject", b"/Subject"),
    ("keywords", b"/Keywords"),
    ("creator", b"/Creator"),
    ("producer", b"/Producer"),
    ("creation_date", b"/CreationDate"),
    ("modification_date", b"/ModDate"),
];

fn is_delimiter(byte: u8) -> bool {
    !byte.is_ascii_alphanumeric()
}

fn skip_whitespace(data: &[u8], mut at: usize) -> usize {
    while data.get(at).is_some_and(|b| b.is_ascii_whitespace()) {
        at += 1;
    }
    at
}

/// Count `key` occurrences whose value is the name `value`, e.g. `/Type /Page`.
fn count_name_values(data: &[u8], key: &[u8], value: &[u8]) -> usize {
    let mut total = 0;
    let mut at = 0;
    while let Some(pos) = find(data, key, at) {
        at = pos + key.len();
        let start = skip_whitespace(data, at);
        if data[start..].starts_with(value)
            && data.get(start + value.len()).is_none_or(|b| is_delimiter(*b))
        {
            total += 1;
        }
    }
    total
}

/// Parse a literal string starting at the opening parenthesis.
fn literal_string(data: &[u8], open: usize) -> Option<(Vec<u8>, usize)> {
    if data.get(open) != Some(&b'(') {
        return None;
    }
    let mut out = Vec::new();
    let mut depth = 1usize;
    let mut at = open + 1;
    while let Some(&byte) = data.get(at) {
        at += 1;
        match byte {
            b'\\' => {
                let escaped = *data.get(at)?;
                at += 1;
                match escaped {
                    b'n' => out.push(b'\n'),
                    b'r' => out.push(b'\r'),
                    b't' => out.push(b'\t'),
                    b'b' => out.push(0x08),
                    b'f' => out.push(0x0C),
                    b'0'..=b'7' => {
                        let mut value = u32::from(escaped - b'0');
                        for _ in 0..2 {
                            match data.get(at) {
                                Some(d @ b'0'..=b'7') => {
                                    value = value * 8 + u32::from(d - b'0');
                                    at += 1;
                                }
                                _ => break,
                            }
                        }
                        out.push((value & 0xFF) as u8);
                    }
                    // Line continuation
                    b'\r' | b'\n' => {}
                    other => out.push(other),
                }
            }
            b'(' => {
                depth += 1;
                out.push(byte);
            }
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some((out, at));
                }
                out.push(byte);
            }
            _ => out.push(byte),
        }
    }
    None
}

/// Decode PDF text string bytes: UTF-16BE with a byte order mark, else Latin-1.
fn decode_text(raw: &[u8]) -> String {
    match raw.strip_prefix(&[0xFE, 0xFF]) {
        Some(utf16) => {
            let units: Vec<u16> = utf16
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect();
            String::from_utf16_lossy(&units)
        }
        None => raw.iter().map(|&b| char::from(b)).collect(),
    }
}

fn info_value(data: &[u8], key: &[u8]) -> Option<String> {
    let mut at = 0;
    while let Some(pos) = find(data, key, at) {
        at = pos + key.len();
        if data.get(at).is_some_and(|b| !is_delimiter(*b)) {
            continue;
        }
        let start = skip_whitespace(data, at);
        if let Some((raw, _)) = literal_string(data, start) {
            return Some(decode_text(&raw));
        }
    }
    None
}

/// Header fields of a PDF document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PdfInfo {
    /// Header version such as `1.7`
    pub version: String,
    /// Number of page objects
    pub page_count: usize,
    /// Number of image XObjects
    pub image_count: usize,
    /// Whether the trailer references an encryption dictionary
    pub is_encrypted: bool,
    /// Document information entries that were present, keyed by field name
    pub info: Vec<(&'static str, String)>,
}

/// Read a PDF's structural fields.
pub fn inspect_pdf(data: &[u8]) -> ParserResult<PdfInfo> {
    if !data.starts_with(HEADER) {
        return Err(ParserError::new(ParserErrorKind::Unsupported(
            "missing %PDF- header".to_string(),
        )));
    }
    let version: String = data[HEADER.len()..]
        .iter()
        .take_while(|b| b.is_ascii_digit() || **b == b'.')
        .map(|&b| char::from(b))
        .collect();
    if version.is_empty() {
        return Err(ParserError::malformed("PDF header has no version"));
    }
    let is_encrypted = find(data, b"/Encrypt", 0).is_some();
    let info = if is_encrypted {
        Vec::new()
    } else {
        INFO_FIELDS
            .iter()
            .filter_map(|(name, key)| info_value(data, key).map(|value| (*name, value)))
            .collect()
    };
    Ok(PdfInfo {
        version,
        page_count: count_name_values(data, b"/Type", b"/Page"),
        image_count: count_name_values(data, b"/Subtype", b"/Image"),
        is_encrypted,
        info,
    })
}

/// Inflated bytes allowed per requested preview character.
const INFLATE_RATIO: usize = 64;

/// Ceiling on inflated bytes across all streams of one document.
const MAX_INFLATED: usize = 8 * 1024 * 1024;

fn inflate_budget(limit: usize) -> usize {
    limit.saturating_mul(INFLATE_RATIO).clamp(4096, MAX_INFLATED)
}

/// Stream contents in document order, inflated where the dictionary names
/// `/FlateDecode`.
///
/// Inflation draws on a shared byte budget; once it is spent the remaining
/// compressed streams are not decoded.
struct ContentStreams<'a> {
    data: &'a [u8],
    at: usize,
    budget: usize,
}

impl<'a> ContentStreams<'a> {
    fn new(data: &'a [u8], budget: usize) -> Self {
        Self {
            data,
            at: 0,
            budget,
        }
    }
}

impl Iterator for ContentStreams<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        let data = self.data;
        loop {
            let pos = find(data, b"stream", self.at)?;
            self.at = pos + 6;
            // Skip the tail of "endstream"
            if pos >= 3 && &data[pos - 3..pos] == b"end" {
                continue;
            }
            let body_start = match data.get(self.at..self.at + 2) {
                Some(b"\r\n") => self.at + 2,
                Some([b'\n', _]) | Some([b'\r', _]) => self.at + 1,
                _ => continue,
            };
            let body_end = find(data, b"endstream", body_start)?;
            self.at = body_end + 9;

            let dict_start = rfind(&data[..pos], b"<<").unwrap_or(0);
            let dictionary = &data[dict_start..pos];
            let body = &data[body_start..body_end];
            if find(dictionary, b"/FlateDecode", 0).is_some() {
                if self.budget == 0 {
                    continue;
                }
                let mut inflated = Vec::new();
                let read = flate2::read::ZlibDecoder::new(body)
                    .take(self.budget as u64)
                    .read_to_end(&mut inflated);
                if read.is_ok() {
                    self.budget -= inflated.len();
                    return Some(inflated);
                }
            } else if find(dictionary, b"/Filter", 0).is_none() {
                return Some(body.to_vec());
            }
        }
    }
}

/// Collect the literal strings shown between `BT` and `ET` operators.
fn text_preview(data: &[u8], limit: usize) -> String {
    let mut text = String::new();
    let mut chars = 0usize;
    for content in ContentStreams::new(data, inflate_budget(limit)) {
        let mut at = 0;
        while let Some(begin) = find(&content, b"BT", at) {
            let end = find(&content, b"ET", begin + 2).unwrap_or(content.len());
            let mut cursor = begin + 2;
            while let Some(open) = find(&content[..end], b"(", cursor) {
                match literal_string(&content, open) {
                    Some((raw, next)) => {
                        let decoded = decode_text(&raw);
                        chars += decoded.chars().count();
                        text.push_str(&decoded);
                        cursor = next;
                    }
                    None => break,
                }
                if chars > limit {
                    break;
                }
            }
            text.push('\n');
            chars += 1;
            at = end + 2;
            if chars > limit {
                let truncated: String = text.chars().take(limit).collect();
                return format!("{}...", truncated);
            }
        }
    }
    text.trim().to_string()
}

/// Parser for PDF documents.
#[derive(Debug, Clone, Default)]
pub struct PdfParser {
    config: TextParserConfig,
}

impl PdfParser {
    /// Create a parser with the given options.
    pub fn new(config: TextParserConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl Parser for PdfParser {
    fn name(&self) -> &str {
        "pdf"
    }

    fn can_handle(&self, content_type: &str, extension: &str) -> bool {
        FORMATS.matches(content_type, extension)
    }

    fn validate(&self, data: &[u8], _metadata: &FileMetadata) -> bool {
        let tail_start = data.len().saturating_sub(1024);
        inspect_pdf(data).is_ok() && find(&data[tail_start..], TRAILER, 0).is_some()
    }

    #[tracing::instrument(skip(self, data, metadata), fields(size = data.len()))]
    async fn parse(&self, data: &[u8], mut metadata: FileMetadata) -> ParserResult<FileMetadata> {
        let info = inspect_pdf(data)?;
        metadata.set_custom("format", "PDF");
        metadata.set_custom("version", info.version.clone());
        metadata.set_custom("page_count", info.page_count);
        metadata.set_custom("image_count", info.image_count);
        metadata.set_custom("is_encrypted", info.is_encrypted);
        for (name, value) in &info.info {
            metadata.set_custom(*name, value.clone());
        }
        if *self.config.extract_text() && !info.is_encrypted {
            let preview = text_preview(data, *self.config.max_text_length());
            if !preview.is_empty() {
                metadata.set_custom("text_preview", preview);
            }
        }
        tracing::debug!(
            pages = info.page_count,
            objects = count(data, b" obj"),
            "Parsed PDF structure"
        );
        Ok(metadata)
    }
}

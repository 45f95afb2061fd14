//! Plain text, CSV and Office Open XML document statistics.

use crate::parser::FormatSet;
use crate::sniff::{bare_extension, essence, le_u16, le_u32, rfind};
use crate::{Parser, TextParserConfig};
use blobgate_core::FileMetadata;
use blobgate_error::{ParserError, ParserErrorKind, ParserResult};

const FORMATS: FormatSet = FormatSet {
    content_types: &[
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "text/csv",
        "text/plain",
        "text/markdown",
    ],
    extensions: &["docx", "xlsx", "pptx", "csv", "txt", "md"],
};

const ZIP_LOCAL_HEADER: &[u8] = b"PK\x03\x04";
const ZIP_END_OF_DIRECTORY: &[u8] = b"PK\x05\x06";
const ZIP_DIRECTORY_ENTRY: &[u8] = b"PK\x01\x02";

/// Statistics extracted from a document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DocumentInfo {
    /// `TXT`, `CSV`, `DOCX`, `XLSX` or `PPTX`
    pub format: &'static str,
    /// Lines of text
    pub line_count: Option<usize>,
    /// Whitespace separated words
    pub word_count: Option<usize>,
    /// Unicode scalar values
    pub char_count: Option<usize>,
    /// CSV data rows, excluding the header
    pub row_count: Option<usize>,
    /// CSV header fields
    pub columns: Vec<String>,
    /// Worksheets in a workbook
    pub sheet_count: Option<usize>,
    /// Slides in a presentation
    pub slide_count: Option<usize>,
    /// Entries in the OOXML package
    pub part_count: Option<usize>,
}

impl DocumentInfo {
    fn named(format: &'static str) -> Self {
        Self {
            format,
            ..Default::default()
        }
    }
}

/// Entry names from a ZIP central directory.
fn zip_entries(data: &[u8]) -> Option<Vec<String>> {
    let end = rfind(data, ZIP_END_OF_DIRECTORY)?;
    let total = usize::from(le_u16(data, end + 10)?);
    let mut at = le_u32(data, end + 16)? as usize;
    let mut names = Vec::with_capacity(total);
    for _ in 0..total {
        if data.get(at..at + 4)? != ZIP_DIRECTORY_ENTRY {
            return None;
        }
        let name_len = usize::from(le_u16(data, at + 28)?);
        let extra_len = usize::from(le_u16(data, at + 30)?);
        let comment_len = usize::from(le_u16(data, at + 32)?);
        let name = data.get(at + 46..at + 46 + name_len)?;
        names.push(String::from_utf8_lossy(name).into_owned());
        at += 46 + name_len + extra_len + comment_len;
    }
    Some(names)
}

fn inspect_package(data: &[u8]) -> ParserResult<DocumentInfo> {
    let entries =
        zip_entries(data).ok_or_else(|| ParserError::malformed("unreadable ZIP directory"))?;
    let has = |name: &str| entries.iter().any(|e| e == name);
    let counted = |prefix: &str| {
        entries
            .iter()
            .filter(|e| e.starts_with(prefix) && e.ends_with(".xml"))
            .count()
    };
    let mut info = if has("word/document.xml") {
        DocumentInfo::named("DOCX")
    } else if has("xl/workbook.xml") {
        DocumentInfo {
            sheet_count: Some(counted("xl/worksheets/sheet")),
            ..DocumentInfo::named("XLSX")
        }
    } else if has("ppt/presentation.xml") {
        DocumentInfo {
            slide_count: Some(counted("ppt/slides/slide")),
            ..DocumentInfo::named("PPTX")
        }
    } else {
        return Err(ParserError::new(ParserErrorKind::Unsupported(
            "ZIP archive is not an Office Open XML package".to_string(),
        )));
    };
    info.part_count = Some(entries.len());
    Ok(info)
}

/// Split one CSV record, honouring double-quoted fields.
fn csv_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
        .into_iter()
        .map(|f| f.trim().to_string())
        .collect()
}

fn text_stats(text: &str, format: &'static str) -> DocumentInfo {
    let mut info = DocumentInfo::named(format);
    info.line_count = Some(text.lines().count());
    info.word_count = Some(text.split_whitespace().count());
    info.char_count = Some(text.chars().count());
    if format == "CSV" {
        let mut records = text.lines().filter(|l| !l.trim().is_empty());
        info.columns = records.next().map(csv_fields).unwrap_or_default();
        info.row_count = Some(records.count());
    }
    info
}

/// Gather statistics from a document payload.
///
/// ZIP payloads are treated as Office Open XML packages; anything else
/// must be UTF-8 text. `hint` is the declared content type or extension
/// and selects CSV handling for text.
pub fn inspect_document(data: &[u8], hint: &str) -> ParserResult<DocumentInfo> {
    if data.starts_with(ZIP_LOCAL_HEADER) {
        return inspect_package(data);
    }
    let text = std::str::from_utf8(data).map_err(|e| {
        ParserError::new(ParserErrorKind::Unsupported(format!(
            "document is neither OOXML nor UTF-8 text: {}",
            e
        )))
    })?;
    let format = if hint == "text/csv" || hint == "csv" {
        "CSV"
    } else {
        "TXT"
    };
    Ok(text_stats(text, format))
}

/// Parser for text, CSV and Office documents.
#[derive(Debug, Clone, Default)]
pub struct DocumentParser {
    config: TextParserConfig,
}

impl DocumentParser {
    /// Create a parser with the given options.
    pub fn new(config: TextParserConfig) -> Self {
        Self { config }
    }
}

fn hint(metadata: &FileMetadata) -> String {
    let content_type = essence(&metadata.content_type);
    if content_type.is_empty() {
        bare_extension(&metadata.extension)
    } else if content_type == "text/plain" && bare_extension(&metadata.extension) == "csv" {
        "csv".to_string()
    } else {
        content_type
    }
}

#[async_trait::async_trait]
impl Parser for DocumentParser {
    fn name(&self) -> &str {
        "document"
    }

    fn can_handle(&self, content_type: &str, extension: &str) -> bool {
        FORMATS.matches(content_type, extension)
    }

    fn validate(&self, data: &[u8], metadata: &FileMetadata) -> bool {
        inspect_document(data, &hint(metadata)).is_ok()
    }

    #[tracing::instrument(skip(self, data, metadata), fields(size = data.len()))]
    async fn parse(&self, data: &[u8], mut metadata: FileMetadata) -> ParserResult<FileMetadata> {
        let info = inspect_document(data, &hint(&metadata))?;
        metadata.set_custom("format", info.format);
        let counts = [
            ("line_count", info.line_count),
            ("word_count", info.word_count),
            ("char_count", info.char_count),
            ("row_count", info.row_count),
            ("sheet_count", info.sheet_count),
            ("slide_count", info.slide_count),
            ("part_count", info.part_count),
        ];
        for (name, value) in counts {
            if let Some(value) = value {
                metadata.set_custom(name, value);
            }
        }
        if !info.columns.is_empty() {
            metadata.set_custom("columns", info.columns.clone());
        }
        if *self.config.extract_text()
            && info.char_count.is_some()
            && let Ok(text) = std::str::from_utf8(data)
        {
            let limit = *self.config.max_text_length();
            let mut preview: String = text.chars().take(limit).collect();
            if info.char_count.is_some_and(|n| n > limit) {
                preview.push_str("...");
            }
            metadata.set_custom("text_content", preview);
        }
        tracing::debug!(format = info.format, "Parsed document");
        Ok(metadata)
    }
}

//! Tests for parser lookup order.

use blobgate_core::FileMetadata;
use blobgate_parsers::{DocumentParser, Parser, ParserRegistry, ParserResult, TextParserConfig};
use std::sync::Arc;

#[test]
fn test_builtin_order() {
    let registry = ParserRegistry::default();
    assert_eq!(
        registry.names(),
        vec!["image", "pdf", "audio", "video", "document"]
    );
}

#[test]
fn test_lookup_by_content_type() {
    let registry = ParserRegistry::default();
    let cases = [
        ("image/png", "image"),
        ("application/pdf", "pdf"),
        ("audio/mpeg", "audio"),
        ("video/webm", "video"),
        ("text/csv", "document"),
        ("Text/Plain; charset=utf-8", "document"),
    ];
    for (content_type, expected) in cases {
        let parser = registry.get_parser(content_type, "").unwrap();
        assert_eq!(parser.name(), expected, "content type {}", content_type);
    }
}

#[test]
fn test_lookup_by_extension() {
    let registry = ParserRegistry::default();
    assert_eq!(registry.get_parser("", ".JPG").unwrap().name(), "image");
    assert_eq!(registry.get_parser("", "flac").unwrap().name(), "audio");
    assert_eq!(registry.get_parser("", "mkv").unwrap().name(), "video");
    assert_eq!(registry.get_parser("", "xlsx").unwrap().name(), "document");
}

#[test]
fn test_unknown_type_has_no_parser() {
    let registry = ParserRegistry::default();
    assert!(
        registry
            .get_parser("application/octet-stream", "bin")
            .is_none()
    );
    assert!(registry.get_parser("", "").is_none());
}

#[derive(Debug)]
struct ClaimsEverything;

#[async_trait::async_trait]
impl Parser for ClaimsEverything {
    fn name(&self) -> &str {
        "catch-all"
    }

    fn can_handle(&self, _content_type: &str, _extension: &str) -> bool {
        true
    }

    fn validate(&self, _data: &[u8], _metadata: &FileMetadata) -> bool {
        true
    }

    async fn parse(&self, _data: &[u8], metadata: FileMetadata) -> ParserResult<FileMetadata> {
        Ok(metadata)
    }
}

#[test]
fn test_first_registered_match_wins() {
    let document: Arc<dyn Parser> = Arc::new(DocumentParser::new(TextParserConfig::default()));
    let catch_all: Arc<dyn Parser> = Arc::new(ClaimsEverything);

    let specific_first = ParserRegistry::with_parsers(vec![document.clone(), catch_all.clone()]);
    assert_eq!(
        specific_first.get_parser("text/plain", "txt").unwrap().name(),
        "document"
    );
    assert_eq!(
        specific_first.get_parser("model/gltf", "glb").unwrap().name(),
        "catch-all"
    );

    let generic_first = ParserRegistry::with_parsers(vec![catch_all, document]);
    assert_eq!(
        generic_first.get_parser("text/plain", "txt").unwrap().name(),
        "catch-all"
    );
}

#[tokio::test]
async fn test_default_optimize_returns_input() {
    let registry = ParserRegistry::default();
    let parser = registry.get_parser("text/plain", "txt").unwrap();
    let data = bytes::Bytes::from_static(b"unchanged text");
    let metadata = FileMetadata::for_payload("text/plain", "txt", &data);

    let (out, meta) = parser.optimize(data.clone(), metadata.clone()).await.unwrap();
    assert_eq!(out, data);
    assert_eq!(meta, metadata);
}

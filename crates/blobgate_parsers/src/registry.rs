//! Ordered parser lookup.

use crate::{
    AudioParser, DocumentParser, ImageParser, Parser, ParsersConfig, PdfParser, VideoParser,
};
use std::sync::Arc;

/// Parsers in registration order; the first that claims a type wins.
///
/// The set is fixed at construction, so lookups take `&self` and are safe
/// from any number of concurrent requests.
#[derive(Debug, Clone)]
pub struct ParserRegistry {
    parsers: Vec<Arc<dyn Parser>>,
}

impl ParserRegistry {
    /// Register the built-in parsers: image, PDF, audio, video, document.
    pub fn new(config: &ParsersConfig) -> Self {
        let parsers: Vec<Arc<dyn Parser>> = vec![
            Arc::new(ImageParser::new(config.image().clone())),
            Arc::new(PdfParser::new(config.pdf().clone())),
            Arc::new(AudioParser),
            Arc::new(VideoParser),
            Arc::new(DocumentParser::new(config.document().clone())),
        ];
        Self::with_parsers(parsers)
    }

    /// Build a registry from an explicit, ordered parser list.
    pub fn with_parsers(parsers: Vec<Arc<dyn Parser>>) -> Self {
        tracing::debug!(
            parsers = ?parsers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            "Registered parsers"
        );
        Self { parsers }
    }

    /// First parser whose `can_handle` accepts the type or extension.
    pub fn get_parser(&self, content_type: &str, extension: &str) -> Option<Arc<dyn Parser>> {
        self.parsers
            .iter()
            .find(|p| p.can_handle(content_type, extension))
            .cloned()
    }

    /// Registered parser names, in lookup order.
    pub fn names(&self) -> Vec<&str> {
        self.parsers.iter().map(|p| p.name()).collect()
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new(&ParsersConfig::default())
    }
}

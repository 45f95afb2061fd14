//! Parser options.

use derive_getters::Getters;
use serde::{Deserialize, Serialize};

fn default_max_dimension() -> u32 {
    4096
}

fn default_true() -> bool {
    true
}

fn default_max_text_length() -> usize {
    10_000
}

/// Options for the image parser.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Serialize,
    Deserialize,
    Getters,
    derive_setters::Setters,
    derive_builder::Builder,
)]
#[setters(prefix = "with_")]
#[builder(default)]
pub struct ImageParserConfig {
    /// Images wider or taller than this fail validation
    #[serde(default = "default_max_dimension")]
    max_dimension: u32,
    /// Remove EXIF, XMP and text metadata when optimizing
    #[serde(default = "default_true")]
    strip_metadata: bool,
}

impl Default for ImageParserConfig {
    fn default() -> Self {
        Self {
            max_dimension: default_max_dimension(),
            strip_metadata: true,
        }
    }
}

/// Options for the text-bearing parsers (PDF and documents).
#[derive(
    Debug,
    Clone,
    PartialEq,
    Serialize,
    Deserialize,
    Getters,
    derive_setters::Setters,
    derive_builder::Builder,
)]
#[setters(prefix = "with_")]
#[builder(default)]
pub struct TextParserConfig {
    /// Include a text preview in the parsed metadata
    #[serde(default = "default_true")]
    extract_text: bool,
    /// Preview length in characters
    #[serde(default = "default_max_text_length")]
    max_text_length: usize,
}

impl Default for TextParserConfig {
    fn default() -> Self {
        Self {
            extract_text: true,
            max_text_length: default_max_text_length(),
        }
    }
}

/// Options for every built-in parser, keyed by parser name.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Serialize,
    Deserialize,
    Getters,
    derive_setters::Setters,
)]
#[setters(prefix = "with_")]
pub struct ParsersConfig {
    /// Image parser options
    #[serde(default)]
    image: ImageParserConfig,
    /// PDF parser options
    #[serde(default)]
    pdf: TextParserConfig,
    /// Document parser options
    #[serde(default)]
    document: TextParserConfig,
}

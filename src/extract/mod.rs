//! Text and field extraction
//!
//! Runs once per capture event on the rectified image, never per frame.
//! OCR engines are external collaborators behind [`TextRecognizer`];
//! extractors turn recognizer output into results. Extraction failures
//! produce empty results, not errors — a capture always completes.

pub mod mrz;

pub use mrz::{parse_mrz, MrzError, MrzRecord};

use image::RgbaImage;
use serde::Serialize;
use tracing::warn;

/// Result of one extraction pass, produced once per rectified image and
/// immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionResult {
    /// Free-form recognized text lines.
    Text { lines: Vec<String> },
    /// Structured document fields parsed from an MRZ block.
    Document { record: MrzRecord },
}

impl ExtractionResult {
    pub fn empty() -> Self {
        ExtractionResult::Text { lines: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ExtractionResult::Text { lines } => lines.is_empty(),
            ExtractionResult::Document { .. } => false,
        }
    }
}

/// OCR seam: rectified image in, recognized text lines out, top to bottom.
pub trait TextRecognizer: Send {
    fn recognize(&mut self, image: &RgbaImage) -> anyhow::Result<Vec<String>>;
}

/// Recognizer that recognizes nothing. Wires the pipeline when no OCR
/// engine is configured.
pub struct NullRecognizer;

impl TextRecognizer for NullRecognizer {
    fn recognize(&mut self, _image: &RgbaImage) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Turns a rectified capture into an [`ExtractionResult`].
pub trait Extractor: Send {
    fn extract(&mut self, image: &RgbaImage) -> ExtractionResult;
}

/// Free OCR: every recognized line, unparsed.
pub struct TextExtractor {
    recognizer: Box<dyn TextRecognizer>,
}

impl TextExtractor {
    pub fn new(recognizer: Box<dyn TextRecognizer>) -> Self {
        Self { recognizer }
    }
}

impl Extractor for TextExtractor {
    fn extract(&mut self, image: &RgbaImage) -> ExtractionResult {
        match self.recognizer.recognize(image) {
            Ok(lines) => ExtractionResult::Text { lines },
            Err(e) => {
                warn!("Text recognition failed: {e}");
                ExtractionResult::empty()
            }
        }
    }
}

/// MRZ extraction: recognize text lines, locate an MRZ block among them,
/// parse it into document fields. Falls back to the raw lines when no
/// parsable MRZ is present.
pub struct MrzExtractor {
    recognizer: Box<dyn TextRecognizer>,
}

impl MrzExtractor {
    pub fn new(recognizer: Box<dyn TextRecognizer>) -> Self {
        Self { recognizer }
    }
}

impl Extractor for MrzExtractor {
    fn extract(&mut self, image: &RgbaImage) -> ExtractionResult {
        let lines = match self.recognizer.recognize(image) {
            Ok(lines) => lines,
            Err(e) => {
                warn!("Text recognition failed: {e}");
                return ExtractionResult::empty();
            }
        };
        match mrz::find_and_parse(&lines) {
            Some(record) => ExtractionResult::Document { record },
            None => ExtractionResult::Text { lines },
        }
    }
}

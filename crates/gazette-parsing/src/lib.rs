use thiserror::Error;

pub mod classify;
pub mod config;
pub mod dates;
pub mod fields;
pub mod money;
pub mod patterns;
pub mod text_processing;

pub use classify::{RelevanceClassifier, SignalWeights};
pub use config::{ListOverride, ParsingConfig, ParsingConfigBuilder};
pub use fields::FieldExtractor;
pub use money::{format_brl, parse_brl};
pub use patterns::{FieldKind, PatternTable, PatternVariant};
// Re-export domain types from core (canonical definitions live there)
pub use gazette_core::{CaseNumber, ClassificationDecision, ExtractedFields, Signal};

/// The text contained no well-formed case number, so it cannot become a record.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("no case number found in text")]
pub struct ExtractionEmpty;

/// Extract fields from `text` with the default pattern tables.
pub fn extract_fields(text: &str) -> Result<ExtractedFields, ExtractionEmpty> {
    FieldExtractor::new().extract(text)
}

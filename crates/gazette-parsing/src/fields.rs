//! Field extraction from normalized publication text.

use chrono::NaiveDate;
use gazette_core::{CaseNumber, ExtractedFields};
use regex::Captures;
use rust_decimal::Decimal;

use crate::ExtractionEmpty;
use crate::config::ParsingConfig;
use crate::dates::date_from_parts;
use crate::money::parse_brl;
use crate::patterns::{FieldKind, PatternTable};
use crate::text_processing::{clean_name, normalize_text};

/// Extracts [`ExtractedFields`] from publication text using one ordered
/// [`PatternTable`] per field.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    case_number: PatternTable,
    claimants: PatternTable,
    attorneys: PatternTable,
    filing_date: PatternTable,
    gross_principal: PatternTable,
    net_principal: PatternTable,
    moratory_interest: PatternTable,
    attorney_fees: PatternTable,
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn capture_case_number(caps: &Captures<'_>) -> Option<CaseNumber> {
    CaseNumber::parse(caps.get(1)?.as_str()).ok()
}

fn capture_name(caps: &Captures<'_>) -> Option<String> {
    clean_name(caps.get(1)?.as_str())
}

fn capture_amount(caps: &Captures<'_>) -> Option<Decimal> {
    parse_brl(caps.get(1)?.as_str())
}

fn capture_date(caps: &Captures<'_>) -> Option<NaiveDate> {
    date_from_parts(
        caps.get(1)?.as_str(),
        caps.get(2)?.as_str(),
        caps.get(3)?.as_str(),
    )
}

impl FieldExtractor {
    pub fn new() -> Self {
        Self::with_config(&ParsingConfig::default())
    }

    pub fn with_config(config: &ParsingConfig) -> Self {
        Self {
            case_number: config.table(FieldKind::CaseNumber),
            claimants: config.table(FieldKind::Claimants),
            attorneys: config.table(FieldKind::Attorneys),
            filing_date: config.table(FieldKind::FilingDate),
            gross_principal: config.table(FieldKind::GrossPrincipal),
            net_principal: config.table(FieldKind::NetPrincipal),
            moratory_interest: config.table(FieldKind::MoratoryInterest),
            attorney_fees: config.table(FieldKind::AttorneyFees),
        }
    }

    /// Extract all fields from `text`.
    ///
    /// Fails only when no valid case number is present; every other field
    /// is optional.
    pub fn extract(&self, text: &str) -> Result<ExtractedFields, ExtractionEmpty> {
        let text = normalize_text(text);
        let case_number = self
            .case_number
            .first_value(&text, capture_case_number)
            .ok_or(ExtractionEmpty)?;

        let fields = ExtractedFields {
            filing_date: self.filing_date.first_value(&text, capture_date),
            claimant_names: self.claimants.all_values(&text, capture_name),
            attorney_names: self.attorneys.all_values(&text, capture_name),
            gross_principal: self.gross_principal.first_value(&text, capture_amount),
            net_principal: self.net_principal.first_value(&text, capture_amount),
            moratory_interest: self.moratory_interest.first_value(&text, capture_amount),
            attorney_fees: self.attorney_fees.first_value(&text, capture_amount),
            case_number,
            raw_text: text,
        };
        tracing::debug!(
            case_number = %fields.case_number,
            claimants = fields.claimant_names.as_ref().map_or(0, Vec::len),
            attorneys = fields.attorney_names.as_ref().map_or(0, Vec::len),
            monetary = fields.has_monetary_value(),
            "extracted fields"
        );
        Ok(fields)
    }
}

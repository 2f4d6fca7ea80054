use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Days, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod backend;
pub mod config_file;
pub mod store;

// Re-export for convenience
pub use backend::{BackendError, DisabledPdfBackend, PdfBackend};
pub use store::{MemoryStore, PublicationStore, SqliteStore, StoreError, StoreFuture};

/// Defendant recorded on every stored publication.
pub const INSTITUTIONAL_DEFENDANT: &str = "Instituto Nacional do Seguro Social - INSS";

/// Unanchored CNJ case number pattern (`NNNNNNN-DD.AAAA.J.TR.OOOO`).
pub const CASE_NUMBER_PATTERN: &str = r"\d{7}-\d{2}\.\d{4}\.\d\.\d{2}\.\d{4}";

static CASE_NUMBER_FULL: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!("^{CASE_NUMBER_PATTERN}$")).unwrap());

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("not a CNJ case number: {0:?}")]
pub struct InvalidCaseNumber(pub String);

/// A judicial process identifier in CNJ format.
///
/// The only way to build one is [`CaseNumber::parse`], which requires the
/// whole input to match, so every value held by the rest of the system is
/// well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CaseNumber(String);

impl CaseNumber {
    pub fn parse(raw: &str) -> Result<Self, InvalidCaseNumber> {
        let trimmed = raw.trim();
        if CASE_NUMBER_FULL.is_match(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(InvalidCaseNumber(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for CaseNumber {
    type Err = InvalidCaseNumber;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CaseNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CaseNumber {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for CaseNumber {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        CaseNumber::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CriteriaError {
    #[error("start date {start} is after end date {end}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Input to one extraction run. Validated on construction and immutable after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCriteria {
    date_start: NaiveDate,
    date_end: NaiveDate,
    category: String,
    query_text: String,
}

impl SearchCriteria {
    pub fn new(
        date_start: NaiveDate,
        date_end: NaiveDate,
        category: impl Into<String>,
        query_text: impl Into<String>,
    ) -> Result<Self, CriteriaError> {
        if date_start > date_end {
            return Err(CriteriaError::InvertedRange {
                start: date_start,
                end: date_end,
            });
        }
        let category = category.into();
        if category.trim().is_empty() {
            return Err(CriteriaError::Empty("category"));
        }
        let query_text = query_text.into();
        if query_text.trim().is_empty() {
            return Err(CriteriaError::Empty("query text"));
        }
        Ok(Self {
            date_start,
            date_end,
            category,
            query_text,
        })
    }

    pub fn date_start(&self) -> NaiveDate {
        self.date_start
    }

    pub fn date_end(&self) -> NaiveDate {
        self.date_end
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn query_text(&self) -> &str {
        &self.query_text
    }

    pub fn is_single_day(&self) -> bool {
        self.date_start == self.date_end
    }

    /// Number of calendar days covered, inclusive on both ends.
    pub fn day_count(&self) -> usize {
        (self.date_end - self.date_start).num_days() as usize + 1
    }

    /// One single-day criteria per day of the range, in order.
    pub fn split_daily(&self) -> Vec<SearchCriteria> {
        let mut days = Vec::with_capacity(self.day_count());
        let mut day = self.date_start;
        while day <= self.date_end {
            days.push(SearchCriteria {
                date_start: day,
                date_end: day,
                category: self.category.clone(),
                query_text: self.query_text.clone(),
            });
            match day.checked_add_days(Days::new(1)) {
                Some(next) => day = next,
                None => break,
            }
        }
        days
    }
}

/// One result item on a results page, pointing at its detail page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultReference {
    /// 1-based results page the item was found on.
    pub page_index: usize,
    /// Absolute URL of the detail page.
    pub anchor: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    InlineHtml,
    LinkedPdf,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::InlineHtml => "html",
            ContentKind::LinkedPdf => "pdf",
        }
    }
}

/// Text obtained for one result item, before field extraction.
#[derive(Debug, Clone)]
pub struct RawContent {
    pub source_url: String,
    pub kind: ContentKind,
    pub text: String,
}

/// Typed fields parsed out of one publication's text.
///
/// Optional fields are `None` when no pattern matched. Name lists are never
/// empty when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub case_number: CaseNumber,
    pub filing_date: Option<NaiveDate>,
    pub claimant_names: Option<Vec<String>>,
    pub attorney_names: Option<Vec<String>>,
    pub gross_principal: Option<Decimal>,
    pub net_principal: Option<Decimal>,
    pub moratory_interest: Option<Decimal>,
    pub attorney_fees: Option<Decimal>,
    pub raw_text: String,
}

impl ExtractedFields {
    /// A record carrying only a case number and its source text.
    pub fn bare(case_number: CaseNumber, raw_text: impl Into<String>) -> Self {
        Self {
            case_number,
            filing_date: None,
            claimant_names: None,
            attorney_names: None,
            gross_principal: None,
            net_principal: None,
            moratory_interest: None,
            attorney_fees: None,
            raw_text: raw_text.into(),
        }
    }

    pub fn has_monetary_value(&self) -> bool {
        self.gross_principal.is_some()
            || self.net_principal.is_some()
            || self.moratory_interest.is_some()
            || self.attorney_fees.is_some()
    }
}

/// Evidence the relevance classifier can find in a publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    DomainIndicator,
    InstitutionalParty,
    PaymentIndicator,
    ValidCaseNumber,
    MonetaryValue,
    FilingDate,
}

impl Signal {
    pub const ALL: [Signal; 6] = [
        Signal::DomainIndicator,
        Signal::InstitutionalParty,
        Signal::PaymentIndicator,
        Signal::ValidCaseNumber,
        Signal::MonetaryValue,
        Signal::FilingDate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::DomainIndicator => "domain",
            Signal::InstitutionalParty => "party",
            Signal::PaymentIndicator => "payment",
            Signal::ValidCaseNumber => "case_number",
            Signal::MonetaryValue => "monetary",
            Signal::FilingDate => "filing_date",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationDecision {
    pub accepted: bool,
    pub score: f64,
    pub matched_signals: Vec<Signal>,
}

/// Lifecycle of a stored publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicationStatus {
    #[default]
    Nova,
    Lida,
    Processada,
}

impl PublicationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublicationStatus::Nova => "nova",
            PublicationStatus::Lida => "lida",
            PublicationStatus::Processada => "processada",
        }
    }
}

impl FromStr for PublicationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nova" => Ok(PublicationStatus::Nova),
            "lida" => Ok(PublicationStatus::Lida),
            "processada" => Ok(PublicationStatus::Processada),
            other => Err(format!("unknown publication status: {other}")),
        }
    }
}

/// An accepted record waiting to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PublicationDraft {
    pub fields: ExtractedFields,
    pub defendant: String,
    pub status: PublicationStatus,
}

impl PublicationDraft {
    /// Build a draft for `fields`. `gazette_day` fills in a missing filing
    /// date when the run searched a single gazette day.
    pub fn from_fields(mut fields: ExtractedFields, gazette_day: Option<NaiveDate>) -> Self {
        if fields.filing_date.is_none() {
            fields.filing_date = gazette_day;
        }
        Self {
            fields,
            defendant: INSTITUTIONAL_DEFENDANT.to_string(),
            status: PublicationStatus::Nova,
        }
    }

    pub fn case_number(&self) -> &CaseNumber {
        &self.fields.case_number
    }
}

/// A persisted record, owned by a [`PublicationStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct Publication {
    pub id: i64,
    pub fields: ExtractedFields,
    pub defendant: String,
    pub status: PublicationStatus,
    pub created_at: DateTime<Utc>,
}

impl Publication {
    pub fn case_number(&self) -> &CaseNumber {
        &self.fields.case_number
    }
}

/// Why a result item produced no record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SkipReason {
    Unresolvable,
    ExtractionEmpty,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Unresolvable => "unresolvable",
            SkipReason::ExtractionEmpty => "no_case_number",
        }
    }
}

/// Progress events emitted during a run.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// A per-day search started (1-based `day` of `total_days`).
    DayStarted {
        date: NaiveDate,
        day: usize,
        total_days: usize,
    },
    /// A results page was read.
    PageLoaded { page_index: usize, items: usize },
    /// A detail page was resolved to text.
    ItemResolved {
        anchor: String,
        kind: ContentKind,
    },
    /// A result item was skipped.
    ItemSkipped {
        anchor: String,
        reason: SkipReason,
        detail: String,
    },
    /// The classifier rejected a record.
    Rejected { case_number: CaseNumber, score: f64 },
    /// A record with the same case number already exists.
    Duplicate { case_number: CaseNumber },
    /// A new record was stored.
    Stored { case_number: CaseNumber, id: i64 },
    /// Coarse completion percentage for job runners.
    Percent(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn case_number_requires_full_match() {
        assert!(CaseNumber::parse("1234567-89.2024.1.01.0001").is_ok());
        assert!(CaseNumber::parse(" 1234567-89.2024.1.01.0001\n").is_ok());
        assert!(CaseNumber::parse("Processo 1234567-89.2024.1.01.0001").is_err());
        assert!(CaseNumber::parse("1234567-89.2024.1.01.00011").is_err());
        assert!(CaseNumber::parse("123456-89.2024.1.01.0001").is_err());
        assert!(CaseNumber::parse("").is_err());
    }

    #[test]
    fn case_number_deserialize_validates() {
        let ok: Result<CaseNumber, _> = serde_json::from_str("\"1234567-89.2024.1.01.0001\"");
        assert!(ok.is_ok());
        let bad: Result<CaseNumber, _> = serde_json::from_str("\"12-3\"");
        assert!(bad.is_err());
    }

    #[test]
    fn criteria_rejects_inverted_range() {
        let err = SearchCriteria::new(day(2024, 5, 2), day(2024, 5, 1), "-11", "inss").unwrap_err();
        assert!(matches!(err, CriteriaError::InvertedRange { .. }));
    }

    #[test]
    fn criteria_rejects_blank_query() {
        let err = SearchCriteria::new(day(2024, 5, 1), day(2024, 5, 1), "-11", "  ").unwrap_err();
        assert_eq!(err, CriteriaError::Empty("query text"));
    }

    #[test]
    fn split_daily_covers_range_inclusive() {
        let criteria =
            SearchCriteria::new(day(2024, 2, 27), day(2024, 3, 1), "-11", "inss").unwrap();
        let days: Vec<NaiveDate> = criteria
            .split_daily()
            .iter()
            .map(|c| {
                assert!(c.is_single_day());
                c.date_start()
            })
            .collect();
        assert_eq!(
            days,
            vec![
                day(2024, 2, 27),
                day(2024, 2, 28),
                day(2024, 2, 29),
                day(2024, 3, 1)
            ]
        );
        assert_eq!(criteria.day_count(), 4);
    }

    #[test]
    fn draft_uses_gazette_day_only_when_date_missing() {
        let number = CaseNumber::parse("1234567-89.2024.1.01.0001").unwrap();
        let draft = PublicationDraft::from_fields(
            ExtractedFields::bare(number.clone(), "texto"),
            Some(day(2024, 5, 1)),
        );
        assert_eq!(draft.fields.filing_date, Some(day(2024, 5, 1)));
        assert_eq!(draft.defendant, INSTITUTIONAL_DEFENDANT);
        assert_eq!(draft.status, PublicationStatus::Nova);

        let mut fields = ExtractedFields::bare(number, "texto");
        fields.filing_date = Some(day(2024, 4, 30));
        let draft = PublicationDraft::from_fields(fields, Some(day(2024, 5, 1)));
        assert_eq!(draft.fields.filing_date, Some(day(2024, 4, 30)));
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            PublicationStatus::Nova,
            PublicationStatus::Lida,
            PublicationStatus::Processada,
        ] {
            assert_eq!(status.as_str().parse::<PublicationStatus>(), Ok(status));
        }
        assert!("arquivada".parse::<PublicationStatus>().is_err());
    }
}

//! Ordered pattern tables, one per extracted field.
//!
//! Variants are listed most specific first. Extraction is heuristic: a
//! variant "matches" only when its capture converts to a valid value, so a
//! malformed hit falls through to the next variant.
//!
//! Capture conventions (custom patterns must follow them):
//! - case number, names, money: group 1 holds the value
//! - dates: groups 1..=3 hold day, month (number or Portuguese name), year

use std::fmt;

use gazette_core::CASE_NUMBER_PATTERN;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::money::AMOUNT_PATTERN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    CaseNumber,
    Claimants,
    Attorneys,
    FilingDate,
    GrossPrincipal,
    NetPrincipal,
    MoratoryInterest,
    AttorneyFees,
}

impl FieldKind {
    pub const ALL: [FieldKind; 8] = [
        FieldKind::CaseNumber,
        FieldKind::Claimants,
        FieldKind::Attorneys,
        FieldKind::FilingDate,
        FieldKind::GrossPrincipal,
        FieldKind::NetPrincipal,
        FieldKind::MoratoryInterest,
        FieldKind::AttorneyFees,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::CaseNumber => "case_number",
            FieldKind::Claimants => "claimants",
            FieldKind::Attorneys => "attorneys",
            FieldKind::FilingDate => "filing_date",
            FieldKind::GrossPrincipal => "gross_principal",
            FieldKind::NetPrincipal => "net_principal",
            FieldKind::MoratoryInterest => "moratory_interest",
            FieldKind::AttorneyFees => "attorney_fees",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One labelled pattern in a [`PatternTable`].
#[derive(Debug, Clone)]
pub struct PatternVariant {
    pub label: String,
    pub regex: Regex,
}

impl PatternVariant {
    pub fn new(label: impl Into<String>, regex: Regex) -> Self {
        Self {
            label: label.into(),
            regex,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PatternTable {
    field: FieldKind,
    variants: Vec<PatternVariant>,
}

impl PatternTable {
    pub fn new(field: FieldKind, variants: Vec<PatternVariant>) -> Self {
        Self { field, variants }
    }

    /// Built-in table for `field`.
    pub fn default_for(field: FieldKind) -> &'static PatternTable {
        &DEFAULT_TABLES[FieldKind::ALL
            .iter()
            .position(|f| *f == field)
            .unwrap_or_default()]
    }

    pub fn field(&self) -> FieldKind {
        self.field
    }

    pub fn variants(&self) -> &[PatternVariant] {
        &self.variants
    }

    /// First convertible value, trying variants in priority order and each
    /// variant's matches left to right.
    pub fn first_value<T>(
        &self,
        text: &str,
        convert: impl Fn(&Captures<'_>) -> Option<T>,
    ) -> Option<T> {
        for variant in &self.variants {
            for caps in variant.regex.captures_iter(text) {
                if let Some(value) = convert(&caps) {
                    tracing::trace!(field = %self.field, variant = %variant.label, "pattern matched");
                    return Some(value);
                }
            }
        }
        None
    }

    /// Every convertible value of the first variant that yields any,
    /// de-duplicated with order preserved.
    pub fn all_values<T: PartialEq>(
        &self,
        text: &str,
        convert: impl Fn(&Captures<'_>) -> Option<T>,
    ) -> Option<Vec<T>> {
        for variant in &self.variants {
            let mut values: Vec<T> = Vec::new();
            for caps in variant.regex.captures_iter(text) {
                if let Some(value) = convert(&caps)
                    && !values.contains(&value)
                {
                    values.push(value);
                }
            }
            if !values.is_empty() {
                tracing::trace!(field = %self.field, variant = %variant.label, count = values.len(), "pattern matched");
                return Some(values);
            }
        }
        None
    }
}

/// A person name up to the next delimiter (` - `, comma, semicolon,
/// parenthesis, newline or end of text).
const NAME: &str = r"([^,;()\n]+?)\s*(?:\s-\s|[,;()\n]|$)";

const FILING_LABEL: &str = r"(?i)(?:data\s+(?:da|de)\s+disponibiliza[çc][ãa]o|disponibilizad[oa]\s+em|disponibiliza[çc][ãa]o)\s*:?\s*(?:[a-zà-ú-]+,\s*)?";

const TEXTUAL_DATE: &str = r"(\d{1,2})(?:º|°|o)?\s+de\s+([a-zà-ú]+)\s+de\s+(\d{4})";

fn variant(label: &str, pattern: &str) -> PatternVariant {
    PatternVariant::new(label, Regex::new(pattern).unwrap())
}

fn money_variants(labels: &[(&str, &str)]) -> Vec<PatternVariant> {
    labels
        .iter()
        .map(|(label, prefix)| {
            variant(
                label,
                &format!(r"(?i){prefix}\s*[:\-–]?\s*(?:de\s+)?R\$\s*{AMOUNT_PATTERN}"),
            )
        })
        .collect()
}

static DEFAULT_TABLES: Lazy<Vec<PatternTable>> = Lazy::new(|| {
    FieldKind::ALL
        .iter()
        .map(|&field| PatternTable::new(field, default_variants(field)))
        .collect()
});

fn default_variants(field: FieldKind) -> Vec<PatternVariant> {
    match field {
        FieldKind::CaseNumber => vec![
            variant(
                "processo_label",
                &format!(r"(?i)\bprocesso\b[^\d\n]{{0,20}}({CASE_NUMBER_PATTERN})(?:\D|$)"),
            ),
            variant("cnj", &format!(r"(?:^|\D)({CASE_NUMBER_PATTERN})(?:\D|$)")),
        ],
        FieldKind::Claimants => vec![
            variant(
                "claimant_label",
                &format!(r"(?i)\b(?:apelante|requerente|exequente|apte|reqte|exeqte)s?\s*:\s*{NAME}"),
            ),
            variant("author_label", &format!(r"(?i)\bautor(?:a|es|as)?\s*:\s*{NAME}")),
        ],
        FieldKind::Attorneys => vec![
            variant(
                "advogado_oab",
                r"(?i)\b(?:advogad[oa]s?(?:\(a\))?|advs?\.?)\s*:\s*([^,;()\n]+?)\s*\(\s*OAB\s*[:nº°.]*\s*[\d.]+[a-z]?\s*/\s*[a-z]{2}\s*\)",
            ),
            variant(
                "advogado_label",
                &format!(r"(?i)\badvogad[oa]s?(?:\(a\))?(?:\(s\))?\s*:\s*{NAME}"),
            ),
            variant(
                "doctor_title",
                r"\bDra?\.\s*([A-ZÀ-Ý][^,;()\n]*?)\s*(?:\s-\s|[,;()\n]|$)",
            ),
        ],
        FieldKind::FilingDate => vec![
            variant(
                "filing_label_numeric",
                &format!(r"{FILING_LABEL}(\d{{1,2}})/(\d{{1,2}})/(\d{{4}})"),
            ),
            variant("filing_label_textual", &format!(r"{FILING_LABEL}{TEXTUAL_DATE}")),
            variant("numeric", r"(?:^|\D)(\d{1,2})/(\d{1,2})/(\d{4})(?:\D|$)"),
            variant("textual", &format!(r"(?i)(?:^|\D){TEXTUAL_DATE}")),
        ],
        FieldKind::GrossPrincipal => money_variants(&[
            ("valor_principal_bruto", r"valor\s+principal\s+bruto"),
            ("principal_bruto", r"principal\s+bruto"),
        ]),
        FieldKind::NetPrincipal => money_variants(&[
            ("valor_principal_liquido", r"valor\s+principal\s+l[íi]quido"),
            ("principal_liquido", r"principal\s+l[íi]quido"),
        ]),
        FieldKind::MoratoryInterest => money_variants(&[
            ("juros_moratorios", r"juros\s+morat[óo]rios"),
            ("juros", r"\bjuros(?:\s+de\s+mora)?"),
        ]),
        FieldKind::AttorneyFees => money_variants(&[
            ("honorarios_advocaticios", r"honor[áa]rios\s+advocat[íi]cios"),
            ("honorarios", r"\bhonor[áa]rios"),
        ]),
    }
}

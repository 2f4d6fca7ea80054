//! Relevance scoring for extracted publications.
//!
//! A publication is kept when the weighted sum of the signals found in it
//! reaches the acceptance threshold. Weights are non-negative, so adding a
//! signal never lowers the score.

use gazette_core::{CaseNumber, ClassificationDecision, ExtractedFields, Signal};
use regex::Regex;

use crate::config::{ListOverride, ParsingConfig};
use crate::text_processing::fold_accents;

pub const DEFAULT_DOMAIN_TERMS: &[&str] = &[
    "requisição de pequeno valor",
    "rpv",
    "obrigação de pequeno valor",
    "pequeno valor",
];

pub const DEFAULT_PARTY_TERMS: &[&str] = &["instituto nacional do seguro social", "inss"];

pub const DEFAULT_PAYMENT_TERMS: &[&str] = &[
    "pagamento",
    "depósito",
    "valor principal",
    "levantamento",
    "requisição de pagamento",
];

/// Weights for the relevance score.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalWeights {
    pub domain: f64,
    pub party: f64,
    pub payment: f64,
    pub case_number: f64,
    pub monetary: f64,
    pub filing_date: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        // Every record has a valid case number (2.0): domain or party alone
        // stays under 6.0 unless money, payment and date all show up too.
        Self {
            domain: 3.0,
            party: 3.0,
            payment: 1.0,
            case_number: 2.0,
            monetary: 1.0,
            filing_date: 0.5,
        }
    }
}

impl SignalWeights {
    pub fn weight(&self, signal: Signal) -> f64 {
        let w = match signal {
            Signal::DomainIndicator => self.domain,
            Signal::InstitutionalParty => self.party,
            Signal::PaymentIndicator => self.payment,
            Signal::ValidCaseNumber => self.case_number,
            Signal::MonetaryValue => self.monetary,
            Signal::FilingDate => self.filing_date,
        };
        w.max(0.0)
    }

    /// Sum of the weights of `signals`.
    pub fn score(&self, signals: &[Signal]) -> f64 {
        signals.iter().map(|s| self.weight(*s)).sum()
    }
}

/// Case- and accent-insensitive whole-word matcher over a term list.
#[derive(Debug, Clone)]
struct TermMatcher {
    regex: Option<Regex>,
}

impl TermMatcher {
    fn new(terms: &[String]) -> Self {
        let alternatives: Vec<String> = terms
            .iter()
            .map(|t| fold_accents(t.trim()))
            .filter(|t| !t.is_empty())
            .map(|t| {
                t.split_whitespace()
                    .map(regex::escape)
                    .collect::<Vec<_>>()
                    .join(r"\s+")
            })
            .collect();
        if alternatives.is_empty() {
            return Self { regex: None };
        }
        // Escaped literals always compile; a failure would mean an empty
        // alternation, which is already excluded above.
        let regex = Regex::new(&format!(r"\b(?:{})\b", alternatives.join("|"))).ok();
        Self { regex }
    }

    fn from_override(over: &ListOverride<String>, defaults: &[&str]) -> Self {
        let defaults: Vec<String> = defaults.iter().map(|s| s.to_string()).collect();
        Self::new(&over.resolve(&defaults))
    }

    /// `folded` must already be passed through [`fold_accents`].
    fn is_match(&self, folded: &str) -> bool {
        self.regex.as_ref().is_some_and(|re| re.is_match(folded))
    }
}

#[derive(Debug, Clone)]
pub struct RelevanceClassifier {
    domain: TermMatcher,
    party: TermMatcher,
    payment: TermMatcher,
    weights: SignalWeights,
    threshold: f64,
}

impl Default for RelevanceClassifier {
    fn default() -> Self {
        Self::new(&ParsingConfig::default())
    }
}

impl RelevanceClassifier {
    pub fn new(config: &ParsingConfig) -> Self {
        Self {
            domain: TermMatcher::from_override(&config.domain_terms, DEFAULT_DOMAIN_TERMS),
            party: TermMatcher::from_override(&config.party_terms, DEFAULT_PARTY_TERMS),
            payment: TermMatcher::from_override(&config.payment_terms, DEFAULT_PAYMENT_TERMS),
            weights: config.scoring_weights(),
            threshold: config.threshold(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn weights(&self) -> &SignalWeights {
        &self.weights
    }

    /// Signals present in `fields` and `text`, in [`Signal::ALL`] order.
    pub fn signals(&self, fields: &ExtractedFields, text: &str) -> Vec<Signal> {
        let folded = fold_accents(text);
        Signal::ALL
            .into_iter()
            .filter(|signal| match signal {
                Signal::DomainIndicator => self.domain.is_match(&folded),
                Signal::InstitutionalParty => self.party.is_match(&folded),
                Signal::PaymentIndicator => self.payment.is_match(&folded),
                Signal::ValidCaseNumber => CaseNumber::parse(fields.case_number.as_str()).is_ok(),
                Signal::MonetaryValue => fields.has_monetary_value(),
                Signal::FilingDate => fields.filing_date.is_some(),
            })
            .collect()
    }

    /// Decide from a precomputed signal set.
    pub fn decide(&self, matched_signals: Vec<Signal>) -> ClassificationDecision {
        let score = self.weights.score(&matched_signals);
        ClassificationDecision {
            accepted: score >= self.threshold,
            score,
            matched_signals,
        }
    }

    pub fn classify(&self, fields: &ExtractedFields, text: &str) -> ClassificationDecision {
        let decision = self.decide(self.signals(fields, text));
        tracing::debug!(
            case_number = %fields.case_number,
            score = decision.score,
            accepted = decision.accepted,
            "classified publication"
        );
        decision
    }
}

use regex::Regex;

use crate::classify::SignalWeights;
use crate::patterns::{FieldKind, PatternTable, PatternVariant};

/// Controls how a list of patterns/values is overridden from its defaults.
#[derive(Debug, Clone, Default)]
pub enum ListOverride<T> {
    /// Use the built-in defaults.
    #[default]
    Default,
    /// Completely replace the defaults with these values.
    Replace(Vec<T>),
    /// Append these values to the defaults.
    Extend(Vec<T>),
}

impl<T: Clone> ListOverride<T> {
    /// Resolve this override against the given defaults.
    pub fn resolve(&self, defaults: &[T]) -> Vec<T> {
        match self {
            ListOverride::Default => defaults.to_vec(),
            ListOverride::Replace(v) => v.clone(),
            ListOverride::Extend(v) => {
                let mut result = defaults.to_vec();
                result.extend(v.iter().cloned());
                result
            }
        }
    }
}

/// Default acceptance threshold for the relevance classifier.
pub const DEFAULT_THRESHOLD: f64 = 6.0;

/// Configuration for field extraction and relevance classification.
///
/// Pattern overrides are kept per field; fields without an entry use the
/// built-in tables. Use [`ParsingConfigBuilder`] to construct from string
/// patterns.
#[derive(Debug, Clone)]
pub struct ParsingConfig {
    pub(crate) patterns: Vec<(FieldKind, ListOverride<PatternVariant>)>,
    pub(crate) domain_terms: ListOverride<String>,
    pub(crate) party_terms: ListOverride<String>,
    pub(crate) payment_terms: ListOverride<String>,
    pub(crate) scoring_weights: Option<SignalWeights>,
    pub(crate) threshold: f64,
}

impl Default for ParsingConfig {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            domain_terms: ListOverride::Default,
            party_terms: ListOverride::Default,
            payment_terms: ListOverride::Default,
            scoring_weights: None,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl ParsingConfig {
    /// Pattern table for `field` with any override applied.
    pub fn table(&self, field: FieldKind) -> PatternTable {
        let defaults = PatternTable::default_for(field);
        match self.patterns.iter().find(|(f, _)| *f == field) {
            Some((_, over)) => PatternTable::new(field, over.resolve(defaults.variants())),
            None => defaults.clone(),
        }
    }

    /// Get the scoring weights, using defaults if not configured.
    pub fn scoring_weights(&self) -> SignalWeights {
        self.scoring_weights.clone().unwrap_or_default()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }
}

/// Builder for [`ParsingConfig`].
///
/// Accepts string patterns that are compiled to `Regex` in [`build()`](Self::build).
/// Fails fast with `regex::Error` if any pattern is invalid.
#[derive(Debug, Clone, Default)]
pub struct ParsingConfigBuilder {
    patterns: Vec<(FieldKind, ListOverride<String>)>,
    domain_terms: ListOverride<String>,
    party_terms: ListOverride<String>,
    payment_terms: ListOverride<String>,
    scoring_weights: Option<SignalWeights>,
    threshold: Option<f64>,
}

fn push_extend<T>(target: &mut ListOverride<T>, values: impl IntoIterator<Item = T>) {
    match target {
        ListOverride::Extend(v) => v.extend(values),
        _ => *target = ListOverride::Extend(values.into_iter().collect()),
    }
}

impl ParsingConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, field: FieldKind) -> &mut ListOverride<String> {
        let index = match self.patterns.iter().position(|(f, _)| *f == field) {
            Some(i) => i,
            None => {
                self.patterns.push((field, ListOverride::Default));
                self.patterns.len() - 1
            }
        };
        &mut self.patterns[index].1
    }

    // ── Field patterns ──

    /// Replace the built-in patterns for `field`.
    pub fn set_patterns(mut self, field: FieldKind, patterns: Vec<String>) -> Self {
        *self.slot(field) = ListOverride::Replace(patterns);
        self
    }

    /// Try `pattern` after the built-in patterns for `field`.
    pub fn add_pattern(mut self, field: FieldKind, pattern: String) -> Self {
        push_extend(self.slot(field), [pattern]);
        self
    }

    // ── Classifier terms ──

    pub fn set_domain_terms(mut self, terms: Vec<String>) -> Self {
        self.domain_terms = ListOverride::Replace(terms);
        self
    }

    pub fn add_domain_terms(mut self, terms: Vec<String>) -> Self {
        push_extend(&mut self.domain_terms, terms);
        self
    }

    pub fn set_party_terms(mut self, terms: Vec<String>) -> Self {
        self.party_terms = ListOverride::Replace(terms);
        self
    }

    pub fn add_party_terms(mut self, terms: Vec<String>) -> Self {
        push_extend(&mut self.party_terms, terms);
        self
    }

    pub fn set_payment_terms(mut self, terms: Vec<String>) -> Self {
        self.payment_terms = ListOverride::Replace(terms);
        self
    }

    pub fn add_payment_terms(mut self, terms: Vec<String>) -> Self {
        push_extend(&mut self.payment_terms, terms);
        self
    }

    // ── Scoring ──

    pub fn scoring_weights(mut self, weights: SignalWeights) -> Self {
        self.scoring_weights = Some(weights);
        self
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Compile all string patterns into regexes and produce a [`ParsingConfig`].
    pub fn build(self) -> Result<ParsingConfig, regex::Error> {
        let compile = |field: FieldKind, patterns: Vec<String>| -> Result<Vec<PatternVariant>, regex::Error> {
            patterns
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    Regex::new(p).map(|re| PatternVariant::new(format!("custom_{}_{i}", field.as_str()), re))
                })
                .collect()
        };

        let mut patterns = Vec::with_capacity(self.patterns.len());
        for (field, over) in self.patterns {
            let compiled = match over {
                ListOverride::Default => ListOverride::Default,
                ListOverride::Replace(p) => ListOverride::Replace(compile(field, p)?),
                ListOverride::Extend(p) => ListOverride::Extend(compile(field, p)?),
            };
            patterns.push((field, compiled));
        }

        Ok(ParsingConfig {
            patterns,
            domain_terms: self.domain_terms,
            party_terms: self.party_terms,
            payment_terms: self.payment_terms,
            scoring_weights: self.scoring_weights,
            threshold: self.threshold.unwrap_or(DEFAULT_THRESHOLD),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ParsingConfig::default();
        assert!((config.threshold() - DEFAULT_THRESHOLD).abs() < f64::EPSILON);
        let table = config.table(FieldKind::GrossPrincipal);
        assert_eq!(
            table.variants().len(),
            PatternTable::default_for(FieldKind::GrossPrincipal).variants().len()
        );
    }

    #[test]
    fn test_builder_replace_and_extend() {
        let config = ParsingConfigBuilder::new()
            .set_patterns(FieldKind::AttorneyFees, vec![r"verba\s+honor[aá]ria\s*R\$\s*(\d+)".into()])
            .add_pattern(FieldKind::GrossPrincipal, r"bruto\s*=\s*(\d+)".into())
            .threshold(4.5)
            .build()
            .unwrap();

        let fees = config.table(FieldKind::AttorneyFees);
        assert_eq!(fees.variants().len(), 1);
        assert_eq!(fees.variants()[0].label, "custom_attorney_fees_0");

        let gross = config.table(FieldKind::GrossPrincipal);
        let defaults = PatternTable::default_for(FieldKind::GrossPrincipal).variants().len();
        assert_eq!(gross.variants().len(), defaults + 1);
        assert!((config.threshold() - 4.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_builder_invalid_regex() {
        let result = ParsingConfigBuilder::new()
            .add_pattern(FieldKind::Claimants, r"[invalid".into())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_list_override_resolve() {
        let defaults = vec!["a".to_string(), "b".to_string()];

        let d: ListOverride<String> = ListOverride::Default;
        assert_eq!(d.resolve(&defaults), defaults);

        let r: ListOverride<String> = ListOverride::Replace(vec!["x".to_string()]);
        assert_eq!(r.resolve(&defaults), vec!["x".to_string()]);

        let e: ListOverride<String> = ListOverride::Extend(vec!["c".to_string()]);
        assert_eq!(
            e.resolve(&defaults),
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }
}

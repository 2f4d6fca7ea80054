use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Expand common typographic ligatures found in PDFs.
pub fn expand_ligatures(text: &str) -> String {
    text.replace('\u{FB00}', "ff")
        .replace('\u{FB01}', "fi")
        .replace('\u{FB02}', "fl")
        .replace('\u{FB03}', "ffi")
        .replace('\u{FB04}', "ffl")
        .replace(['\u{FB05}', '\u{FB06}'], "st")
}

/// Prepare raw page or PDF text for pattern matching.
///
/// - ligatures are expanded
/// - non-breaking and other exotic spaces become plain spaces
/// - runs of spaces/tabs collapse to one space, newlines are kept
/// - blank lines at the ends are dropped
pub fn normalize_text(text: &str) -> String {
    static HSPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t\u{00A0}\u{2007}\u{202F}]+").unwrap());
    static LINE_EDGES: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^ +| +$").unwrap());

    let text = expand_ligatures(text).replace("\r\n", "\n").replace('\r', "\n");
    let text = HSPACE.replace_all(&text, " ");
    let text = LINE_EDGES.replace_all(&text, "");
    text.trim_matches('\n').to_string()
}

/// Lowercase and strip diacritics, so `"Depósito"` and `"deposito"` compare equal.
pub fn fold_accents(text: &str) -> String {
    text.nfd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

/// Clean a captured person name: collapse inner whitespace and strip
/// trailing punctuation left over from the surrounding sentence.
pub fn clean_name(raw: &str) -> Option<String> {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let cleaned = collapsed
        .trim_matches(|c: char| c == '.' || c == ',' || c == ';' || c == ':' || c == '-' || c.is_whitespace())
        .to_string();
    if cleaned.chars().filter(|c| c.is_alphabetic()).count() < 2 {
        return None;
    }
    Some(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_keeps_newlines_and_collapses_spaces() {
        let raw = "  Processo\u{00A0}\u{00A0}1234567-89.2024.1.01.0001 \t\r\nRequerente:   MARIA  \n\n";
        assert_eq!(
            normalize_text(raw),
            "Processo 1234567-89.2024.1.01.0001\nRequerente: MARIA"
        );
    }

    #[test]
    fn normalize_expands_ligatures() {
        assert_eq!(normalize_text("of\u{FB01}cio"), "oficio");
    }

    #[test]
    fn fold_accents_strips_diacritics() {
        assert_eq!(fold_accents("Requisição de Pequeno Valor"), "requisicao de pequeno valor");
        assert_eq!(fold_accents("DEPÓSITO"), "deposito");
    }

    #[test]
    fn clean_name_trims_sentence_residue() {
        assert_eq!(clean_name("  JOSE   DA SILVA. "), Some("JOSE DA SILVA".to_string()));
        assert_eq!(clean_name(" - "), None);
    }
}

use unicode_normalization::UnicodeNormalization;

const COMBINING_MARKS: std::ops::RangeInclusive<char> = '\u{0300}'..='\u{036F}';

/// Comparison key used by every typeahead and import lookup: NFD-decomposes,
/// drops combining diacritical marks and lowercases.
#[must_use]
pub fn normalize_text(input: &str) -> String {
    input
        .nfd()
        .filter(|c| !COMBINING_MARKS.contains(c))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Like [`normalize_text`] but also removes all whitespace, so
/// `"Código Fiscal"` and `"codigofiscal"` compare equal.
#[must_use]
pub fn normalize_header(input: &str) -> String {
    normalize_text(input)
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

#[must_use]
pub fn contains_normalized(haystack: &str, normalized_needle: &str) -> bool {
    normalized_needle.is_empty() || normalize_text(haystack).contains(normalized_needle)
}

#[must_use]
pub fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_accents_and_case() {
        assert_eq!(normalize_text("CÁBO"), "cabo");
        assert_eq!(normalize_text("Subestação"), "subestacao");
        assert_eq!(normalize_text("Manutenção"), "manutencao");
    }

    #[test]
    fn header_drops_whitespace() {
        assert_eq!(normalize_header("Código Fiscal"), "codigofiscal");
        assert_eq!(normalize_header(" Patrimônio "), "patrimonio");
        assert_eq!(normalize_header("DESCRIÇÃO"), "descricao");
    }

    #[test]
    fn empty_needle_matches_everything() {
        assert!(contains_normalized("anything", ""));
        assert!(contains_normalized("Cabo de Rede", "rede"));
        assert!(!contains_normalized("Cabo de Rede", "fibra"));
    }

    #[test]
    fn blank_detection() {
        assert!(is_blank("   \t"));
        assert!(!is_blank(" a "));
    }
}

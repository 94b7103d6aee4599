// Small text helpers shared by the tokenizer and the registries.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Strip diacritics: decompose to NFD and drop the combining marks.
pub fn deaccent(text: &str) -> String {
    text.nfd().filter(|c| !is_combining_mark(*c)).collect()
}

/// Normalize a display name into a link name: lowercase, accent-free,
/// whitespace runs collapsed to single underscores.
pub fn link_name(name: &str) -> String {
    deaccent(&name.to_lowercase())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
}

/// Round to two decimal places, the precision every reported score uses.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deaccent() {
        assert_eq!(deaccent("ação"), "acao");
        assert_eq!(deaccent("José Müller"), "Jose Muller");
        assert_eq!(deaccent("plain"), "plain");
    }

    #[test]
    fn test_link_name() {
        assert_eq!(link_name("São Paulo  Norte"), "sao_paulo_norte");
        assert_eq!(link_name("  Acme Corp "), "acme_corp");
        assert_eq!(link_name("already_linked"), "already_linked");
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(0.81234), 0.81);
        assert_eq!(round2(2.345678), 2.35);
        assert_eq!(round2(40.0), 40.0);
    }
}

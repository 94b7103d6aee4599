// Row tokenization. The first column names the card; every other column
// is an attribute whose value becomes tokens. Attributes fall into three
// classes by name: free-text "word" attributes go through the word
// pipeline, attributes matching a relationship tag have their tokens
// re-emitted under the tag, and the rest are plain values.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use regex_lite::Regex;

use crate::settings::CorpusSettings;
use crate::text::{deaccent, link_name};

/// Everything one source row contributes: the card it belongs to, the
/// per-attribute token frequencies, and the relationship tokens destined
/// for the relationship sink (or, without one, for this same card).
#[derive(Debug, Default, PartialEq)]
pub struct RowTokens {
    pub card: String,
    /// (attribute name, token text) -> frequency within this row
    pub direct: BTreeMap<(String, String), i64>,
    /// (tag name, token text) -> frequency within this row
    pub relationship: BTreeMap<(String, String), i64>,
}

pub struct Tokenizer {
    word_attr_re: Regex,
    tag_res: Vec<(String, Regex)>,
    accent_attrs: Vec<String>,
    min_len: usize,
    max_len: usize,
    /// Plain values are whole tokens already; otherwise they compose with
    /// the attribute name.
    pre_tokenized: bool,
}

/// Standalone-word match within an underscore-joined attribute name.
fn name_matcher(word: &str) -> Result<Regex> {
    Regex::new(&format!(r"(_|\b){}(_|\b)", regex_lite::escape(word)))
        .with_context(|| format!("Bad attribute matcher for {word:?}"))
}

impl Tokenizer {
    pub fn new(settings: &CorpusSettings, pre_tokenized: bool) -> Result<Self> {
        let mut tag_res = Vec::with_capacity(settings.relationship_tags.len());
        for tag in &settings.relationship_tags {
            tag_res.push((tag.clone(), name_matcher(tag)?));
        }
        let word_attr_re = name_matcher("word")?;
        Ok(Self {
            word_attr_re,
            tag_res,
            accent_attrs: settings.accent_attrs.clone(),
            min_len: settings.min_len,
            max_len: settings.max_len,
            pre_tokenized,
        })
    }

    pub fn tokenize_row(&self, header: &[String], fields: &[String]) -> Result<RowTokens> {
        let card = link_name(&fields[0]);
        if card.is_empty() {
            bail!("Row with an empty card name");
        }
        let mut row = RowTokens {
            card,
            ..Default::default()
        };
        for (attr, value) in header.iter().zip(fields.iter()).skip(1) {
            if value.is_empty() {
                continue;
            }
            if self.word_attr_re.is_match(attr) {
                for token in self.word_tokens(attr, value) {
                    *row.direct.entry((attr.clone(), token)).or_insert(0) += 1;
                }
                continue;
            }
            let tokens = self.plain_tokens(attr, value);
            for (tag, tag_re) in &self.tag_res {
                if !tag_re.is_match(attr) {
                    continue;
                }
                // re-key the attribute's tokens under the tag, so the same
                // identifier lines up across differently named columns
                for token in &tokens {
                    let diverted = token.replacen(attr.as_str(), tag.as_str(), 1);
                    *row.relationship.entry((tag.clone(), diverted)).or_insert(0) += 1;
                }
            }
            for token in tokens {
                *row.direct.entry((attr.clone(), token)).or_insert(0) += 1;
            }
        }
        Ok(row)
    }

    /// Free-text pipeline: lowercase, drop non-alphabetic characters,
    /// collapse whitespace, strip accents, keep words within the length
    /// band, and prefix with the attribute name.
    fn word_tokens(&self, attr: &str, value: &str) -> Vec<String> {
        let lowered = value.to_lowercase();
        let letters: String = lowered
            .chars()
            .filter(|c| c.is_alphabetic() || c.is_whitespace())
            .collect();
        letters
            .split_whitespace()
            .map(deaccent)
            .filter(|w| {
                let len = w.chars().count();
                len >= self.min_len && len <= self.max_len
            })
            .map(|w| format!("{attr}_{w}"))
            .collect()
    }

    /// Plain values: kept verbatim apart from optional accent stripping,
    /// whitespace-split, composed with the attribute name unless the
    /// source is pre-tokenized.
    fn plain_tokens(&self, attr: &str, value: &str) -> Vec<String> {
        let value = if self.accent_attrs.iter().any(|a| a == attr) {
            deaccent(value)
        } else {
            value.to_string()
        };
        value
            .split_whitespace()
            .map(|v| {
                if self.pre_tokenized {
                    v.to_string()
                } else {
                    format!("{attr}_{v}")
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> CorpusSettings {
        CorpusSettings::default()
    }

    fn header(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn fields(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_card_name_is_normalized() {
        let tok = Tokenizer::new(&settings(), false).unwrap();
        let row = tok
            .tokenize_row(&header(&["name", "city"]), &fields(&["São Paulo Inc", "lisboa"]))
            .unwrap();
        assert_eq!(row.card, "sao_paulo_inc");
    }

    #[test]
    fn test_plain_attribute_composes_token() {
        let tok = Tokenizer::new(&settings(), false).unwrap();
        let row = tok
            .tokenize_row(&header(&["name", "city"]), &fields(&["acme", "Lisboa"]))
            .unwrap();
        // plain values keep their original casing
        assert_eq!(
            row.direct.keys().next().unwrap(),
            &("city".to_string(), "city_Lisboa".to_string())
        );
    }

    #[test]
    fn test_pre_tokenized_keeps_value_whole() {
        let tok = Tokenizer::new(&settings(), true).unwrap();
        let row = tok
            .tokenize_row(&header(&["name", "city"]), &fields(&["acme", "city_lisboa"]))
            .unwrap();
        assert!(row
            .direct
            .contains_key(&("city".to_string(), "city_lisboa".to_string())));
    }

    #[test]
    fn test_word_pipeline() {
        let mut s = settings();
        s.min_len = 4;
        let tok = Tokenizer::new(&s, false).unwrap();
        let row = tok
            .tokenize_row(
                &header(&["name", "key_word"]),
                &fields(&["acme", "Ação de 2024 intermediação!"]),
            )
            .unwrap();
        let tokens: Vec<&str> = row.direct.keys().map(|(_, t)| t.as_str()).collect();
        // "de" is below min_len, "2024" is stripped entirely
        assert_eq!(tokens, vec!["key_word_acao", "key_word_intermediacao"]);
    }

    #[test]
    fn test_word_frequency_counts_repeats() {
        let tok = Tokenizer::new(&settings(), false).unwrap();
        let row = tok
            .tokenize_row(
                &header(&["name", "key_word"]),
                &fields(&["acme", "steel beams steel"]),
            )
            .unwrap();
        assert_eq!(
            row.direct[&("key_word".to_string(), "key_word_steel".to_string())],
            2
        );
    }

    #[test]
    fn test_relationship_attribute_diverts_under_tag() {
        let tok = Tokenizer::new(&settings(), false).unwrap();
        let row = tok
            .tokenize_row(
                &header(&["name", "partner_cpf"]),
                &fields(&["acme", "12345678900"]),
            )
            .unwrap();
        // the direct token keeps the column name; the diverted one is
        // re-keyed under the tag
        assert!(row
            .direct
            .contains_key(&("partner_cpf".to_string(), "partner_cpf_12345678900".to_string())));
        assert!(row
            .relationship
            .contains_key(&("cpf".to_string(), "cpf_12345678900".to_string())));
    }

    #[test]
    fn test_relationship_rekey_replaces_attribute_in_composed_token() {
        let mut s = settings();
        s.relationship_tags = vec!["cnpj".to_string()];
        let tok = Tokenizer::new(&s, false).unwrap();
        let row = tok
            .tokenize_row(&header(&["name", "cnpj"]), &fields(&["acme", "111222"]))
            .unwrap();
        // attr equals the tag, so the composed token is unchanged
        assert!(row
            .relationship
            .contains_key(&("cnpj".to_string(), "cnpj_111222".to_string())));
    }

    #[test]
    fn test_empty_values_yield_nothing() {
        let tok = Tokenizer::new(&settings(), false).unwrap();
        let row = tok
            .tokenize_row(&header(&["name", "city", "key_word"]), &fields(&["acme", "", ""]))
            .unwrap();
        assert!(row.direct.is_empty());
        assert!(row.relationship.is_empty());
    }

    #[test]
    fn test_empty_card_name_is_rejected() {
        let tok = Tokenizer::new(&settings(), false).unwrap();
        assert!(tok
            .tokenize_row(&header(&["name", "city"]), &fields(&["  ", "lisboa"]))
            .is_err());
    }

    #[test]
    fn test_accent_attrs_strip_plain_values() {
        let mut s = settings();
        s.accent_attrs = vec!["address".to_string()];
        let tok = Tokenizer::new(&s, false).unwrap();
        let row = tok
            .tokenize_row(&header(&["name", "address"]), &fields(&["acme", "São Bento"]))
            .unwrap();
        let tokens: Vec<&str> = row.direct.keys().map(|(_, t)| t.as_str()).collect();
        assert_eq!(tokens, vec!["address_Bento", "address_Sao"]);
    }
}

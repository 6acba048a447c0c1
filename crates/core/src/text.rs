//! Text folding shared by every keyword matcher in the engine.
//!
//! Customer messages arrive with inconsistent accents and casing ("Não", "nao",
//! "NÃO"), so all comparisons run over a folded form: NFD decomposition, combining
//! marks dropped, lowercase.

use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

pub fn fold(text: &str) -> String {
    text.nfd().filter(|ch| !is_combining_mark(*ch)).flat_map(char::to_lowercase).collect()
}

/// Folds and replaces every non-alphanumeric character with a space, then collapses
/// whitespace.
pub fn fold_words(text: &str) -> String {
    let stripped: String =
        fold(text).chars().map(|ch| if ch.is_alphanumeric() { ch } else { ' ' }).collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whole-word containment over folded text.
pub fn contains_word(haystack_words: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    haystack_words.split(' ').any(|token| token == word)
}

pub fn contains_any(folded: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| folded.contains(needle))
}

pub fn count_matches(folded: &str, needles: &[&str]) -> usize {
    needles.iter().filter(|needle| folded.contains(*needle)).count()
}

#[cfg(test)]
mod tests {
    use super::{contains_word, count_matches, fold, fold_words};

    #[test]
    fn fold_strips_accents_and_case() {
        assert_eq!(fold("Não QUERO Débito"), "nao quero debito");
        assert_eq!(fold("liberação"), "liberacao");
    }

    #[test]
    fn fold_words_removes_punctuation() {
        assert_eq!(fold_words("Tem amoxicilina?!  "), "tem amoxicilina");
        assert_eq!(fold_words("CPF: 084.844.316-06"), "cpf 084 844 316 06");
    }

    #[test]
    fn whole_word_match_does_not_match_substrings() {
        let words = fold_words("Amoxicilina 500mg caixa");
        assert!(contains_word(&words, "amoxicilina"));
        assert!(!contains_word(&words, "amoxi"));
    }

    #[test]
    fn counts_each_needle_once() {
        assert_eq!(count_matches("fatura e boleto da fatura", &["fatura", "boleto", "pix"]), 2);
    }
}

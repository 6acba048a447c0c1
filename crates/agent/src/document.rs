use relaydesk_core::domain::billing::TaxDocument;

/// Finds a taxpayer id in free text: every non-digit is dropped and the rest must
/// be exactly 11 (CPF) or 14 (CNPJ) digits long. Checksums are not verified, so
/// callers only trust the result when the dialogue asked for a document.
pub fn extract_document(text: &str) -> Option<TaxDocument> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    TaxDocument::from_digits(&digits)
}

/// True when the message is nothing but a document, possibly punctuated.
pub fn is_bare_document(text: &str) -> bool {
    let trimmed = text.trim();
    extract_document(trimmed).is_some()
        && trimmed.chars().all(|ch| ch.is_ascii_digit() || matches!(ch, '.' | '-' | '/' | ' '))
}

#[cfg(test)]
mod tests {
    use super::{extract_document, is_bare_document};

    #[test]
    fn extracts_only_cpf_and_cnpj_lengths() {
        let cases = [
            ("CPF: 084.844.316-06", Some("08484431606")),
            ("meu cnpj é 12.345.678/0001-95", Some("12345678000195")),
            ("12345", None),
            ("1234567890123", None),
            ("sem número nenhum", None),
            ("pedido 123 e 4567890", None),
        ];

        for (input, expected) in cases {
            let found = extract_document(input);
            assert_eq!(found.as_ref().map(|doc| doc.digits()), expected, "input: {input}");
        }
    }

    #[test]
    fn digits_are_collected_across_the_whole_message() {
        // Length is the only signal, so scattered digits still count.
        let found = extract_document("pedido 123, casa 45, tel 678901").expect("eleven digits");
        assert_eq!(found.digits(), "12345678901");
    }

    #[test]
    fn bare_document_allows_only_punctuation() {
        assert!(is_bare_document(" 084.844.316-06 "));
        assert!(!is_bare_document("cpf 08484431606"));
        assert!(!is_bare_document("0848443160"));
    }
}

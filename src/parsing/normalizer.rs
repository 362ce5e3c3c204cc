use sha2::{Digest, Sha256};

/// Clean a free-text address into the canonical form the rest of the crate
/// operates on: ASCII-folded, uppercased, punctuation reduced to the subset
/// that carries meaning in postal addresses, whitespace collapsed.
///
/// Total function: never fails, blank input yields the empty string.
pub fn normalize(text: &str) -> String {
    let folded = deunicode::deunicode(text);
    let mut cleaned = String::with_capacity(folded.len());
    let mut last_was_space = true;
    for ch in folded.chars() {
        let keep = match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' => Some(ch.to_ascii_uppercase()),
            '#' | '&' | ',' | '.' | '\'' | '/' | '-' => Some(ch),
            c if c.is_whitespace() => Some(' '),
            _ => None,
        };
        if let Some(c) = keep {
            if c == ' ' {
                if !last_was_space {
                    cleaned.push(' ');
                }
                last_was_space = true;
            } else {
                cleaned.push(c);
                last_was_space = false;
            }
        }
    }
    cleaned.trim().to_string()
}

/// Content-addressed cache key: sha256 of the normalized address, hex-encoded.
pub fn cache_key(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_and_uppercases() {
        assert_eq!(normalize("  123   main st  "), "123 MAIN ST");
    }

    #[test]
    fn folds_unicode_to_ascii() {
        assert_eq!(normalize("123 Peña Blvd"), "123 PENA BLVD");
    }

    #[test]
    fn strips_unsafe_punctuation_keeps_postal_subset() {
        assert_eq!(normalize("12 O'Brien St. #4, L.A. (rear)"), "12 O'BRIEN ST. #4, L.A. REAR");
    }

    #[test]
    fn empty_input_yields_empty_string() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   \t\n "), "");
    }

    #[test]
    fn cache_key_is_stable_and_case_insensitive_via_normalize() {
        let a = cache_key(&normalize("123 Main St"));
        let b = cache_key(&normalize("123  MAIN   st"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}

//! Turkish-aware case folding and tokenization (§4.H "Catalogue & synonym
//! dictionary loading"). Plain `str::to_lowercase` mishandles Turkish `İ`/`I`
//! (it lowercases `I` to `i` rather than `ı`, and drops the combining dot
//! from `İ`), so every fold goes through this explicit table instead.

/// Lowercases text the Turkish way: `İ` → `i`, `I` → `ı`, and every other
/// letter through Unicode's default case fold.
#[must_use]
pub fn turkish_lowercase(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'İ' => 'i',
            'I' => 'ı',
            other => other.to_lowercase().next().unwrap_or(other),
        })
        .collect()
}

/// Maps Turkish letters to their closest ASCII equivalent: `ç→c`, `ğ→g`,
/// `ı→i`, `ö→o`, `ş→s`, `ü→u`. Applied after [`turkish_lowercase`] to get a
/// canonical "lemma" form for overlap scoring, independent of the synonym
/// dictionary.
#[must_use]
pub fn fold_diacritics(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'ç' => 'c',
            'ğ' => 'g',
            'ı' => 'i',
            'ö' => 'o',
            'ş' => 's',
            'ü' => 'u',
            other => other,
        })
        .collect()
}

/// Splits on anything that isn't a letter or digit, after Turkish case
/// folding. Empty tokens are dropped.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    turkish_lowercase(text)
        .split(|c: char| !(c.is_alphanumeric()))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Tokenizes, then folds each token's diacritics — the "lemma" form used by
/// stage 2's lemma-overlap term.
#[must_use]
pub fn lemmatize(text: &str) -> Vec<String> {
    tokenize(text).into_iter().map(|token| fold_diacritics(&token)).collect()
}

/// Character bigrams of the normalized (lowercased) text, used for stage 2's
/// fuzzy-typo tolerance term.
#[must_use]
pub fn char_bigrams(text: &str) -> std::collections::HashSet<String> {
    let normalized = turkish_lowercase(text);
    let chars: Vec<char> = normalized.chars().filter(|c| !c.is_whitespace()).collect();
    if chars.len() < 2 {
        return chars.iter().map(|c| c.to_string()).collect();
    }
    chars.windows(2).map(|pair| pair.iter().collect()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turkish_lowercase_handles_dotted_and_dotless_i() {
        assert_eq!(turkish_lowercase("İstanbul"), "istanbul");
        assert_eq!(turkish_lowercase("IŞIK"), "ışık");
    }

    #[test]
    fn fold_diacritics_maps_every_turkish_letter() {
        assert_eq!(fold_diacritics("çğışöü"), "cgisou");
    }

    #[test]
    fn tokenize_splits_on_punctuation() {
        assert_eq!(tokenize("Merhaba, nasılsın?"), vec!["merhaba", "nasılsın"]);
    }

    #[test]
    fn lemmatize_folds_diacritics_after_tokenizing() {
        assert_eq!(lemmatize("çalışma saati"), vec!["calisma", "saati"]);
    }
}

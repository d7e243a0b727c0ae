/// Maximum token length to store in the index.
/// Longer tokens are sequence fragments or other non-searchable content.
pub const MAX_TOKEN_LENGTH: usize = 128;

/// Maximum identifier length. Every entry record of the ID index is as
/// wide as the longest identifier, so records above the limit are skipped.
pub const MAX_ID_LENGTH: usize = 255;

/// Minimum length of a free-text word token
const MIN_WORD_LENGTH: usize = 2;

/// Normalize a token for storage or lookup.
/// Case-insensitive fields are folded to upper case, the convention of
/// biological identifiers.
#[inline]
pub fn normalize_token(token: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        token.to_string()
    } else {
        token.to_uppercase()
    }
}

/// Split free text (description, organism lines) into word tokens.
/// Words are runs of alphanumerics, `_` and `-`; trailing hyphens are dropped.
pub fn split_words(text: &str) -> Vec<&str> {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
        .map(|w| w.trim_matches('-'))
        .filter(|w| w.len() >= MIN_WORD_LENGTH && w.len() <= MAX_TOKEN_LENGTH)
        .collect()
}

/// Split a separator-delimited list (accession or keyword lines).
/// Items are trimmed of whitespace and a trailing period.
pub fn split_list(text: &str, separator: char) -> Vec<&str> {
    text.split(separator)
        .map(|item| item.trim().trim_end_matches('.').trim())
        .filter(|item| !item.is_empty() && item.len() <= MAX_TOKEN_LENGTH)
        .collect()
}

/// First whitespace-delimited word of a line, without a trailing `;`
pub fn first_word(text: &str) -> Option<&str> {
    text.split_whitespace()
        .next()
        .map(|w| w.trim_end_matches(';'))
        .filter(|w| !w.is_empty())
}

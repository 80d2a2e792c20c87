pub(crate) type RandomState = std::hash::BuildHasherDefault<seahash::SeaHasher>;

/// Tokens shorter than this never make useful index keys.
pub const MIN_TOKEN_LENGTH: usize = 3;

#[inline]
fn is_token_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '%'
}

/// Splits an already-lowercased URL into runs of `[a-z0-9%]` of at least
/// three characters.
pub fn tokenize(location: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;

    for (i, c) in location.char_indices() {
        if is_token_char(c) {
            if start.is_none() {
                start = Some(i);
            }
        } else if let Some(s) = start.take() {
            if i - s >= MIN_TOKEN_LENGTH {
                tokens.push(&location[s..i]);
            }
        }
    }
    if let Some(s) = start {
        if location.len() - s >= MIN_TOKEN_LENGTH {
            tokens.push(&location[s..]);
        }
    }
    tokens
}

/// Index-key candidates in a lowercased filter body: runs of `[a-z0-9%]` of
/// at least three characters, bounded on both sides by a character outside
/// `[a-z0-9%*]`. Runs touching either end of the text do not qualify, and a
/// `*` on either side disqualifies a run (a wildcard edge means the token
/// may not appear verbatim in a matching URL).
pub fn keyword_candidates(text: &str) -> Vec<&str> {
    let mut candidates = Vec::new();
    let mut start: Option<usize> = None;
    let mut delimiter: Option<char> = None;
    let mut previous: Option<char> = None;

    for (i, c) in text.char_indices() {
        if is_token_char(c) {
            if start.is_none() {
                start = Some(i);
                delimiter = previous;
            }
        } else if let Some(s) = start.take() {
            if i - s >= MIN_TOKEN_LENGTH
                && matches!(delimiter, Some(d) if d != '*')
                && c != '*'
            {
                candidates.push(&text[s..i]);
            }
        }
        previous = Some(c);
    }
    // A trailing run has no following character, so it is never a candidate.
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_works() {
        assert_eq!(tokenize(""), Vec::<&str>::new());
        assert_eq!(tokenize("foo"), vec!["foo"]);
        assert_eq!(tokenize("ab"), Vec::<&str>::new());
        assert_eq!(
            tokenize("http://ads.example.com/a.js"),
            vec!["http", "ads", "example", "com"]
        );
        assert_eq!(tokenize("a%20b-cdef"), vec!["a%20b", "cdef"]);
    }

    #[test]
    fn keyword_candidates_are_delimited_on_both_sides() {
        // Runs touching either end of the text are excluded.
        assert_eq!(keyword_candidates("example"), Vec::<&str>::new());
        assert_eq!(
            keyword_candidates("||ads.example.com^"),
            vec!["ads", "example", "com"]
        );
        assert_eq!(
            keyword_candidates("||ads.example.com"),
            vec!["ads", "example"]
        );
    }

    #[test]
    fn keyword_candidates_reject_wildcard_edges() {
        assert_eq!(keyword_candidates("/banner*"), Vec::<&str>::new());
        assert_eq!(keyword_candidates("*banner/"), Vec::<&str>::new());
        assert_eq!(keyword_candidates("/banner/"), vec!["banner"]);
    }

    #[test]
    fn short_runs_are_skipped() {
        assert_eq!(keyword_candidates("/ad/banner/"), vec!["banner"]);
    }
}

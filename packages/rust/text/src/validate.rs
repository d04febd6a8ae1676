//! Decide whether fetched text is the document an expected excerpt describes.

use std::fmt;

use tracing::debug;
use versebatch_shared::ValidationConfig;

use crate::align::{Alignment, align};
use crate::normalize::normalize;

const ASCII_ELLIPSIS: &str = "...";
const UNICODE_ELLIPSIS: char = '\u{2026}';

/// Why a document was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// Fetched text is shorter than the excerpt it should contain.
    TooShort { actual_chars: usize, expected_chars: usize },
    /// The excerpt could not be found near the start of the document.
    StartingWords { distance: usize },
    /// The document is much longer or shorter than expected.
    WordCount { expected: usize, actual: usize },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort {
                actual_chars,
                expected_chars,
            } => write!(
                f,
                "only got {actual_chars} characters, expected at least {expected_chars}"
            ),
            Self::StartingWords { distance } => {
                write!(f, "starting words differ (distance {distance})")
            }
            Self::WordCount { expected, actual } => {
                write!(f, "word count mismatch: expected {expected}, got {actual}")
            }
        }
    }
}

/// Outcome of validating one fetched document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    /// `None` when the document was accepted.
    pub rejection: Option<RejectReason>,
    /// Raw alignment, when one was computed.
    pub alignment: Option<Alignment>,
}

impl Verdict {
    pub fn is_accepted(&self) -> bool {
        self.rejection.is_none()
    }

    pub fn distance(&self) -> Option<usize> {
        self.alignment.map(|a| a.distance)
    }

    pub fn offset(&self) -> Option<usize> {
        self.alignment.map(|a| a.offset)
    }

    /// Human-readable summary for logs.
    pub fn reason(&self) -> String {
        match &self.rejection {
            None => "validation passed".to_string(),
            Some(reason) => format!("validation failed: {reason}"),
        }
    }
}

/// Number of whitespace-delimited words in `text`.
pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Validate `actual` against an `expected` excerpt and word count.
///
/// The length check compares raw character counts. Alignment runs on the
/// normalized excerpt (cut at its first ellipsis) against the normalized
/// first `window_chars` characters of `actual`. The word count is taken from
/// the raw text starting at the aligned offset.
pub fn validate(
    expected: &str,
    actual: &str,
    expected_words: usize,
    config: &ValidationConfig,
) -> Verdict {
    let expected_chars = expected.chars().count();
    let actual_chars = actual.chars().count();
    if actual_chars < expected_chars {
        return Verdict {
            rejection: Some(RejectReason::TooShort {
                actual_chars,
                expected_chars,
            }),
            alignment: None,
        };
    }

    let window = char_prefix(actual, config.window_chars);
    let excerpt = truncate_at_ellipsis(expected);

    let alignment = align(&normalize(excerpt), &normalize(window));
    debug!(
        distance = alignment.distance,
        offset = alignment.offset,
        "excerpt aligned"
    );

    if alignment.distance >= config.max_distance {
        return Verdict {
            rejection: Some(RejectReason::StartingWords {
                distance: alignment.distance,
            }),
            alignment: Some(alignment),
        };
    }

    let words = count_words(char_suffix(actual, alignment.offset));
    if words.abs_diff(expected_words) > config.word_count_tolerance {
        return Verdict {
            rejection: Some(RejectReason::WordCount {
                expected: expected_words,
                actual: words,
            }),
            alignment: Some(alignment),
        };
    }

    Verdict {
        rejection: None,
        alignment: Some(alignment),
    }
}

fn truncate_at_ellipsis(text: &str) -> &str {
    let text = text.split(ASCII_ELLIPSIS).next().unwrap_or(text);
    text.split(UNICODE_ELLIPSIS).next().unwrap_or(text)
}

/// The first `max_chars` characters of `text`.
fn char_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

/// `text` with the first `skip_chars` characters removed.
fn char_suffix(text: &str, skip_chars: usize) -> &str {
    match text.char_indices().nth(skip_chars) {
        Some((byte, _)) => &text[byte..],
        None => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(expected: &str, actual: &str, words: usize) -> Verdict {
        validate(expected, actual, words, &ValidationConfig::default())
    }

    #[test]
    fn accepts_single_insertion() {
        let v = check("abcd", "abbcd", 1);
        assert!(v.is_accepted());
        assert_eq!(v.distance(), Some(1));
        assert!(matches!(v.offset(), Some(0 | 1)));
    }

    #[test]
    fn accepts_exact_and_prefix_matches() {
        let v = check("Hello, world!", "Hello, world!", 2);
        assert!(v.is_accepted());
        assert_eq!(v.alignment, Some(Alignment { distance: 0, offset: 0 }));

        let v = check("Hello, world!", "Hello, world!  Habibi I'm here.", 5);
        assert!(v.is_accepted());
        assert_eq!(v.alignment, Some(Alignment { distance: 0, offset: 0 }));
    }

    #[test]
    fn reports_leading_offset() {
        let v = check("Hello, world!", "1Hello, world!  Habibi I'm here.", 5);
        assert!(v.is_accepted());
        assert_eq!(v.alignment, Some(Alignment { distance: 0, offset: 1 }));
    }

    #[test]
    fn counts_inserted_run() {
        let v = check("aabcddcba", "aabcdxyzdcba", 1);
        assert!(v.is_accepted());
        assert_eq!(v.distance(), Some(3));
    }

    #[test]
    fn tolerates_small_edits() {
        let deleted = check("Hello, world!", "Hello world!  Habibi I'm here.", 5);
        assert!(deleted.is_accepted());
        assert_eq!(deleted.distance(), Some(1));
        assert_eq!(deleted.offset(), Some(0));

        let altered = check("Hello, world!", "Hello. world!  Habibi I'm here.", 5);
        assert!(altered.is_accepted());
        assert_eq!(altered.distance(), Some(1));
        assert_eq!(altered.offset(), Some(0));
    }

    #[test]
    fn rejects_text_shorter_than_excerpt() {
        let v = check("Hello, world!", "Hello world!", 2);
        assert!(!v.is_accepted());
        assert_eq!(
            v.rejection,
            Some(RejectReason::TooShort {
                actual_chars: 12,
                expected_chars: 13
            })
        );
        assert_eq!(v.alignment, None);
    }

    #[test]
    fn excerpt_is_cut_at_ellipsis() {
        let ascii = check("Hello, ...", "Hello, world!  Habibi I'm here.", 5);
        assert!(ascii.is_accepted());
        assert_eq!(ascii.alignment, Some(Alignment { distance: 0, offset: 0 }));

        let unicode = check(
            "Hello, \u{2026} goodnight I'm gone",
            "Hello, world!  Habibi I'm here.",
            5,
        );
        assert!(unicode.is_accepted());
        assert_eq!(unicode.alignment, Some(Alignment { distance: 0, offset: 0 }));
    }

    #[test]
    fn finds_excerpt_past_preamble() {
        let v = check("Hello, ...", "There's a lot going on, Hello, world!", 7);
        assert!(v.is_accepted());
        assert_eq!(v.offset(), Some(24));
    }

    #[test]
    fn rejects_distant_starting_words() {
        let v = check("qqqqq qqqqq qqqqq qqqqq", "zzzzz zzzzz zzzzz zzzzz zzzzz", 4);
        assert!(matches!(
            v.rejection,
            Some(RejectReason::StartingWords { distance }) if distance >= 15
        ));
        assert!(v.reason().starts_with("validation failed"));
    }

    #[test]
    fn rejects_word_count_outside_tolerance() {
        let long = "word ".repeat(100);
        let v = check("word word", &long, 10);
        assert_eq!(
            v.rejection,
            Some(RejectReason::WordCount {
                expected: 10,
                actual: 100
            })
        );
        assert_eq!(v.distance(), Some(0));

        // exactly at the tolerance boundary is still accepted
        assert!(check("word word", &long, 70).is_accepted());
    }

    #[test]
    fn window_bounds_alignment() {
        let config = ValidationConfig {
            window_chars: 5,
            ..ValidationConfig::default()
        };
        let v = validate("xyz", "aaaaaaaaaaxyz", 1, &config);
        // match lies outside the window, so all three chars must be edited
        assert_eq!(v.distance(), Some(3));
    }

    #[test]
    fn normalizes_arabic_before_aligning() {
        let v = check("أَشْهَدُ", "اشهد ان لا اله الا الله", 6);
        assert!(v.is_accepted());
        assert_eq!(v.distance(), Some(0));
    }

    #[test]
    fn counts_whitespace_words() {
        assert_eq!(count_words("  one two\tthree\n four "), 4);
        assert_eq!(count_words(""), 0);
    }
}

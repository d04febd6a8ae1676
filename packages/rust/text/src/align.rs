//! Free-start edit-distance alignment of an expected excerpt against fetched
//! text.

use tracing::trace;

/// Best placement of `expected` inside `actual`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Alignment {
    /// Minimum number of edits needed to make `expected` appear in `actual`.
    pub distance: usize,
    /// Character offset in `actual` where the best match starts.
    pub offset: usize,
}

#[derive(Clone, Copy)]
struct Cell {
    cost: usize,
    offset: usize,
}

/// Align `expected` against every possible start position in `actual`.
///
/// Distances and offsets are measured in characters. Skipping a prefix of
/// `actual` is free, skipping anything after the match start costs one per
/// character. Ties resolve to the diagonal move, then up, then left, and the
/// earliest row wins among equal final distances.
///
/// Runs in O(|actual| * |expected|) time; callers bound both lengths.
pub fn align(expected: &str, actual: &str) -> Alignment {
    let expected: Vec<char> = expected.chars().collect();
    let actual: Vec<char> = actual.chars().collect();
    let n = expected.len();

    // Row 0: nothing of `actual` consumed, every expected char is an insertion.
    let mut prev: Vec<Cell> = (0..=n).map(|j| Cell { cost: j, offset: 0 }).collect();
    let mut curr = prev.clone();

    let mut best = prev[n];

    for (i, &a) in actual.iter().enumerate() {
        let row = i + 1;
        curr[0] = Cell {
            cost: 0,
            offset: row,
        };

        for (j, &e) in expected.iter().enumerate() {
            let col = j + 1;
            let substitution = usize::from(a != e);

            let diagonal = Cell {
                cost: prev[col - 1].cost + substitution,
                offset: prev[col - 1].offset,
            };
            let up = Cell {
                cost: prev[col].cost + 1,
                offset: prev[col].offset,
            };
            let left = Cell {
                cost: curr[col - 1].cost + 1,
                offset: curr[col - 1].offset,
            };

            curr[col] = if diagonal.cost <= up.cost && diagonal.cost <= left.cost {
                diagonal
            } else if up.cost <= left.cost {
                up
            } else {
                left
            };
        }

        if curr[n].cost < best.cost {
            best = curr[n];
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    trace!(
        expected_len = n,
        actual_len = actual.len(),
        distance = best.cost,
        offset = best.offset,
        "alignment computed"
    );

    Alignment {
        distance: best.cost,
        offset: best.offset,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(expected: &str, actual: &str) -> (usize, usize) {
        let a = align(expected, actual);
        (a.distance, a.offset)
    }

    #[test]
    fn exact_match() {
        assert_eq!(check("abc", "abc"), (0, 0));
    }

    #[test]
    fn extra_character_in_actual() {
        assert_eq!(check("abc", "ab.c"), (1, 0));
    }

    #[test]
    fn missing_character_in_actual() {
        assert_eq!(check("abc", "ac"), (1, 0));
    }

    #[test]
    fn changed_character() {
        assert_eq!(check("abc", "a.c"), (1, 0));
    }

    #[test]
    fn match_may_start_anywhere() {
        assert_eq!(check("abc", ".abc"), (0, 1));
        assert_eq!(check("cde", "abcdefgh"), (0, 2));
        assert_eq!(check("def", "dddddddefffffff"), (0, 6));
    }

    #[test]
    fn distances_for_assorted_pairs() {
        assert_eq!(check("abc", "abdecf").0, 1);
        assert_eq!(check("a", "b").0, 1);
        assert_eq!(check("aaab", "baab").0, 1);
        assert_eq!(check("mnop", "qrst").0, 4);
    }

    #[test]
    fn empty_inputs() {
        assert_eq!(check("", "anything"), (0, 0));
        assert_eq!(check("abc", ""), (3, 0));
        assert_eq!(check("", ""), (0, 0));
    }

    #[test]
    fn offsets_count_characters_not_bytes() {
        assert_eq!(check("شهد", "اشهد"), (0, 1));
    }

    #[test]
    fn distance_never_exceeds_expected_length() {
        for (expected, actual) in [("hello", "xyz"), ("ab", "zzzzzzzz"), ("longer text", "t")] {
            assert!(align(expected, actual).distance <= expected.chars().count());
        }
    }
}

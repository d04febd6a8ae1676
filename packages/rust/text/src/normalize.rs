//! Orthographic normalization for Arabic and Persian text.
//!
//! Each pass is a regex replacement applied in sequence. The order matters:
//! the hamza fold runs before anything that would map its inputs elsewhere.

use std::sync::LazyLock;

use regex::Regex;

/// Normalize `text` so that orthographic variants compare equal.
///
/// Strips harakat and tatweel, collapses whitespace, folds letter variants
/// (kaf, alef, ye, heh, lam, hamza) to one code point each, expands lam-alef
/// ligatures and trims. Pure and idempotent.
pub fn normalize(text: &str) -> String {
    let mut result = strip_diacritics(text);

    result = collapse_whitespace(&result);
    result = fold_letters(&result);
    result = expand_ligatures(&result);

    result.trim().to_string()
}

// ---------------------------------------------------------------------------
// Pass 1: Diacritics
// ---------------------------------------------------------------------------

/// Remove tatweel, harakat (fathatan through sukun and friends) and the
/// superscript alef.
fn strip_diacritics(text: &str) -> String {
    static MARKS_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"[\x{0640}\x{064B}-\x{065F}\x{0670}]").expect("valid regex")
    });

    MARKS_RE.replace_all(text, "").into_owned()
}

// ---------------------------------------------------------------------------
// Pass 2: Whitespace
// ---------------------------------------------------------------------------

fn collapse_whitespace(text: &str) -> String {
    static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

    WS_RE.replace_all(text, " ").into_owned()
}

// ---------------------------------------------------------------------------
// Pass 3: Letter folding
// ---------------------------------------------------------------------------

/// Letter folds, applied top to bottom.
///
/// Waw-with-hamza and ye-with-hamza are folded to the bare hamza here, so no
/// later rule ever sees them.
static LETTER_FOLDS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        // Persian kaf -> Arabic kaf
        (r"\x{06A9}", "\u{0643}"),
        // alef with madda / hamza above / hamza below / wasla variants
        (r"[\x{0622}\x{0623}\x{0625}\x{0671}-\x{0673}]", "\u{0627}"),
        // Farsi ye, alef maksura
        (r"[\x{06CC}\x{0649}]", "\u{064A}"),
        // heh variants, teh marbuta
        (r"[\x{06C1}\x{06D5}\x{06C0}\x{06C2}\x{0629}\x{06C3}]", "\u{0647}"),
        // lam with small v
        (r"\x{06B5}", "\u{0644}"),
        // hamza carriers
        (r"[\x{0674}\x{0624}\x{0626}\x{0675}]", "\u{0621}"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).expect("valid regex"), replacement))
    .collect()
});

fn fold_letters(text: &str) -> String {
    let mut result = text.to_string();
    for (re, replacement) in LETTER_FOLDS.iter() {
        if re.is_match(&result) {
            result = re.replace_all(&result, *replacement).into_owned();
        }
    }
    result
}

// ---------------------------------------------------------------------------
// Pass 4: Ligatures
// ---------------------------------------------------------------------------

/// Presentation-form lam-alef ligatures become lam followed by alef.
fn expand_ligatures(text: &str) -> String {
    static LAM_ALEF_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[\x{FEF5}-\x{FEFC}]").expect("valid regex"));

    LAM_ALEF_RE.replace_all(text, "\u{0644}\u{0627}").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_harakat_and_folds_alef() {
        assert_eq!(normalize("أَشْهَدُ"), "اشهد");
    }

    #[test]
    fn strips_tatweel_and_superscript_alef() {
        assert_eq!(normalize("كـــتاب"), "كتاب");
        assert_eq!(normalize("هٰذا"), "هذا");
    }

    #[test]
    fn collapses_and_trims_whitespace() {
        assert_eq!(normalize("  Hello,\t\n  world!  "), "Hello, world!");
        assert_eq!(normalize(""), "");
        assert_eq!(normalize(" \n\t "), "");
    }

    #[test]
    fn folds_persian_letters() {
        // keheh, farsi ye, heh goal
        assert_eq!(normalize("\u{06A9}\u{06CC}\u{06C1}"), "\u{0643}\u{064A}\u{0647}");
        // alef maksura, teh marbuta
        assert_eq!(normalize("\u{0649}\u{0629}"), "\u{064A}\u{0647}");
        assert_eq!(normalize("\u{06B5}"), "\u{0644}");
    }

    #[test]
    fn hamza_carriers_fold_to_bare_hamza() {
        assert_eq!(normalize("\u{0624}"), "\u{0621}");
        assert_eq!(normalize("\u{0626}"), "\u{0621}");
        assert_eq!(normalize("\u{0674}\u{0675}"), "\u{0621}\u{0621}");
    }

    #[test]
    fn expands_lam_alef_ligatures() {
        assert_eq!(normalize("\u{FEFB}"), "\u{0644}\u{0627}");
        assert_eq!(normalize("\u{FEF5}\u{FEFC}"), "\u{0644}\u{0627}\u{0644}\u{0627}");
    }

    #[test]
    fn latin_text_is_only_whitespace_normalized() {
        assert_eq!(normalize("Hello, world!"), "Hello, world!");
    }

    #[test]
    fn is_idempotent() {
        let samples = [
            "أَشْهَدُ أَنْ لا إِلٰهَ إِلّا اللّٰه",
            "  ﻻ  \u{0624}\u{0626}  ",
            "یک کتاب",
            "Hello,   world",
        ];
        for sample in samples {
            let once = normalize(sample);
            assert_eq!(normalize(&once), once, "not idempotent for {sample:?}");
        }
    }
}

//! reference.bahai.org extractor for the older reference library.

use std::sync::LazyLock;

use scraper::{Html, Selector};
use url::Url;

use versebatch_shared::Result;

use super::{SiteExtractor, text_without};

static TEXT_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.Stext2").expect("valid selector"));

/// Collects every `Stext2` block with its links removed.
pub struct ReferenceExtractor;

impl SiteExtractor for ReferenceExtractor {
    fn hosts(&self) -> &[&'static str] {
        &["reference.bahai.org"]
    }

    fn extract(&self, doc: &Html, _url: &Url) -> Result<String> {
        let mut text = String::new();
        for block in doc.select(&TEXT_SEL) {
            text.push_str(&text_without(block, &["a"]));
            text.push('\n');
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        "reference"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_links_from_blocks() {
        let doc = Html::parse_document(
            r##"<div class="Stext2">Verse one<a href="#n1">[1]</a>.</div>
               <div class="nav"><a href="/">home</a></div>
               <div class="Stext2">Verse two.</div>"##,
        );
        let url = Url::parse("https://reference.bahai.org/fa/t/b/x.html").unwrap();
        assert_eq!(
            ReferenceExtractor.extract(&doc, &url).unwrap(),
            "Verse one.\nVerse two.\n"
        );
    }

    #[test]
    fn no_blocks_yields_empty_text() {
        let doc = Html::parse_document("<p>nothing</p>");
        let url = Url::parse("https://reference.bahai.org/x").unwrap();
        assert_eq!(ReferenceExtractor.extract(&doc, &url).unwrap(), "");
    }
}

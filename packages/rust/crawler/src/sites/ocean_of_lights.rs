//! oceanoflights.org extractor.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use url::Url;

use versebatch_shared::{Result, VersebatchError};

use super::SiteExtractor;

static TABLET_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.tablet-content").expect("valid selector"));
static PARAGRAPH_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p").expect("valid selector"));

/// Concatenates the paragraphs of the page's single tablet container.
pub struct OceanOfLightsExtractor;

impl SiteExtractor for OceanOfLightsExtractor {
    fn hosts(&self) -> &[&'static str] {
        &["oceanoflights.org"]
    }

    fn extract(&self, doc: &Html, _url: &Url) -> Result<String> {
        let containers: Vec<ElementRef<'_>> = doc.select(&TABLET_SEL).collect();
        let [container] = containers.as_slice() else {
            return Err(VersebatchError::parse(format!(
                "expected exactly one tablet-content container, found {}",
                containers.len()
            )));
        };

        let mut text = String::new();
        for p in container.select(&PARAGRAPH_SEL) {
            text.extend(p.text());
            text.push('\n');
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        "oceanoflights"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_paragraphs() {
        let doc = Html::parse_document(
            r#"<div class="header"><p>menu</p></div>
               <div class="tablet-content"><p>بسم <b>الله</b></p><p>second</p></div>"#,
        );
        let url = Url::parse("https://oceanoflights.org/abc").unwrap();
        assert_eq!(
            OceanOfLightsExtractor.extract(&doc, &url).unwrap(),
            "بسم الله\nsecond\n"
        );
    }

    #[test]
    fn missing_container_is_an_error() {
        let doc = Html::parse_document("<p>no tablet</p>");
        let url = Url::parse("https://oceanoflights.org/abc").unwrap();
        assert!(OceanOfLightsExtractor.extract(&doc, &url).is_err());
    }
}

//! bahai.org library extractor.

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use versebatch_shared::{Result, VersebatchError};

use super::{SiteExtractor, has_class, text_without};

static DOCUMENT_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.library-document").expect("valid selector"));
static PARAGRAPH_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p").expect("valid selector"));
static LOCATION_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.brl-location[id]").expect("valid selector"));

/// A link only present in the Prayers and Meditations compilation, where
/// selections are separated by centered headings instead of selection numbers.
static PRAYERS_AND_MEDITATIONS_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        r#"a[href="/fa/library/authoritative-texts/bahaullah/prayers-meditations/1#198178094"]"#,
    )
    .expect("valid selector")
});

const SELECTION_NUMBER_CLASS: &str = "brl-global-selection-number";
const CENTERED_CLASS: &str = "brl-align-center";

/// Extracts one selection from a bahai.org library page.
///
/// The URL's last path segment names the `brl-location` anchor where the
/// selection starts; text runs until the next selection begins.
pub struct BahaiOrgExtractor;

impl SiteExtractor for BahaiOrgExtractor {
    fn hosts(&self) -> &[&'static str] {
        &["bahai.org", "www.bahai.org"]
    }

    fn extract(&self, doc: &Html, url: &Url) -> Result<String> {
        let link_id = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| VersebatchError::parse(format!("no link id in {url}")))?;

        let prayers_and_meditations = doc.select(&PRAYERS_AND_MEDITATIONS_SEL).next().is_some();

        let containers: Vec<ElementRef<'_>> = doc.select(&DOCUMENT_SEL).collect();
        let [container] = containers.as_slice() else {
            return Err(VersebatchError::parse(format!(
                "expected exactly one library-document container, found {}",
                containers.len()
            )));
        };

        let paragraphs: Vec<ElementRef<'_>> = container.select(&PARAGRAPH_SEL).collect();

        // The last paragraph carrying the anchor wins.
        let start = paragraphs
            .iter()
            .rposition(|p| {
                p.select(&LOCATION_SEL)
                    .any(|a| a.value().attr("id") == Some(link_id))
            })
            .ok_or_else(|| {
                VersebatchError::parse(format!("could not find link id {link_id} on page"))
            })?;

        debug!(link_id, start, prayers_and_meditations, "selection located");

        let mut text = String::new();
        for p in &paragraphs[start..] {
            if !text.is_empty() {
                if has_class(*p, SELECTION_NUMBER_CLASS) {
                    break;
                }
                if prayers_and_meditations && has_class(*p, CENTERED_CLASS) {
                    break;
                }
            }

            text.push_str(&text_without(*p, &["a", "sup"]));
            text.push('\n');
        }

        Ok(text)
    }

    fn name(&self) -> &str {
        "bahai.org"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str) -> Html {
        Html::parse_document(&format!(
            r#"<html><body><div class="library-document">{body}</div></body></html>"#
        ))
    }

    fn extract(doc: &Html, url: &str) -> Result<String> {
        BahaiOrgExtractor.extract(doc, &Url::parse(url).unwrap())
    }

    #[test]
    fn extracts_selection_until_next_number() {
        let doc = page(
            r#"
            <p class="brl-global-selection-number">1</p>
            <p><a class="brl-location" id="111"></a>First selection.</p>
            <p class="brl-global-selection-number">2</p>
            <p><a class="brl-location" id="222"></a>Second<sup>1</sup> selection, <a href="/n">note</a>part one.</p>
            <p>Part two.</p>
            <p class="brl-global-selection-number">3</p>
            <p><a class="brl-location" id="333"></a>Third.</p>
            "#,
        );

        let text = extract(&doc, "https://www.bahai.org/r/222").unwrap();
        assert_eq!(text, "Second selection, part one.\nPart two.\n");
    }

    #[test]
    fn centered_paragraphs_only_stop_prayers_and_meditations() {
        let body = r#"
            <p><a class="brl-location" id="500"></a>Prayer text.</p>
            <p class="brl-align-center">Next heading</p>
            <p>More.</p>
        "#;

        let regular = page(body);
        assert_eq!(
            extract(&regular, "https://bahai.org/r/500").unwrap(),
            "Prayer text.\nNext heading\nMore.\n"
        );

        let compilation = page(&format!(
            r#"<a href="/fa/library/authoritative-texts/bahaullah/prayers-meditations/1#198178094">x</a>{body}"#
        ));
        assert_eq!(
            extract(&compilation, "https://bahai.org/r/500").unwrap(),
            "Prayer text.\n"
        );
    }

    #[test]
    fn missing_anchor_is_an_error() {
        let doc = page(r#"<p><a class="brl-location" id="1"></a>Only.</p>"#);
        let err = extract(&doc, "https://bahai.org/r/2").unwrap_err();
        assert!(err.to_string().contains("could not find link id 2"));
    }

    #[test]
    fn requires_single_container() {
        let doc = Html::parse_document(
            r#"<div class="library-document"></div><div class="library-document"></div>"#,
        );
        assert!(extract(&doc, "https://bahai.org/r/1").is_err());

        let empty = Html::parse_document("<p>nothing</p>");
        assert!(extract(&empty, "https://bahai.org/r/1").is_err());
    }
}

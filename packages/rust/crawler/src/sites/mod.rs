//! Site extractors: turn a downloaded page into the plain text of one
//! document.
//!
//! Extractors are selected by host name. Pages from hosts without an
//! extractor are not downloaded at all.

mod bahai_org;
mod ocean_of_lights;
mod reference;

use std::collections::HashMap;

use scraper::{ElementRef, Html};
use url::Url;

use versebatch_shared::Result;

pub use bahai_org::BahaiOrgExtractor;
pub use ocean_of_lights::OceanOfLightsExtractor;
pub use reference::ReferenceExtractor;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Host-specific text extraction.
pub trait SiteExtractor: Send + Sync {
    /// Host names this extractor handles.
    fn hosts(&self) -> &[&'static str];

    /// Extract the document text. Each paragraph is followed by a newline.
    fn extract(&self, doc: &Html, url: &Url) -> Result<String>;

    /// Human-readable extractor name for tracing.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Maps host names to extractors.
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn SiteExtractor>>,
    /// Extra host -> known host routes (mirrors, local test servers).
    aliases: HashMap<String, String>,
}

impl ExtractorRegistry {
    /// Create a registry with all built-in extractors.
    pub fn new() -> Self {
        Self {
            extractors: vec![
                Box::new(BahaiOrgExtractor),
                Box::new(OceanOfLightsExtractor),
                Box::new(ReferenceExtractor),
            ],
            aliases: HashMap::new(),
        }
    }

    /// Route pages from `host` to the extractor registered for `known_host`.
    pub fn alias(&mut self, host: impl Into<String>, known_host: impl Into<String>) {
        self.aliases.insert(host.into(), known_host.into());
    }

    /// Find the extractor for the URL's host, if any.
    pub fn detect(&self, url: &Url) -> Option<&dyn SiteExtractor> {
        let host = url.host_str()?;
        let host = self.aliases.get(host).map(String::as_str).unwrap_or(host);

        self.extractors
            .iter()
            .find(|e| e.hosts().contains(&host))
            .map(|e| e.as_ref())
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Text content of `el`, skipping anything inside the named descendant tags.
pub(crate) fn text_without(el: ElementRef<'_>, skip_tags: &[&str]) -> String {
    let mut out = String::new();

    for node in el.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let skipped = node
            .ancestors()
            .take_while(|a| a.id() != el.id())
            .filter_map(|a| a.value().as_element())
            .any(|e| skip_tags.contains(&e.name()));
        if !skipped {
            out.push_str(text);
        }
    }

    out
}

/// Whether `el` carries `class`.
pub(crate) fn has_class(el: ElementRef<'_>, class: &str) -> bool {
    el.value().classes().any(|c| c == class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Selector;

    #[test]
    fn detects_by_host() {
        let registry = ExtractorRegistry::new();
        let cases = [
            ("https://www.bahai.org/r/123", Some("bahai.org")),
            ("https://bahai.org/r/123", Some("bahai.org")),
            ("https://oceanoflights.org/x", Some("oceanoflights")),
            ("https://reference.bahai.org/fa/t/b/x.html", Some("reference")),
            ("https://example.com/", None),
        ];
        for (url, expected) in cases {
            let url = Url::parse(url).unwrap();
            assert_eq!(registry.detect(&url).map(|e| e.name()), expected, "{url}");
        }
    }

    #[test]
    fn aliases_route_unknown_hosts() {
        let mut registry = ExtractorRegistry::new();
        let url = Url::parse("http://127.0.0.1:8080/r/1").unwrap();
        assert!(registry.detect(&url).is_none());

        registry.alias("127.0.0.1", "oceanoflights.org");
        assert_eq!(registry.detect(&url).map(|e| e.name()), Some("oceanoflights"));
    }

    #[test]
    fn text_without_skips_nested_tags() {
        let doc = Html::parse_fragment(
            r#"<p>one <a href="x">link <b>bold</b></a>two<sup>3</sup> <i>four</i></p>"#,
        );
        let p = doc.select(&Selector::parse("p").unwrap()).next().unwrap();
        assert_eq!(text_without(p, &["a", "sup"]), "one two four");
    }
}

//! Document fetching: download a page and extract its text.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use scraper::Html;
use tracing::{debug, info, instrument};
use url::Url;

use versebatch_shared::{FetchConfig, Result, VersebatchError};

use crate::sites::{ExtractorRegistry, SiteExtractor};

/// User-Agent string for document requests.
const USER_AGENT: &str = concat!("versebatch/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Turns a URL into the plain text of the document it names.
pub trait Fetcher: Send + Sync + 'static {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String>> + Send;
}

impl<F: Fetcher> Fetcher for Arc<F> {
    fn fetch(&self, url: &str) -> impl Future<Output = Result<String>> + Send {
        (**self).fetch(url)
    }
}

// ---------------------------------------------------------------------------
// HttpFetcher
// ---------------------------------------------------------------------------

/// Fetches pages over HTTP and extracts text with the site extractor for the
/// page's host.
pub struct HttpFetcher {
    client: Client,
    registry: ExtractorRegistry,
    upgrade_http: bool,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VersebatchError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            registry: ExtractorRegistry::new(),
            upgrade_http: true,
        })
    }

    /// Whether `http://` URLs are rewritten to `https://` (on by default).
    pub fn upgrade_http(mut self, enabled: bool) -> Self {
        self.upgrade_http = enabled;
        self
    }

    /// Route `host` to the extractor for `known_host`.
    pub fn with_host_alias(mut self, host: impl Into<String>, known_host: impl Into<String>) -> Self {
        self.registry.alias(host, known_host);
        self
    }

    fn resolve(&self, url: &str) -> Result<Url> {
        let url = match url.strip_prefix("http://") {
            Some(rest) if self.upgrade_http => format!("https://{rest}"),
            _ => url.to_string(),
        };
        Url::parse(&url).map_err(|e| VersebatchError::parse(format!("invalid URL {url}: {e}")))
    }

    async fn download(&self, url: &Url) -> Result<String> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| VersebatchError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(VersebatchError::Network(format!(
                "received {status} downloading {url}"
            )));
        }

        response
            .text()
            .await
            .map_err(|e| VersebatchError::Network(format!("{url}: failed to read body: {e}")))
    }
}

impl Fetcher for HttpFetcher {
    #[instrument(skip_all, fields(url = %url))]
    async fn fetch(&self, url: &str) -> Result<String> {
        let url = self.resolve(url)?;

        let extractor = self.registry.detect(&url).ok_or_else(|| {
            VersebatchError::parse(format!("no extractor matches host of {url}"))
        })?;
        debug!(extractor = extractor.name(), "extractor selected");

        let body = self.download(&url).await?;
        let text = extract(extractor, &url, &body)?;

        info!(chars = text.chars().count(), "downloaded and parsed");
        Ok(text)
    }
}

fn extract(extractor: &dyn SiteExtractor, url: &Url, body: &str) -> Result<String> {
    let doc = Html::parse_document(body);
    let text = extractor.extract(&doc, url)?;

    if text.is_empty() {
        return Err(VersebatchError::parse(format!(
            "{} extractor returned no content for {url}",
            extractor.name()
        )));
    }
    Ok(text)
}

//! Document fetching and site-specific text extraction.
//!
//! This crate provides:
//! - [`Fetcher`]: the `fetch(url) -> text` seam used by download pipelines
//! - [`HttpFetcher`]: reqwest-backed implementation
//! - [`sites`]: host-specific extractors and their registry

pub mod fetcher;
pub mod sites;

pub use fetcher::{Fetcher, HttpFetcher};
pub use sites::{
    BahaiOrgExtractor, ExtractorRegistry, OceanOfLightsExtractor, ReferenceExtractor,
    SiteExtractor,
};

//! Outbound link extraction

use std::collections::HashSet;

use scraper::{Html, Selector};
use url::Url;

use crate::crawler::error::CrawlError;
use crate::normalize::normalize;

/// Pulls the `href` of every anchor out of a parsed page
pub struct LinkExtractor {
    anchors: Selector,
}

impl LinkExtractor {
    pub fn new() -> Result<Self, CrawlError> {
        let anchors = Selector::parse("a[href]")
            .map_err(|e| CrawlError::HtmlParse(format!("Failed to parse link selector: {}", e)))?;
        Ok(Self { anchors })
    }

    /// Normalized, de-duplicated links in document order
    ///
    /// Relative links are resolved against `page_url`; links that do not
    /// normalize (mailto, javascript, malformed) are skipped.
    pub fn extract(&self, document: &Html, page_url: &Url) -> Vec<Url> {
        let mut seen = HashSet::new();
        document
            .select(&self.anchors)
            .filter_map(|anchor| anchor.value().attr("href"))
            .filter_map(|href| normalize(href, Some(page_url)).ok())
            .filter(|link| seen.insert(link.as_str().to_string()))
            .collect()
    }
}

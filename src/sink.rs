//! # Saved Pages
//!
//! The crawler does not know what makes a page worth keeping. It asks a
//! [`PageClassifier`] about every fetched document and hands the URLs it
//! approves to a [`PageSink`], which records them for the extraction stage.
//!
//! ## Key Components
//!
//! - `PageClassifier`: the "is this a savable page?" predicate
//! - `ProductPageClassifier`: default predicate recognising product pages
//! - `PageSink`: the save callback, returning the id assigned to the page
//! - `CsvSink`: append-only CSV output with `id,source_url,discovered_at` rows

mod csv;

pub use self::csv::CsvSink;

use std::future::Future;

use regex::Regex;
use scraper::{Html, Selector};
use thiserror::Error;
use url::Url;

use crate::error::Error as CrateError;

/// Error type for page classification and output
#[derive(Debug, Error)]
pub enum SinkError {
    /// Output file could not be opened or written
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed CSV in an existing output file
    #[error("CSV error: {0}")]
    Csv(#[from] ::csv::Error),

    /// Invalid CSS selector
    #[error("Selector error: {0}")]
    Selector(String),

    /// Invalid class pattern
    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),
}

impl From<SinkError> for CrateError {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::Io(e) => CrateError::Io(e),
            other => CrateError::Sink(other.to_string()),
        }
    }
}

/// Decides whether a fetched page should be saved
pub trait PageClassifier: Send + Sync {
    fn is_savable(&self, document: &Html, url: &Url) -> bool;
}

impl<F> PageClassifier for F
where
    F: Fn(&Html, &Url) -> bool + Send + Sync,
{
    fn is_savable(&self, document: &Html, url: &Url) -> bool {
        self(document, url)
    }
}

/// Records a savable page
///
/// Called at most once per successfully fetched URL in a run; implementations
/// should also tolerate a repeated URL and return the id it already has.
pub trait PageSink: Send + Sync + 'static {
    fn save(&self, url: &Url) -> impl Future<Output = Result<String, SinkError>> + Send;
}

/// Recognises product pages by their markup
///
/// A page qualifies when it declares `og:type` as `product`, or carries a
/// `div` classed like a product or item, a `span` classed like a price, or a
/// `button` classed like a buy or cart action.
pub struct ProductPageClassifier {
    og_product: Selector,
    div: Selector,
    span: Selector,
    button: Selector,
    product_class: Regex,
    price_class: Regex,
    purchase_class: Regex,
}

impl ProductPageClassifier {
    pub fn new() -> Result<Self, SinkError> {
        Ok(Self {
            og_product: selector(r#"meta[property="og:type"][content="product"]"#)?,
            div: selector("div[class]")?,
            span: selector("span[class]")?,
            button: selector("button[class]")?,
            product_class: Regex::new(r"(?i)product|item")?,
            price_class: Regex::new(r"(?i)price")?,
            purchase_class: Regex::new(r"(?i)buy|cart|beli")?,
        })
    }

    fn any_class_matches(&self, document: &Html, selector: &Selector, pattern: &Regex) -> bool {
        document.select(selector).any(|element| {
            element
                .value()
                .attr("class")
                .is_some_and(|class| pattern.is_match(class))
        })
    }
}

impl PageClassifier for ProductPageClassifier {
    fn is_savable(&self, document: &Html, _url: &Url) -> bool {
        document.select(&self.og_product).next().is_some()
            || self.any_class_matches(document, &self.div, &self.product_class)
            || self.any_class_matches(document, &self.span, &self.price_class)
            || self.any_class_matches(document, &self.button, &self.purchase_class)
    }
}

fn selector(css: &str) -> Result<Selector, SinkError> {
    Selector::parse(css)
        .map_err(|e| SinkError::Selector(format!("Failed to parse selector {}: {}", css, e)))
}

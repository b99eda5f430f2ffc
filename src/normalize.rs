//! URL normalization
//!
//! Every URL that reaches the frontier goes through [`normalize`] first, so two
//! spellings of the same page (`HTTP://WWW.Shop.test/item/#reviews` and
//! `http://shop.test/item`) collapse onto a single frontier key.
//!
//! The canonical form:
//!
//! - is resolved against the page it was found on when relative
//! - has no fragment
//! - has a lower-cased scheme and host, with leading `www.` labels removed
//! - has no trailing slash, except for the root path which is always `/`
//! - keeps the query string as written
//!
//! Normalization is idempotent: normalizing a canonical URL returns it unchanged.

use thiserror::Error;
use url::Url;

/// Error returned when a link cannot be turned into a crawlable URL
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    /// Missing scheme or host, or otherwise unparseable
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl From<NormalizeError> for crate::Error {
    fn from(err: NormalizeError) -> Self {
        crate::Error::InvalidUrl(err.to_string())
    }
}

fn invalid(url: &str, reason: impl Into<String>) -> NormalizeError {
    NormalizeError::InvalidUrl {
        url: url.to_string(),
        reason: reason.into(),
    }
}

/// Normalize `raw` into its canonical frontier key, resolving it against `base` if relative.
pub fn normalize(raw: &str, base: Option<&Url>) -> Result<Url, NormalizeError> {
    let trimmed = raw.trim();
    let parsed = match base {
        Some(base) => base.join(trimmed),
        None => Url::parse(trimmed),
    }
    .map_err(|e| invalid(raw, e.to_string()))?;

    canonicalize(parsed).map_err(|reason| invalid(raw, reason))
}

fn canonicalize(mut url: Url) -> Result<Url, String> {
    url.set_fragment(None);

    let host = match url.host_str() {
        Some(host) if !host.is_empty() => host.to_ascii_lowercase(),
        _ => return Err("missing host".to_string()),
    };
    let host = strip_www(&host).to_string();
    if url.host_str() != Some(host.as_str()) {
        url.set_host(Some(&host)).map_err(|e| e.to_string())?;
    }

    let path = url.path().trim_end_matches('/').to_string();
    if path.is_empty() {
        url.set_path("/");
    } else {
        url.set_path(&path);
    }

    Ok(url)
}

/// Domain of a URL as used for politeness and scope checks: lower-cased host without `www.`
pub fn domain_of(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    Some(strip_www(&host).to_string())
}

/// Normalize a bare domain name the same way hosts are normalized
pub fn normalize_domain(domain: &str) -> String {
    let lowered = domain.trim().trim_end_matches('.').to_ascii_lowercase();
    strip_www(&lowered).to_string()
}

/// Drop every leading `www.` label, never leaving the host empty
fn strip_www(mut host: &str) -> &str {
    while let Some(rest) = host.strip_prefix("www.") {
        if rest.is_empty() {
            break;
        }
        host = rest;
    }
    host
}

//! Scope check for discovered links
//!
//! A link is in scope when its domain is one of the allowed domains and its
//! URL contains at least one of the configured keywords. Both must hold.

use std::collections::HashSet;

use url::Url;

use crate::normalize::{domain_of, normalize_domain};

/// Admits links on allowed domains whose URL mentions a keyword
#[derive(Debug, Clone)]
pub struct LinkFilter {
    allowed_domains: HashSet<String>,
    /// Lowercased
    keywords: Vec<String>,
}

impl LinkFilter {
    pub fn new<D, K>(allowed_domains: D, keywords: K) -> Self
    where
        D: IntoIterator,
        D::Item: AsRef<str>,
        K: IntoIterator,
        K::Item: AsRef<str>,
    {
        Self {
            allowed_domains: allowed_domains
                .into_iter()
                .map(|domain| normalize_domain(domain.as_ref()))
                .filter(|domain| !domain.is_empty())
                .collect(),
            keywords: keywords
                .into_iter()
                .map(|keyword| keyword.as_ref().trim().to_lowercase())
                .filter(|keyword| !keyword.is_empty())
                .collect(),
        }
    }

    /// Whether `url` may be admitted to the frontier
    pub fn in_scope(&self, url: &Url) -> bool {
        self.domain_allowed(url) && self.mentions_keyword(url)
    }

    /// Whether the URL's domain, without `www.`, is an allowed domain
    pub fn domain_allowed(&self, url: &Url) -> bool {
        domain_of(url).is_some_and(|domain| self.allowed_domains.contains(&domain))
    }

    fn mentions_keyword(&self, url: &Url) -> bool {
        let haystack = url.as_str().to_lowercase();
        self.keywords
            .iter()
            .any(|keyword| haystack.contains(keyword.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(raw: &str) -> Url {
        Url::parse(raw).unwrap()
    }

    #[test]
    fn test_requires_domain_and_keyword() {
        let filter = LinkFilter::new(["a.test", "www.shop.test"], ["laptop", "X"]);

        assert!(filter.in_scope(&url("https://a.test/x1")));
        assert!(filter.in_scope(&url("https://shop.test/gaming-LAPTOP")));
        assert!(filter.in_scope(&url("https://www.shop.test/laptop")));

        // keyword missing
        assert!(!filter.in_scope(&url("https://a.test/y1")));
        // domain not allowed
        assert!(!filter.in_scope(&url("https://other.test/laptop")));
        // subdomains are distinct domains
        assert!(!filter.in_scope(&url("https://cdn.a.test/x1")));
    }

    #[test]
    fn test_keyword_may_appear_in_query() {
        let filter = LinkFilter::new(["a.test"], ["laptop"]);
        assert!(filter.in_scope(&url("https://a.test/search?q=laptop")));
    }

    #[test]
    fn test_no_keywords_admits_nothing() {
        let filter = LinkFilter::new(["a.test"], Vec::<String>::new());
        assert!(filter.domain_allowed(&url("https://a.test/x1")));
        assert!(!filter.in_scope(&url("https://a.test/x1")));
    }
}

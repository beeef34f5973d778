//! Brave Web Search response parsing and candidate selection.
//!
//! Response shape (only the fields we read):
//! ```json
//! { "web": { "results": [ { "title": "...", "url": "...", "description": "..." } ] } }
//! ```
//! `web` is absent when a query has no web results.

use optout_shared::{ContactPageMatch, OptoutError, Result, WebsiteMatch, origin_of};
use serde::Deserialize;
use url::Url;

use crate::ranker;

/// Hosts that list organizations rather than being one.
const DIRECTORY_HOSTS: &[&str] = &[
    "wikipedia.org",
    "facebook.com",
    "linkedin.com",
    "twitter.com",
    "x.com",
    "instagram.com",
    "youtube.com",
    "yelp.com",
    "bbb.org",
    "guidestar.org",
    "candid.org",
    "charitynavigator.org",
    "causeiq.com",
    "propublica.org",
];

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    web: Option<WebResults>,
}

#[derive(Debug, Deserialize)]
struct WebResults {
    #[serde(default)]
    results: Vec<SearchHit>,
}

/// One web search result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SearchHit {
    #[serde(default)]
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
}

/// Parse a search response body into hits, in search-rank order.
pub(crate) fn parse_results(body: &str) -> Result<Vec<SearchHit>> {
    let response: SearchResponse = serde_json::from_str(body)
        .map_err(|e| OptoutError::parse(format!("search response: {e}")))?;

    Ok(response.web.map(|w| w.results).unwrap_or_default())
}

// ---------------------------------------------------------------------------
// URL helpers
// ---------------------------------------------------------------------------

/// Host without a leading `www.`, lower-cased.
fn bare_host(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

/// Whether a URL points at a directory/social site instead of the organization itself.
pub(crate) fn is_directory_url(url: &str) -> bool {
    match bare_host(url) {
        Some(host) => DIRECTORY_HOSTS
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}"))),
        None => true,
    }
}

fn mentions_contact(hit: &SearchHit) -> bool {
    hit.url.to_lowercase().contains("contact") || hit.title.to_lowercase().contains("contact")
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Pick the best website among `hits` for `org_name`.
///
/// Directory hosts are skipped; the highest confidence tier wins and ties
/// keep the earlier (better search-ranked) hit.
pub(crate) fn pick_website(org_name: &str, hits: &[SearchHit]) -> Option<WebsiteMatch> {
    let mut best: Option<WebsiteMatch> = None;

    for hit in hits.iter().filter(|h| !is_directory_url(&h.url)) {
        let confidence = ranker::rank(org_name, &hit.title, &hit.url);
        let better = match &best {
            Some(current) => confidence > current.confidence,
            None => true,
        };
        if better {
            best = Some(WebsiteMatch {
                url: hit.url.clone(),
                title: hit.title.clone(),
                confidence,
            });
        }
    }

    best
}

/// Pick a contact page among `hits`.
///
/// The site is the first non-directory hit; the contact page is the first
/// hit on that site mentioning "contact", else the first hit itself.
pub(crate) fn pick_contact_page(hits: &[SearchHit]) -> Option<ContactPageMatch> {
    let candidates: Vec<&SearchHit> = hits.iter().filter(|h| !is_directory_url(&h.url)).collect();
    let first = candidates.first()?;
    let website_origin = origin_of(&first.url)?;
    let site_host = bare_host(&first.url);

    let contact = candidates
        .iter()
        .find(|h| bare_host(&h.url) == site_host && mentions_contact(h))
        .unwrap_or(first);

    Some(ContactPageMatch {
        website_origin,
        contact_url: contact.url.clone(),
        contact_title: contact.title.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use optout_shared::Confidence;

    fn hit(title: &str, url: &str) -> SearchHit {
        SearchHit {
            title: title.into(),
            url: url.into(),
            description: String::new(),
        }
    }

    #[test]
    fn parses_results_in_order() {
        let body = r#"{
            "type": "search",
            "web": { "results": [
                { "title": "Acme Org", "url": "https://acme.org/", "description": "Home" },
                { "title": "Contact", "url": "https://acme.org/contact" }
            ] }
        }"#;
        let hits = parse_results(body).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[1].url, "https://acme.org/contact");
        assert_eq!(hits[1].description, "");
    }

    #[test]
    fn missing_web_section_means_no_results() {
        let hits = parse_results(r#"{"type": "search", "query": {"original": "x"}}"#).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn malformed_body_is_parse_error() {
        let err = parse_results("<html>rate limited</html>").unwrap_err();
        assert!(matches!(err, OptoutError::Parse { .. }));
    }

    #[test]
    fn directory_hosts_are_detected() {
        assert!(is_directory_url("https://en.wikipedia.org/wiki/Acme"));
        assert!(is_directory_url("https://www.facebook.com/acme"));
        assert!(!is_directory_url("https://acme.org"));
        assert!(!is_directory_url("https://notfacebook.com"));
    }

    #[test]
    fn website_prefers_higher_confidence_then_rank() {
        let hits = vec![
            hit("Acme on Wikipedia", "https://en.wikipedia.org/wiki/Acme_Org"),
            hit("Something else", "https://unrelated.com"),
            hit("Acme Org - Official Site", "https://acme.org"),
            hit("Acme Org News", "https://acme-news.org"),
        ];
        let m = pick_website("Acme Org", &hits).unwrap();
        assert_eq!(m.url, "https://acme.org");
        assert_eq!(m.confidence, Confidence::High);
    }

    #[test]
    fn website_falls_back_to_low_confidence_hit() {
        let hits = vec![hit("Welcome", "https://example.net")];
        let m = pick_website("Acme Org", &hits).unwrap();
        assert_eq!(m.confidence, Confidence::Low);
        assert!(pick_website("Acme Org", &[]).is_none());
    }

    #[test]
    fn contact_page_prefers_contact_link_on_same_site() {
        let hits = vec![
            hit("Acme Org", "https://www.acme.org/"),
            hit("Contact a competitor", "https://other.org/contact"),
            hit("Get in touch - Contact Us", "https://acme.org/get-in-touch"),
        ];
        let m = pick_contact_page(&hits).unwrap();
        assert_eq!(m.website_origin, "https://www.acme.org");
        assert_eq!(m.contact_url, "https://acme.org/get-in-touch");
    }

    #[test]
    fn contact_page_falls_back_to_first_hit() {
        let hits = vec![
            hit("Acme on Facebook", "https://facebook.com/acme"),
            hit("Acme Org", "https://acme.org/about"),
        ];
        let m = pick_contact_page(&hits).unwrap();
        assert_eq!(m.website_origin, "https://acme.org");
        assert_eq!(m.contact_url, "https://acme.org/about");
        assert_eq!(m.contact_title, "Acme Org");
    }

    #[test]
    fn contact_page_needs_a_non_directory_hit() {
        let hits = vec![hit("Acme", "https://www.linkedin.com/company/acme")];
        assert!(pick_contact_page(&hits).is_none());
    }
}

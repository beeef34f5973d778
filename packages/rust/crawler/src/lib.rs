//! Contact page extraction.
//!
//! [`PageExtractor`] fetches one contact page and reports the email
//! addresses and contact form it finds:
//! - [`page`] holds the HTML analysis (emails, contact forms)
//! - `guard` keeps requests on the public web, redirects included

mod guard;
pub mod page;

use std::time::Duration;

use async_trait::async_trait;
use optout_shared::{ExtractedContacts, ExtractionConfig, Extractor, OptoutError, Result};
use reqwest::{Client, header, redirect};
use scraper::Html;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// User-Agent string for page requests.
const USER_AGENT: &str = concat!("optout/", env!("CARGO_PKG_VERSION"));

/// Fetches contact pages over HTTP and analyzes them with `scraper`.
pub struct PageExtractor {
    client: Client,
    /// Allow localhost/private IPs (for tests with mock servers).
    allow_localhost: bool,
}

impl PageExtractor {
    /// Create an extractor with the given configuration.
    pub fn new(config: &ExtractionConfig) -> Result<Self> {
        Self::build(config, false)
    }

    fn build(config: &ExtractionConfig, allow_localhost: bool) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Self {
            client: build_client(timeout, config.max_redirects, allow_localhost)?,
            allow_localhost,
        })
    }
}

fn build_client(timeout: Duration, max_redirects: usize, allow_localhost: bool) -> Result<Client> {
    let policy = redirect::Policy::custom(move |attempt| {
        if attempt.previous().len() >= max_redirects {
            attempt.error(format!("more than {max_redirects} redirects"))
        } else if !allow_localhost && guard::is_blocked(attempt.url()) {
            let target = attempt.url().to_string();
            attempt.error(format!("redirect to blocked address {target}"))
        } else {
            attempt.follow()
        }
    });

    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(policy)
        .timeout(timeout)
        .build()
        .map_err(|e| OptoutError::Network(format!("failed to build HTTP client: {e}")))
}

#[async_trait]
impl Extractor for PageExtractor {
    #[instrument(skip(self))]
    async fn extract(&self, url: &str) -> Result<ExtractedContacts> {
        let target = Url::parse(url)
            .map_err(|e| OptoutError::validation(format!("invalid contact URL '{url}': {e}")))?;

        if !self.allow_localhost && guard::is_blocked(&target) {
            warn!(%target, "refusing to fetch private or non-HTTP address");
            return Err(OptoutError::validation(format!(
                "refusing to fetch private or non-HTTP address {target}"
            )));
        }

        debug!(%target, "fetching contact page");
        let response = self
            .client
            .get(target.as_str())
            .header(header::ACCEPT, "text/html,application/xhtml+xml")
            .send()
            .await
            .map_err(|e| OptoutError::Network(format!("{target}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OptoutError::Collaborator(format!("{target}: HTTP {status}")));
        }

        let is_html = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_none_or(|ct| ct.contains("html"));
        if !is_html {
            return Err(OptoutError::Collaborator(format!("{target}: not an HTML page")));
        }

        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| OptoutError::Network(format!("{target}: body read failed: {e}")))?;

        let contacts = page::analyze(&Html::parse_document(&body), &final_url);
        info!(
            emails = contacts.emails.len(),
            has_form = contacts.has_form,
            "contact page analyzed"
        );
        Ok(contacts)
    }
}

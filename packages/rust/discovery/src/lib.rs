//! Organization website and contact page discovery via web search.
//!
//! [`BraveSearch`] implements [`SearchProvider`] on top of the Brave Web
//! Search API. Every request goes through a [`Throttle`] so the API's
//! per-second quota is never exceeded, however many callers share the client.
//! Search results are scored with the [`ranker`].

pub mod ranker;
mod results;

use std::time::Duration;

use async_trait::async_trait;
use optout_shared::{
    ContactPageMatch, OptoutError, Result, SearchConfig, SearchProvider, Throttle, WebsiteMatch,
};
use reqwest::{Client, StatusCode};
use tracing::{debug, info, instrument};

pub use ranker::{match_ratio, rank};
pub use results::SearchHit;

/// User-Agent string for search requests.
const USER_AGENT: &str = concat!("optout/", env!("CARGO_PKG_VERSION"));

/// Brave Web Search client.
pub struct BraveSearch {
    client: Client,
    endpoint: String,
    api_key: String,
    result_count: u32,
    throttle: Throttle,
}

impl BraveSearch {
    /// Build a client from config and an API key resolved by the caller.
    pub fn new(config: &SearchConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| OptoutError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: api_key.into(),
            result_count: config.result_count,
            throttle: Throttle::from_millis(config.min_interval_ms),
        })
    }

    /// Run one web search and return hits in rank order.
    #[instrument(skip(self))]
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let count = self.result_count.to_string();
        let request = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query), ("count", count.as_str())])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key);

        let response = self
            .throttle
            .run(request.send())
            .await
            .map_err(|e| OptoutError::Network(format!("search request failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(OptoutError::Collaborator(
                "search API rate limit exceeded (HTTP 429)".into(),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OptoutError::Collaborator(format!(
                "search API returned HTTP {status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| OptoutError::Network(format!("failed to read search response: {e}")))?;

        let hits = results::parse_results(&body)?;
        debug!(hits = hits.len(), "search completed");
        Ok(hits)
    }
}

#[async_trait]
impl SearchProvider for BraveSearch {
    #[instrument(skip(self))]
    async fn find_website(&self, org_name: &str) -> Result<WebsiteMatch> {
        let hits = self.search(&format!("\"{org_name}\" official website")).await?;

        let found = results::pick_website(org_name, &hits)
            .ok_or_else(|| OptoutError::NotFound(format!("no website results for '{org_name}'")))?;

        info!(url = %found.url, confidence = %found.confidence, "website found");
        Ok(found)
    }

    #[instrument(skip(self))]
    async fn find_contact_page(&self, org_name: &str) -> Result<ContactPageMatch> {
        let hits = self.search(&format!("{org_name} contact")).await?;

        let found = results::pick_contact_page(&hits).ok_or_else(|| {
            OptoutError::NotFound(format!("no contact page results for '{org_name}'"))
        })?;

        info!(
            origin = %found.website_origin,
            contact_url = %found.contact_url,
            "contact page found"
        );
        Ok(found)
    }
}

//! Capability traits for the external collaborators the pipeline calls.
//!
//! Implementations are owned by the caller and passed in by reference, so
//! tests can swap in fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::Result;

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Confidence tier for a search match against an organization name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Best website candidate for an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebsiteMatch {
    pub url: String,
    pub title: String,
    pub confidence: Confidence,
}

/// A contact page candidate and the site it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactPageMatch {
    /// Origin (`scheme://host[:port]`) of the first search result.
    pub website_origin: String,
    pub contact_url: String,
    pub contact_title: String,
}

/// The origin (`scheme://host[:port]`) of a URL, or `None` if it has no host.
///
/// A port equal to the scheme's default is dropped.
pub fn origin_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    match parsed.port() {
        Some(port) => Some(format!("{}://{host}:{port}", parsed.scheme())),
        None => Some(format!("{}://{host}", parsed.scheme())),
    }
}

/// Web search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Find the organization's own website.
    async fn find_website(&self, org_name: &str) -> Result<WebsiteMatch>;

    /// Find the organization's contact page.
    async fn find_contact_page(&self, org_name: &str) -> Result<ContactPageMatch>;
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Contact details found on a page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedContacts {
    /// Candidate addresses in page order.
    pub emails: Vec<String>,
    pub has_form: bool,
    /// Form submission URL, when the form declares one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_url: Option<String>,
}

/// Loads a page and pulls out contact details.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<ExtractedContacts>;
}

// ---------------------------------------------------------------------------
// Mail
// ---------------------------------------------------------------------------

/// A rendered message ready to send. The sender identity belongs to the mailer.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub body_text: String,
    pub body_html: String,
}

/// Transport acknowledgement for a sent message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentReceipt {
    pub message_id: String,
}

/// Outbound mail transport.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Pre-flight check; must succeed before any send in a batch.
    async fn verify(&self) -> Result<()>;

    async fn send(&self, message: &OutgoingMessage) -> Result<SentReceipt>;
}

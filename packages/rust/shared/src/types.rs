//! Core domain types: organizations, attempts, contact channels.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OptoutError;

// ---------------------------------------------------------------------------
// OrgStatus
// ---------------------------------------------------------------------------

/// Persisted processing status of an organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrgStatus {
    /// Waiting for the next pipeline pass.
    Pending,
    /// A contact channel was found.
    Success,
    /// Search or extraction failed; worth retrying after a reset.
    Failed,
    /// Contact page reached but nothing actionable on it; needs a human.
    Manual,
}

impl OrgStatus {
    /// All statuses, in display order.
    pub const ALL: [OrgStatus; 4] = [
        OrgStatus::Pending,
        OrgStatus::Success,
        OrgStatus::Failed,
        OrgStatus::Manual,
    ];

    /// Database/CLI representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Manual => "manual",
        }
    }

    /// Whether this is an outcome a pipeline pass may write.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for OrgStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrgStatus {
    type Err = OptoutError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            "manual" => Ok(Self::Manual),
            other => Err(OptoutError::validation(format!("unknown status '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// ContactType
// ---------------------------------------------------------------------------

/// Which kind of contact channel an organization exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactType {
    None,
    Email,
    Form,
    Both,
}

impl ContactType {
    /// All contact types, in display order.
    pub const ALL: [ContactType; 4] = [
        ContactType::None,
        ContactType::Email,
        ContactType::Form,
        ContactType::Both,
    ];

    /// Derive the contact type from what a page offers.
    pub fn from_presence(has_email: bool, has_form: bool) -> Self {
        match (has_email, has_form) {
            (true, true) => Self::Both,
            (true, false) => Self::Email,
            (false, true) => Self::Form,
            (false, false) => Self::None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Email => "email",
            Self::Form => "form",
            Self::Both => "both",
        }
    }

    /// Whether an email address can be sent to automatically.
    pub fn has_email(&self) -> bool {
        matches!(self, Self::Email | Self::Both)
    }
}

impl fmt::Display for ContactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContactType {
    type Err = OptoutError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "email" => Ok(Self::Email),
            "form" => Ok(Self::Form),
            "both" => Ok(Self::Both),
            other => Err(OptoutError::validation(format!(
                "unknown contact type '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// AttemptType
// ---------------------------------------------------------------------------

/// Which stage produced an [`Attempt`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptType {
    Search,
    ContactFind,
    Email,
    Form,
}

impl AttemptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::ContactFind => "contact_find",
            Self::Email => "email",
            Self::Form => "form",
        }
    }
}

impl fmt::Display for AttemptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttemptType {
    type Err = OptoutError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "search" => Ok(Self::Search),
            "contact_find" => Ok(Self::ContactFind),
            "email" => Ok(Self::Email),
            "form" => Ok(Self::Form),
            other => Err(OptoutError::validation(format!(
                "unknown attempt type '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// ContactChannel
// ---------------------------------------------------------------------------

/// The single channel chosen for an organization.
///
/// Pairs the contact type with its value so the two can never be written
/// out of step. Constructed only with a type other than [`ContactType::None`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactChannel {
    contact_type: ContactType,
    value: String,
}

impl ContactChannel {
    /// Build a channel. Returns `None` for [`ContactType::None`] or an empty value.
    pub fn new(contact_type: ContactType, value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if contact_type == ContactType::None || value.trim().is_empty() {
            return None;
        }
        Some(Self {
            contact_type,
            value,
        })
    }

    pub fn contact_type(&self) -> ContactType {
        self.contact_type
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

// ---------------------------------------------------------------------------
// Organization
// ---------------------------------------------------------------------------

/// One row per distinct organization name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    /// Unique, case-sensitive key.
    pub name: String,
    /// Canonical origin URL, once discovered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    /// Cached contact page found by the search stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_page_url: Option<String>,
    pub contact_type: ContactType,
    /// Email address or form URL; set iff `contact_type != None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_value: Option<String>,
    pub status: OrgStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Terminal outcomes recorded so far. Never decremented.
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    /// The chosen channel, if any.
    pub fn channel(&self) -> Option<ContactChannel> {
        self.contact_value
            .as_deref()
            .and_then(|v| ContactChannel::new(self.contact_type, v))
    }
}

// ---------------------------------------------------------------------------
// Attempt
// ---------------------------------------------------------------------------

/// Immutable audit record of one stage's outcome for one organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    /// Insertion-ordered identifier.
    pub id: i64,
    pub org_name: String,
    pub attempt_type: AttemptType,
    /// Outcome of this stage only.
    pub success: bool,
    /// Stage-specific payload (URL found, channel chosen, error text, message id).
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// An attempt not yet written to the store.
#[derive(Debug, Clone)]
pub struct NewAttempt {
    pub attempt_type: AttemptType,
    pub success: bool,
    pub details: serde_json::Value,
}

impl NewAttempt {
    pub fn new(attempt_type: AttemptType, success: bool, details: serde_json::Value) -> Self {
        Self {
            attempt_type,
            success,
            details,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Fields written when an organization reaches a terminal state.
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Only overwrites a stored website when `Some`.
    pub website: Option<String>,
    /// Only overwrites a stored channel when `Some`.
    pub channel: Option<ContactChannel>,
    pub status: OrgStatus,
    pub error_message: Option<String>,
}

impl Outcome {
    /// A channel was found.
    pub fn success(channel: ContactChannel, website: Option<String>) -> Self {
        Self {
            website,
            channel: Some(channel),
            status: OrgStatus::Success,
            error_message: None,
        }
    }

    /// A collaborator failed or nothing usable was found.
    pub fn failed(error: impl Into<String>, website: Option<String>) -> Self {
        Self {
            website,
            channel: None,
            status: OrgStatus::Failed,
            error_message: Some(error.into()),
        }
    }

    /// The contact page was reachable but yielded no actionable channel.
    pub fn manual(reason: impl Into<String>, website: Option<String>) -> Self {
        Self {
            website,
            channel: None,
            status: OrgStatus::Manual,
            error_message: Some(reason.into()),
        }
    }

    /// Check the status invariants before writing.
    pub fn validate(&self) -> crate::Result<()> {
        if !self.status.is_terminal() {
            return Err(OptoutError::validation(
                "an outcome must be success, failed, or manual",
            ));
        }
        if self.status == OrgStatus::Success && self.channel.is_none() {
            return Err(OptoutError::validation(
                "a success outcome requires a contact channel",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Aggregate counts computed from the current rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total: u64,
    pub pending: u64,
    pub success: u64,
    pub failed: u64,
    pub manual: u64,
    pub with_email: u64,
    pub with_form: u64,
    pub with_both: u64,
    pub without_contact: u64,
    /// Organizations with at least one successful email attempt.
    pub emailed: u64,
}

impl StoreStats {
    pub fn by_status(&self, status: OrgStatus) -> u64 {
        match status {
            OrgStatus::Pending => self.pending,
            OrgStatus::Success => self.success,
            OrgStatus::Failed => self.failed,
            OrgStatus::Manual => self.manual,
        }
    }

    pub fn by_contact_type(&self, contact_type: ContactType) -> u64 {
        match contact_type {
            ContactType::None => self.without_contact,
            ContactType::Email => self.with_email,
            ContactType::Form => self.with_form,
            ContactType::Both => self.with_both,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contact_type_table() {
        assert_eq!(ContactType::from_presence(true, true), ContactType::Both);
        assert_eq!(ContactType::from_presence(true, false), ContactType::Email);
        assert_eq!(ContactType::from_presence(false, true), ContactType::Form);
        assert_eq!(ContactType::from_presence(false, false), ContactType::None);
    }

    #[test]
    fn enum_string_forms_parse_back() {
        for status in OrgStatus::ALL {
            assert_eq!(status.as_str().parse::<OrgStatus>().unwrap(), status);
        }
        for ct in ContactType::ALL {
            assert_eq!(ct.as_str().parse::<ContactType>().unwrap(), ct);
        }
        assert_eq!(
            "contact_find".parse::<AttemptType>().unwrap(),
            AttemptType::ContactFind
        );
        assert!("done".parse::<OrgStatus>().is_err());
    }

    #[test]
    fn channel_rejects_none_and_empty() {
        assert!(ContactChannel::new(ContactType::None, "info@acme.org").is_none());
        assert!(ContactChannel::new(ContactType::Email, "  ").is_none());
        let ch = ContactChannel::new(ContactType::Form, "https://acme.org/contact").unwrap();
        assert_eq!(ch.contact_type(), ContactType::Form);
        assert_eq!(ch.value(), "https://acme.org/contact");
    }

    #[test]
    fn outcome_validation() {
        let ch = ContactChannel::new(ContactType::Email, "info@acme.org").unwrap();
        assert!(Outcome::success(ch, None).validate().is_ok());
        assert!(Outcome::failed("boom", None).validate().is_ok());

        let bogus = Outcome {
            website: None,
            channel: None,
            status: OrgStatus::Success,
            error_message: None,
        };
        assert!(bogus.validate().is_err());

        let pending = Outcome {
            status: OrgStatus::Pending,
            ..Outcome::failed("x", None)
        };
        assert!(pending.validate().is_err());
    }
}

//! Shared types, error model, configuration, and collaborator contracts for optout.
//!
//! This crate is the foundation depended on by all other optout crates.
//! It provides:
//! - [`OptoutError`]: the unified error type
//! - Domain types ([`Organization`], [`Attempt`], [`Outcome`], [`ContactChannel`])
//! - Capability traits ([`SearchProvider`], [`Extractor`], [`Mailer`])
//! - [`Throttle`]: the minimum-spacing dispatcher for quota-limited calls
//! - Configuration ([`AppConfig`], [`MailSettings`], config loading)

pub mod capabilities;
pub mod config;
pub mod error;
pub mod throttle;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use capabilities::{
    Confidence, ContactPageMatch, ExtractedContacts, Extractor, Mailer, OutgoingMessage,
    SearchProvider, SentReceipt, WebsiteMatch, origin_of,
};
pub use config::{
    AppConfig, DefaultsConfig, ExtractionConfig, MailConfig, MailSettings, MessageConfig,
    SearchConfig, config_dir, config_file_path, expand_home, init_config, load_config,
    load_config_from, search_api_key,
};
pub use error::{OptoutError, Result};
pub use throttle::Throttle;
pub use types::{
    Attempt, AttemptType, ContactChannel, ContactType, NewAttempt, OrgStatus, Organization,
    Outcome, StoreStats,
};

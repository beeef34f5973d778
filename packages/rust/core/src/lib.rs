//! Core orchestration for optout.
//!
//! This crate ties the store, search, extraction, and mail collaborators
//! together into the operator-facing workflows (resolve, send).

pub mod outreach;
pub mod pipeline;
pub mod selector;

pub use outreach::{Delivery, SendSummary, send_emails, send_test_email};
pub use pipeline::{PassSummary, Pipeline, ProgressReporter, Resolution, SilentProgress};
pub use selector::{ChannelSelection, best_email, select_channel};

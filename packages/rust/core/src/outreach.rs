//! Sending opt-out emails to resolved organizations.
//!
//! Targets are successful organizations with an email channel that have no
//! successful `email` attempt yet, so a second run never re-sends. The mailer
//! is verified once before the first send; sends are sequential and each one
//! is logged as an attempt and appended to the run transcript.
//!
//! A send, once started, always runs to completion and is recorded. The
//! shutdown token is only checked between organizations, and the transcript
//! tally is written however the run ends.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use optout_mailer::{MessageTemplate, SendResult, Tally, Transcript};
use optout_shared::{AttemptType, Mailer, Organization, OutgoingMessage, Result, SentReceipt};
use optout_storage::Storage;

use crate::pipeline::{ProgressReporter, Resolution};

/// Whether messages are actually handed to a mailer.
pub enum Delivery<'a> {
    /// Render and record only.
    DryRun,
    Live(&'a dyn Mailer),
}

/// Result of one send run.
#[derive(Debug, Clone)]
pub struct SendSummary {
    pub run_id: Uuid,
    pub tally: Tally,
    pub transcript: PathBuf,
    /// The shutdown token stopped the run before every target was attempted.
    pub interrupted: bool,
}

/// Send the opt-out message to every pending email target.
#[instrument(skip_all, fields(limit = ?limit))]
pub async fn send_emails(
    store: &Storage,
    delivery: Delivery<'_>,
    template: &MessageTemplate,
    transcript_dir: &Path,
    limit: Option<usize>,
    shutdown: &CancellationToken,
    progress: &dyn ProgressReporter,
) -> Result<SendSummary> {
    let mut targets = store.list_email_targets().await?;
    if let Some(n) = limit {
        targets.truncate(n);
    }

    if let Delivery::Live(mailer) = &delivery {
        progress.phase("Verifying mail server");
        mailer.verify().await?;
    }

    let run_id = Uuid::now_v7();
    let dry_run = matches!(delivery, Delivery::DryRun);
    let mut transcript = Transcript::create(transcript_dir, run_id, Utc::now(), dry_run)?;
    info!(%run_id, targets = targets.len(), transcript = %transcript.path().display(), "send run started");

    progress.phase(if dry_run { "Rendering messages" } else { "Sending messages" });
    let run = send_all(
        store,
        &delivery,
        template,
        &targets,
        &mut transcript,
        run_id,
        shutdown,
        progress,
    )
    .await;

    let remaining = match &run {
        Ok(attempted) => targets.len() - attempted,
        Err(_) => 0,
    };
    if remaining > 0 {
        warn!(%run_id, remaining, "send run interrupted");
        if let Err(e) = transcript.mark_interrupted(remaining) {
            error!(%run_id, error = %e, "failed to note interruption in transcript");
        }
    }

    let transcript_path = transcript.path().to_path_buf();
    let finished = transcript.finish();
    run?;
    let tally = finished?;
    info!(
        %run_id,
        sent = tally.sent,
        failed = tally.failed,
        skipped = tally.skipped,
        unrecorded = tally.unrecorded,
        "send run completed"
    );

    Ok(SendSummary {
        run_id,
        tally,
        transcript: transcript_path,
        interrupted: remaining > 0,
    })
}

/// Work through `targets` until done or shut down. Returns how many were
/// attempted.
#[allow(clippy::too_many_arguments)]
async fn send_all(
    store: &Storage,
    delivery: &Delivery<'_>,
    template: &MessageTemplate,
    targets: &[Organization],
    transcript: &mut Transcript,
    run_id: Uuid,
    shutdown: &CancellationToken,
    progress: &dyn ProgressReporter,
) -> Result<usize> {
    let total = targets.len();

    for (i, org) in targets.iter().enumerate() {
        if shutdown.is_cancelled() {
            return Ok(i);
        }
        progress.org_started(&org.name, i + 1, total);

        let Some(to) = org.contact_value.as_deref() else {
            warn!(org = %org.name, "email target without contact value, skipping");
            progress.org_finished(&org.name, Resolution::Failed);
            continue;
        };
        let message = template.render(&org.name, to);

        let resolution = match delivery {
            Delivery::DryRun => {
                transcript.record(&org.name, &message, SendResult::Skipped)?;
                Resolution::Success
            }
            Delivery::Live(mailer) => {
                deliver(store, *mailer, transcript, run_id, &org.name, &message).await?
            }
        };

        progress.org_finished(&org.name, resolution);
    }

    Ok(total)
}

/// Send one message, log the attempt, and append it to the transcript.
///
/// The attempt is written before the transcript entry so a delivered
/// message is never retried. A delivered message whose attempt could not be
/// stored is flagged in the transcript. Only transcript I/O errors
/// propagate; a failed send is recorded and the run continues.
async fn deliver(
    store: &Storage,
    mailer: &dyn Mailer,
    transcript: &mut Transcript,
    run_id: Uuid,
    org_name: &str,
    message: &OutgoingMessage,
) -> Result<Resolution> {
    let sent = mailer.send(message).await.map_err(|e| e.to_string());

    let details = match &sent {
        Ok(receipt) => json!({
            "run_id": run_id.to_string(),
            "to": message.to,
            "subject": message.subject,
            "message_id": receipt.message_id,
        }),
        Err(err) => {
            warn!(org = org_name, error = %err, "send failed");
            json!({
                "run_id": run_id.to_string(),
                "to": message.to,
                "error": err,
            })
        }
    };
    let stored = store
        .append_attempt(org_name, AttemptType::Email, sent.is_ok(), details)
        .await
        .map_err(|e| e.to_string());
    if let Err(e) = &stored {
        error!(org = org_name, error = %e, "failed to record email attempt");
    }

    match (&sent, &stored) {
        (Ok(receipt), Ok(_)) => {
            transcript.record(
                org_name,
                message,
                SendResult::Sent {
                    message_id: &receipt.message_id,
                },
            )?;
            Ok(Resolution::Success)
        }
        (Ok(receipt), Err(store_err)) => {
            transcript.record(
                org_name,
                message,
                SendResult::Unrecorded {
                    message_id: &receipt.message_id,
                    error: store_err,
                },
            )?;
            Ok(Resolution::Success)
        }
        (Err(err), _) => {
            transcript.record(org_name, message, SendResult::Failed { error: err })?;
            Ok(Resolution::Failed)
        }
    }
}

/// Verify the mailer and send one rendered message to `to`.
pub async fn send_test_email(
    mailer: &dyn Mailer,
    template: &MessageTemplate,
    to: &str,
) -> Result<SentReceipt> {
    mailer.verify().await?;
    let message = template.render("Test Organization", to);
    mailer.send(&message).await
}

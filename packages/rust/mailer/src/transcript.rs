//! Append-only Markdown record of one send run.
//!
//! Each run gets its own file, `send-<UTC timestamp>-<run id>.md`, created
//! with `create_new` so an existing transcript is never overwritten. Entries
//! are flushed as they are written; a run cut short still leaves every
//! completed send on disk.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use optout_shared::{OptoutError, OutgoingMessage, Result};
use tracing::debug;
use uuid::Uuid;

/// What happened to one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendResult<'a> {
    Sent { message_id: &'a str },
    /// Delivered, but the attempt could not be stored; the next run will
    /// target this organization again.
    Unrecorded { message_id: &'a str, error: &'a str },
    Failed { error: &'a str },
    /// Rendered but not sent (`--dry-run`).
    Skipped,
}

/// Sent/failed/skipped counts for a run.
///
/// `unrecorded` is the subset of `sent` whose attempt never reached the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub unrecorded: usize,
}

impl Tally {
    pub fn count(&mut self, result: &SendResult<'_>) {
        match result {
            SendResult::Sent { .. } => self.sent += 1,
            SendResult::Unrecorded { .. } => {
                self.sent += 1;
                self.unrecorded += 1;
            }
            SendResult::Failed { .. } => self.failed += 1,
            SendResult::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.sent + self.failed + self.skipped
    }
}

/// An open transcript file.
pub struct Transcript {
    path: PathBuf,
    file: File,
    tally: Tally,
}

impl Transcript {
    /// Create a new transcript in `dir` and write its header.
    pub fn create(dir: &Path, run_id: Uuid, started_at: DateTime<Utc>, dry_run: bool) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| OptoutError::io(dir, e))?;

        let path = dir.join(format!(
            "send-{}-{run_id}.md",
            started_at.format("%Y%m%dT%H%M%SZ")
        ));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| OptoutError::io(&path, e))?;

        let mut transcript = Self {
            path,
            file,
            tally: Tally::default(),
        };

        let mode = if dry_run { " (dry run)" } else { "" };
        transcript.write(&format!(
            "# Opt-out send run{mode}\n\n- Run: `{run_id}`\n- Started: {}\n\n",
            started_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        ))?;
        debug!(path = %transcript.path.display(), "transcript opened");

        Ok(transcript)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tally(&self) -> Tally {
        self.tally
    }

    /// Append one message and its result.
    pub fn record(
        &mut self,
        org_name: &str,
        message: &OutgoingMessage,
        result: SendResult<'_>,
    ) -> Result<()> {
        self.tally.count(&result);

        let status = match result {
            SendResult::Sent { message_id } => format!("sent, message id `{message_id}`"),
            SendResult::Unrecorded { message_id, error } => format!(
                "sent, message id `{message_id}`, NOT RECORDED ({error}); \
                 the next run will mail this organization again"
            ),
            SendResult::Failed { error } => format!("FAILED: {error}"),
            SendResult::Skipped => "not sent (dry run)".to_string(),
        };

        let body = message
            .body_text
            .lines()
            .map(|l| if l.is_empty() { ">".to_string() } else { format!("> {l}") })
            .collect::<Vec<_>>()
            .join("\n");

        self.write(&format!(
            "## {org_name}\n\n\
             - To: {}\n\
             - Subject: {}\n\
             - Result: {status}\n\
             - At: {}\n\n\
             {body}\n\n",
            message.to,
            message.subject,
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        ))
    }

    /// Note that the run stopped before every target was attempted.
    pub fn mark_interrupted(&mut self, remaining: usize) -> Result<()> {
        self.write(&format!(
            "_Run interrupted; {remaining} remaining targets were not attempted._\n\n"
        ))
    }

    /// Write the tally and close the file.
    pub fn finish(mut self) -> Result<Tally> {
        let tally = self.tally;
        let mut line = format!(
            "Sent: {}, failed: {}, skipped: {}, total: {}",
            tally.sent,
            tally.failed,
            tally.skipped,
            tally.total()
        );
        if tally.unrecorded > 0 {
            line.push_str(&format!(" (unrecorded: {})", tally.unrecorded));
        }
        self.write(&format!("---\n\n{line}\n"))?;
        Ok(tally)
    }

    fn write(&mut self, text: &str) -> Result<()> {
        self.file
            .write_all(text.as_bytes())
            .and_then(|()| self.file.flush())
            .map_err(|e| OptoutError::io(&self.path, e))
    }
}

//! Outbound opt-out mail.
//!
//! - [`SmtpMailer`] implements [`Mailer`] over an SMTP relay with `lettre`
//! - [`template`] renders the message for one organization
//! - [`transcript`] keeps the per-run record of what was sent

pub mod template;
pub mod transcript;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use optout_shared::{
    MailSettings, Mailer, OptoutError, OutgoingMessage, Result, SentReceipt, Throttle,
};
use tracing::{debug, info, instrument};
use uuid::Uuid;

pub use template::MessageTemplate;
pub use transcript::{SendResult, Tally, Transcript};

/// Port that expects TLS from the first byte; anything else upgrades with STARTTLS.
const IMPLICIT_TLS_PORT: u16 = 465;

/// SMTP relay mailer with a fixed delay between sends.
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: Mailbox,
    reply_to: Option<Mailbox>,
    throttle: Throttle,
}

impl SmtpMailer {
    pub fn new(settings: &MailSettings) -> Result<Self> {
        let from: Mailbox = settings.from.parse().map_err(|e| {
            OptoutError::config(format!("invalid mail.from '{}': {e}", settings.from))
        })?;
        let reply_to = settings
            .reply_to
            .as_deref()
            .map(|r| {
                r.parse::<Mailbox>()
                    .map_err(|e| OptoutError::config(format!("invalid mail.reply_to '{r}': {e}")))
            })
            .transpose()?;

        let builder = if settings.smtp_port == IMPLICIT_TLS_PORT {
            SmtpTransport::relay(&settings.smtp_host)
        } else {
            SmtpTransport::starttls_relay(&settings.smtp_host)
        }
        .map_err(|e| OptoutError::config(format!("SMTP relay error: {e}")))?;

        let transport = builder
            .port(settings.smtp_port)
            .credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ))
            .build();

        Ok(Self {
            transport,
            from,
            reply_to,
            throttle: Throttle::from_millis(settings.send_interval_ms),
        })
    }

    /// Build the MIME message and the Message-ID it carries.
    fn build_message(&self, message: &OutgoingMessage) -> Result<(Message, String)> {
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|e| OptoutError::Mail(format!("invalid recipient '{}': {e}", message.to)))?;

        let message_id = format!("<{}@{}>", Uuid::now_v7(), self.from.email.domain());

        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.clone())
            .message_id(Some(message_id.clone()));
        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(reply_to.clone());
        }

        let email = builder
            .multipart(MultiPart::alternative_plain_html(
                message.body_text.clone(),
                message.body_html.clone(),
            ))
            .map_err(|e| OptoutError::Mail(format!("failed to build email: {e}")))?;

        Ok((email, message_id))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    #[instrument(skip(self))]
    async fn verify(&self) -> Result<()> {
        let transport = self.transport.clone();
        let reachable = tokio::task::spawn_blocking(move || transport.test_connection())
            .await
            .map_err(|e| OptoutError::Mail(format!("SMTP check task failed: {e}")))?
            .map_err(|e| OptoutError::Mail(format!("SMTP connection failed: {e}")))?;

        if !reachable {
            return Err(OptoutError::Mail("SMTP server rejected the connection".into()));
        }
        info!("SMTP connection verified");
        Ok(())
    }

    #[instrument(skip_all, fields(to = %message.to))]
    async fn send(&self, message: &OutgoingMessage) -> Result<SentReceipt> {
        let (email, message_id) = self.build_message(message)?;
        let transport = self.transport.clone();

        self.throttle
            .run(async move {
                tokio::task::spawn_blocking(move || transport.send(&email))
                    .await
                    .map_err(|e| OptoutError::Mail(format!("SMTP send task failed: {e}")))?
                    .map_err(|e| OptoutError::Mail(format!("SMTP send failed: {e}")))
            })
            .await?;

        debug!(%message_id, "message accepted by relay");
        Ok(SentReceipt { message_id })
    }
}

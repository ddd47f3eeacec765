//! Outbound replies via SMTP (`lettre`), one attachment per message.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;
use tracing::info;

use crate::channels::ParsedMessage;
use crate::config::{ReplyProfile, SmtpConfig};
use crate::error::DispatchError;

/// Port on which relays expect implicit TLS rather than STARTTLS.
const IMPLICIT_TLS_PORT: u16 = 465;

/// A reply ready to be submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyDraft {
    pub to: String,
    /// Display name of the recipient, when the original carried one.
    pub to_name: Option<String>,
    pub subject: String,
    pub body: String,
    pub attachment_path: PathBuf,
    pub attachment_name: String,
    pub attachment_mime: String,
}

impl ReplyDraft {
    /// Address a reply to the sender of `original`, carrying the profile's
    /// attachment.
    pub fn for_message(original: &ParsedMessage, body: String, profile: &ReplyProfile) -> Self {
        Self {
            to: original.sender.clone(),
            to_name: original.sender_name.clone(),
            subject: reply_subject(&original.subject),
            body,
            attachment_path: profile.attachment_path.clone(),
            attachment_name: profile.attachment_name.clone(),
            attachment_mime: profile.attachment_mime.clone(),
        }
    }
}

/// `Re: ` followed by the original subject.
pub fn reply_subject(original: &str) -> String {
    format!("Re: {original}")
}

/// Submits composed replies to the outbound relay.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, draft: &ReplyDraft) -> Result<(), DispatchError>;
}

/// SMTP submission over TLS with password authentication.
pub struct SmtpDispatcher {
    config: SmtpConfig,
    timeout: Duration,
}

impl SmtpDispatcher {
    pub fn new(config: SmtpConfig, timeout: Duration) -> Self {
        Self { config, timeout }
    }

    fn transport(&self) -> Result<SmtpTransport, DispatchError> {
        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.expose_secret().to_string(),
        );

        let builder = if self.config.port == IMPLICIT_TLS_PORT {
            SmtpTransport::relay(&self.config.host)
        } else {
            SmtpTransport::starttls_relay(&self.config.host)
        }
        .map_err(|e| DispatchError::Relay {
            host: self.config.host.clone(),
            reason: format!("SMTP relay error: {e}"),
        })?;

        Ok(builder
            .port(self.config.port)
            .credentials(creds)
            .timeout(Some(self.timeout))
            .build())
    }
}

#[async_trait]
impl Dispatcher for SmtpDispatcher {
    async fn send(&self, draft: &ReplyDraft) -> Result<(), DispatchError> {
        let attachment = tokio::fs::read(&draft.attachment_path)
            .await
            .map_err(|source| DispatchError::Attachment {
                path: draft.attachment_path.display().to_string(),
                source,
            })?;

        let email = build_reply(
            &self.config.from_name,
            &self.config.from_address,
            draft,
            attachment,
        )?;
        let transport = self.transport()?;
        let host = self.config.host.clone();

        // Bounded by the transport timeout on every read and write.
        let submit = tokio::task::spawn_blocking(move || transport.send(&email));
        match submit.await {
            Err(join) => Err(DispatchError::Relay {
                host,
                reason: format!("SMTP task failed: {join}"),
            }),
            Ok(Err(e)) => Err(DispatchError::Relay {
                host,
                reason: format!("SMTP send failed: {e}"),
            }),
            Ok(Ok(_)) => {
                info!(to = %draft.to, subject = %draft.subject, "Reply sent");
                Ok(())
            }
        }
    }
}

/// Compose the reply: plain-text body plus exactly one attachment.
pub fn build_reply(
    from_name: &str,
    from_address: &str,
    draft: &ReplyDraft,
    attachment: Vec<u8>,
) -> Result<Message, DispatchError> {
    let from = Mailbox::new(
        Some(from_name.to_string()),
        from_address.parse().map_err(|e| DispatchError::Address {
            address: from_address.to_string(),
            reason: format!("{e}"),
        })?,
    );
    let to = Mailbox::new(
        draft.to_name.clone(),
        draft.to.parse().map_err(|e| DispatchError::Address {
            address: draft.to.clone(),
            reason: format!("{e}"),
        })?,
    );
    let content_type = ContentType::parse(&draft.attachment_mime).map_err(|e| {
        DispatchError::Build(format!(
            "invalid attachment type {}: {e}",
            draft.attachment_mime
        ))
    })?;

    Message::builder()
        .from(from)
        .to(to)
        .subject(draft.subject.clone())
        .multipart(
            MultiPart::mixed()
                .singlepart(SinglePart::plain(draft.body.clone()))
                .singlepart(
                    Attachment::new(draft.attachment_name.clone()).body(attachment, content_type),
                ),
        )
        .map_err(|e| DispatchError::Build(e.to_string()))
}

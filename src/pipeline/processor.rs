//! Per-message pipeline: fetch → parse → classify → reply → dispatch.
//!
//! Per-message failures (vanished UID, unreadable body, relay refusal) are
//! logged and reported as an outcome. Only mailbox transport failures and
//! reply-service failures escalate, as `WatchError`.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channels::{Dispatcher, MailboxSession, ReplyDraft, parse_message};
use crate::config::ReplyProfile;
use crate::error::{MailboxError, WatchError};
use crate::pipeline::classifier::ReplyService;
use crate::pipeline::types::PipelineOutcome;

/// Drives one UID through the pipeline.
pub struct MessagePipeline {
    service: Arc<dyn ReplyService>,
    dispatcher: Arc<dyn Dispatcher>,
    profile: ReplyProfile,
    own_address: String,
}

impl MessagePipeline {
    pub fn new(
        service: Arc<dyn ReplyService>,
        dispatcher: Arc<dyn Dispatcher>,
        profile: ReplyProfile,
        own_address: impl Into<String>,
    ) -> Self {
        Self {
            service,
            dispatcher,
            profile,
            own_address: own_address.into(),
        }
    }

    pub async fn process(
        &self,
        session: &mut dyn MailboxSession,
        uid: u32,
    ) -> Result<PipelineOutcome, WatchError> {
        let raw = match session.fetch(uid).await {
            Ok(raw) => raw,
            Err(MailboxError::Fetch { reason, .. }) => {
                warn!(uid, stage = "fetch", %reason, "Message vanished before fetch");
                return Ok(PipelineOutcome::FetchFailed { reason });
            }
            Err(e) => return Err(e.into()),
        };

        let message = match parse_message(&raw) {
            Ok(message) => message,
            Err(e) => {
                info!(uid, stage = "parse", "Skipping message: {e}");
                return Ok(PipelineOutcome::Unreadable {
                    reason: e.to_string(),
                });
            }
        };

        info!(
            uid,
            from = %message.sender,
            subject = %message.subject,
            "New email"
        );

        if message.sender.eq_ignore_ascii_case(&self.own_address) {
            debug!(uid, "Skipping self-sent email");
            return Ok(PipelineOutcome::SelfSent);
        }

        let is_offer = self
            .service
            .classify(&message.body)
            .await
            .map_err(|source| WatchError::Service { uid, source })?;

        if !is_offer {
            info!(uid, stage = "classify", "Not a job offer");
            return Ok(PipelineOutcome::NotAnOffer);
        }

        let reply = self
            .service
            .generate_reply(&message.body, &self.profile)
            .await
            .map_err(|source| WatchError::Service { uid, source })?;

        let draft = ReplyDraft::for_message(&message, reply, &self.profile);
        match self.dispatcher.send(&draft).await {
            Ok(()) => {
                info!(uid, to = %draft.to, "Replied to job offer with CV");
                Ok(PipelineOutcome::Replied { to: draft.to })
            }
            Err(e) => {
                warn!(uid, stage = "dispatch", to = %draft.to, error = %e, "Reply could not be sent");
                Ok(PipelineOutcome::DispatchFailed {
                    reason: e.to_string(),
                })
            }
        }
    }
}

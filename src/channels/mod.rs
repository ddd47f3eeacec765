//! Mail I/O: the IMAP mail store session, MIME parsing and the SMTP
//! dispatcher, each behind a trait so the watcher can be driven by fakes.

pub mod email;
pub mod imap;
pub mod smtp;

pub use email::{ParsedMessage, parse_message};
pub use imap::{ImapConnector, ImapSession};
pub use smtp::{Dispatcher, ReplyDraft, SmtpDispatcher};

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::MailboxError;

/// Raw bytes and flags of one fetched message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub uid: u32,
    pub body: Vec<u8>,
    pub flags: Vec<String>,
}

/// What a fresh session reports about its selected folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FolderStatus {
    pub uid_validity: Option<u32>,
}

/// How a wait for mailbox changes ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The server signalled a change.
    Changed,
    /// The timeout elapsed without a signal.
    TimedOut,
    /// Shutdown was requested. The session is still usable for `logout`.
    Interrupted,
}

/// Opens authenticated, read-only sessions on the mail store.
#[async_trait]
pub trait MailboxConnector: Send + Sync {
    /// Connect, log in and select the folder read-only.
    ///
    /// `MailboxError::Auth` means the credentials were rejected and must not
    /// be retried.
    async fn connect(&self) -> Result<Box<dyn MailboxSession>, MailboxError>;
}

/// A live session bound to one read-only folder.
#[async_trait]
pub trait MailboxSession: Send {
    fn folder_status(&self) -> FolderStatus;

    /// Highest UID in the folder, `None` if it is empty.
    async fn highest_uid(&mut self) -> Result<Option<u32>, MailboxError>;

    /// Block until the server signals a change, `timeout` elapses, or
    /// `shutdown` flips to `true`.
    async fn wait_for_change(
        &mut self,
        timeout: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<WaitOutcome, MailboxError>;

    /// All UIDs strictly greater than `mark`, ascending.
    async fn uids_above(&mut self, mark: u32) -> Result<Vec<u32>, MailboxError>;

    /// Fetch one message. `MailboxError::Fetch` if it no longer exists.
    async fn fetch(&mut self, uid: u32) -> Result<RawMessage, MailboxError>;

    async fn logout(&mut self) -> Result<(), MailboxError>;
}

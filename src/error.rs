//! Error types for the inbox responder.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Mail store (IMAP) errors.
#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    /// The server rejected the credentials. Retrying cannot succeed.
    #[error("Authentication failed for {user}: {reason}")]
    Auth { user: String, reason: String },

    #[error("Connection to {host} failed: {reason}")]
    Connectivity { host: String, reason: String },

    /// The UID vanished between notification and fetch.
    #[error("Message {uid} could not be fetched: {reason}")]
    Fetch { uid: u32, reason: String },

    /// The configured folder does not exist or cannot be examined.
    #[error("Folder {folder} cannot be opened: {reason}")]
    Folder { folder: String, reason: String },

    #[error("IMAP protocol error during {command}: {reason}")]
    Protocol { command: String, reason: String },

    #[error("IMAP {command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

impl MailboxError {
    /// Errors that reconnecting with the same configuration cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Auth { .. } | Self::Folder { .. })
    }
}

/// Outbound (SMTP) dispatch errors.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to read attachment {path}: {source}")]
    Attachment {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid address {address}: {reason}")]
    Address { address: String, reason: String },

    #[error("Failed to build reply: {0}")]
    Build(String),

    #[error("Relay {host} rejected the submission: {reason}")]
    Relay { host: String, reason: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },
}

/// Cycle-level error surfaced to the recovery supervisor.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Mailbox error: {0}")]
    Mailbox(#[from] MailboxError),

    #[error("Reply service error on message {uid}: {source}")]
    Service {
        uid: u32,
        #[source]
        source: LlmError,
    },
}

impl WatchError {
    /// Fatal errors stop the supervisor instead of triggering a reconnect.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Mailbox(e) => e.is_fatal(),
            Self::Service { .. } => false,
        }
    }
}

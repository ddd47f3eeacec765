//! Inbox responder: watches an IMAP folder and answers job offers with a CV.

pub mod channels;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod shutdown;
pub mod watcher;

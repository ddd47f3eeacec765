//! Message pipeline.
//!
//! Every new UID flows through:
//! 1. `MailboxSession::fetch()` and MIME parsing
//! 2. `ReplyService::classify()`: is this a job offer?
//! 3. `ReplyService::generate_reply()`, only for offers
//! 4. `Dispatcher::send()`, exactly one attempt, never retried

pub mod classifier;
pub mod processor;
pub mod types;

pub use classifier::{LlmReplyService, ReplyService};
pub use processor::MessagePipeline;
pub use types::PipelineOutcome;

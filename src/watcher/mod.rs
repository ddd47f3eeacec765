//! Mailbox change detection: the high-water-mark state, the wait/drain loop
//! for one session, and the supervisor that keeps it running.

pub mod state;
pub mod supervisor;
pub mod watch_loop;

pub use state::{HighWaterMark, LoopPhase, MarkInit, WatchState};
pub use supervisor::Supervisor;
pub use watch_loop::{SessionEnd, drain, run_session};

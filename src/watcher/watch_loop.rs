//! Change-detection loop for one connected session.
//!
//! wait (IDLE, bounded, interruptible by shutdown) → on signal, resolve UIDs above the mark → drain them
//! in ascending order, advancing the mark after each → wait again.

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::channels::{MailboxSession, WaitOutcome};
use crate::config::WatchConfig;
use crate::error::WatchError;
use crate::pipeline::MessagePipeline;
use crate::watcher::state::{LoopPhase, MarkInit, WatchState};

/// Why a session ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Shutdown,
}

/// Run the loop on `session` until shutdown or a cycle-level error.
pub async fn run_session(
    session: &mut dyn MailboxSession,
    pipeline: &MessagePipeline,
    state: &mut WatchState,
    config: &WatchConfig,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<SessionEnd, WatchError> {
    let highest = session.highest_uid().await?;
    match state.on_connected(session.folder_status(), highest) {
        MarkInit::Initialized(mark) => info!(mark, "Monitoring inbox, ignoring existing messages"),
        MarkInit::Resumed(mark) => info!(mark, "Reconnected, resuming after last handled message"),
        MarkInit::Rebased { from, to } => {
            warn!(from, to, "UIDVALIDITY changed, mark moved to newest message")
        }
    }
    state.transition(LoopPhase::Ready);

    // Catch up on anything that arrived while disconnected.
    let pending = session.uids_above(state.mark()).await?;
    drain(session, pipeline, state, config, pending).await?;

    loop {
        if *shutdown.borrow() {
            return Ok(SessionEnd::Shutdown);
        }

        state.transition(LoopPhase::Waiting);
        debug!(timeout = ?config.idle_timeout, "Entering IDLE");
        match session.wait_for_change(config.idle_timeout, shutdown).await? {
            WaitOutcome::Changed => {}
            WaitOutcome::TimedOut => {
                state.transition(LoopPhase::Ready);
                continue;
            }
            WaitOutcome::Interrupted => return Ok(SessionEnd::Shutdown),
        }

        let pending = session.uids_above(state.mark()).await?;
        drain(session, pipeline, state, config, pending).await?;
    }
}

/// Process `pending` in ascending order, advancing the mark after each UID.
///
/// A reply-service failure aborts the drain before the failing UID is
/// marked, unless that UID has already used up `max_service_attempts`.
pub async fn drain(
    session: &mut dyn MailboxSession,
    pipeline: &MessagePipeline,
    state: &mut WatchState,
    config: &WatchConfig,
    mut pending: Vec<u32>,
) -> Result<(), WatchError> {
    pending.sort_unstable();
    pending.dedup();
    pending.retain(|&uid| uid > state.mark());
    if pending.is_empty() {
        state.transition(LoopPhase::Ready);
        return Ok(());
    }

    state.transition(LoopPhase::Draining);
    info!(count = pending.len(), first = pending[0], "New messages");

    for uid in pending {
        match pipeline.process(session, uid).await {
            Ok(outcome) => {
                debug!(uid, outcome = outcome.label(), "Message handled");
            }
            Err(WatchError::Service { uid, source }) => {
                let attempts = state.record_service_failure(uid);
                if attempts < config.max_service_attempts {
                    return Err(WatchError::Service { uid, source });
                }
                error!(
                    uid,
                    attempts,
                    error = %source,
                    "Reply service keeps failing on this message, giving up on it"
                );
            }
            Err(e) => return Err(e),
        }
        state.advance(uid);
    }

    state.transition(LoopPhase::Ready);
    Ok(())
}

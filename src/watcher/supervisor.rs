//! Recovery supervisor: connect, run the loop, and on any non-fatal failure
//! log, back off and reconnect, forever.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::channels::MailboxConnector;
use crate::config::WatchConfig;
use crate::error::WatchError;
use crate::pipeline::MessagePipeline;
use crate::watcher::state::{LoopPhase, WatchState};
use crate::shutdown::shutdown_requested;
use crate::watcher::watch_loop::{SessionEnd, run_session};

pub struct Supervisor {
    connector: Arc<dyn MailboxConnector>,
    pipeline: MessagePipeline,
    config: WatchConfig,
    state: WatchState,
}

impl Supervisor {
    pub fn new(
        connector: Arc<dyn MailboxConnector>,
        pipeline: MessagePipeline,
        config: WatchConfig,
    ) -> Self {
        Self {
            connector,
            pipeline,
            config,
            state: WatchState::new(),
        }
    }

    pub fn state(&self) -> &WatchState {
        &self.state
    }

    /// Run until `shutdown` flips to `true` (`Ok`) or the mail store rejects
    /// the credentials (`Err`).
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), WatchError> {
        loop {
            if *shutdown.borrow() {
                info!("Monitoring stopped");
                return Ok(());
            }

            self.state.transition(LoopPhase::Connecting);
            let result = match self.connector.connect().await {
                Ok(mut session) => {
                    info!("Connected");
                    let result = run_session(
                        session.as_mut(),
                        &self.pipeline,
                        &mut self.state,
                        &self.config,
                        &mut shutdown,
                    )
                    .await;
                    if matches!(result, Ok(SessionEnd::Shutdown))
                        && let Err(e) = session.logout().await
                    {
                        warn!(error = %e, "Logout failed");
                    }
                    result
                }
                Err(e) => Err(e.into()),
            };

            let failed_in = self.state.phase();
            self.state.transition(LoopPhase::Disconnected);

            match result {
                Ok(SessionEnd::Shutdown) => {
                    info!(mark = self.state.mark(), "Monitoring stopped");
                    return Ok(());
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Fatal mailbox error, giving up");
                    return Err(e);
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        phase = %failed_in,
                        mark = self.state.mark(),
                        backoff = ?self.config.retry_backoff,
                        "Watch cycle failed, reconnecting after backoff"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.retry_backoff) => {}
                        _ = shutdown_requested(&mut shutdown) => {}
                    }
                }
            }
        }
    }
}

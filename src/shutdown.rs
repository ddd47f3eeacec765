//! Cooperative shutdown signal shared by the watcher and the IMAP session.

use tokio::sync::watch;

/// Resolves once shutdown is requested. Never resolves if the sender is
/// gone without having requested it.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

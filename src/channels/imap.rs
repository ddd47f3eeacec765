//! IMAP mail store session over TLS, built on `async-imap`.
//!
//! The folder is always opened with `EXAMINE`, so nothing the watcher does
//! changes flags on the server. Bodies are fetched with `BODY.PEEK[]`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_imap::error::Error as ImapError;
use async_imap::extensions::idle::IdleResponse;
use async_trait::async_trait;
use futures::TryStreamExt;
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tracing::{debug, info, warn};

use crate::channels::{FolderStatus, MailboxConnector, MailboxSession, RawMessage, WaitOutcome};
use crate::config::MailboxConfig;
use crate::error::MailboxError;
use crate::shutdown::shutdown_requested;

type Session = async_imap::Session<TlsStream<TcpStream>>;

/// Opens `ImapSession`s for one account and folder.
pub struct ImapConnector {
    config: MailboxConfig,
    tls: TlsConnector,
}

impl ImapConnector {
    pub fn new(config: MailboxConfig) -> Result<Self, MailboxError> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let tls_config = rustls::ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()
        .map_err(|e| MailboxError::Connectivity {
            host: config.host.clone(),
            reason: format!("TLS setup failed: {e}"),
        })?
        .with_root_certificates(root_store)
        .with_no_client_auth();

        Ok(Self {
            config,
            tls: TlsConnector::from(Arc::new(tls_config)),
        })
    }

    fn connectivity(&self, reason: impl std::fmt::Display) -> MailboxError {
        MailboxError::Connectivity {
            host: self.config.host.clone(),
            reason: reason.to_string(),
        }
    }

    async fn open(&self) -> Result<ImapSession, MailboxError> {
        let cfg = &self.config;

        let tcp = TcpStream::connect((cfg.host.as_str(), cfg.port))
            .await
            .map_err(|e| self.connectivity(format!("TCP connect failed: {e}")))?;

        let server_name = ServerName::try_from(cfg.host.clone())
            .map_err(|e| self.connectivity(format!("invalid server name: {e}")))?;
        let tls = self
            .tls
            .connect(server_name, tcp)
            .await
            .map_err(|e| self.connectivity(format!("TLS handshake failed: {e}")))?;
        debug!(host = %cfg.host, "TLS established");

        // login() consumes the server greeting as an untagged response.
        let client = async_imap::Client::new(tls);
        let mut session = client
            .login(&cfg.username, cfg.password.expose_secret())
            .await
            .map_err(|(e, _client)| match e {
                ImapError::No(reason) | ImapError::Bad(reason) => MailboxError::Auth {
                    user: cfg.username.clone(),
                    reason,
                },
                other => self.connectivity(format!("LOGIN failed: {other}")),
            })?;

        let mailbox = session
            .examine(&cfg.folder)
            .await
            .map_err(|e| map_examine_error(&cfg.host, &cfg.folder, e))?;

        let status = FolderStatus {
            uid_validity: mailbox.uid_validity,
        };
        info!(
            host = %cfg.host,
            folder = %cfg.folder,
            exists = mailbox.exists,
            uid_validity = ?status.uid_validity,
            "Mailbox selected read-only"
        );

        Ok(ImapSession {
            session: Some(session),
            host: cfg.host.clone(),
            status,
            command_timeout: cfg.command_timeout,
        })
    }
}

#[async_trait]
impl MailboxConnector for ImapConnector {
    async fn connect(&self) -> Result<Box<dyn MailboxSession>, MailboxError> {
        let timeout = self.config.command_timeout;
        match tokio::time::timeout(timeout, self.open()).await {
            Ok(result) => Ok(Box::new(result?)),
            Err(_) => Err(MailboxError::Timeout {
                command: "connect".into(),
                timeout,
            }),
        }
    }
}

/// A logged-in session with one folder examined.
pub struct ImapSession {
    /// Taken while IDLE owns the connection; `None` afterwards means the
    /// session was lost mid-IDLE.
    session: Option<Session>,
    host: String,
    status: FolderStatus,
    command_timeout: Duration,
}

impl ImapSession {
    fn session(&mut self) -> Result<&mut Session, MailboxError> {
        self.session.as_mut().ok_or_else(|| MailboxError::Connectivity {
            host: self.host.clone(),
            reason: "session lost during IDLE".into(),
        })
    }

    async fn search(&mut self, query: String) -> Result<Vec<u32>, MailboxError> {
        let host = self.host.clone();
        let timeout = self.command_timeout;
        let session = self.session()?;
        let found = bounded(&host, "UID SEARCH", timeout, session.uid_search(&query)).await?;
        let mut uids: Vec<u32> = found.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }
}

#[async_trait]
impl MailboxSession for ImapSession {
    fn folder_status(&self) -> FolderStatus {
        self.status
    }

    async fn highest_uid(&mut self) -> Result<Option<u32>, MailboxError> {
        let uids = self.search("ALL".to_string()).await?;
        Ok(uids.last().copied())
    }

    async fn wait_for_change(
        &mut self,
        timeout: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<WaitOutcome, MailboxError> {
        let session = self.session.take().ok_or_else(|| MailboxError::Connectivity {
            host: self.host.clone(),
            reason: "session lost during IDLE".into(),
        })?;

        let command_timeout = self.command_timeout;
        let mut handle = session.idle();
        bounded(&self.host, "IDLE", command_timeout, handle.init()).await?;

        let mut interrupted = false;
        let response = {
            let (wait, stop) = handle.wait_with_timeout(timeout);
            tokio::pin!(wait);
            let mut stop = Some(stop);
            let response = tokio::select! {
                response = &mut wait => response,
                _ = shutdown_requested(&mut *shutdown) => {
                    // Dropping the stop source ends the wait with ManualInterrupt.
                    drop(stop.take());
                    interrupted = true;
                    wait.await
                }
            };
            response.map_err(|e| map_imap_error(&self.host, "IDLE", e))?
        };

        // DONE hands the connection back so LOGOUT still works after shutdown.
        let session = bounded(&self.host, "DONE", command_timeout, handle.done()).await?;
        self.session = Some(session);

        if interrupted {
            debug!(host = %self.host, "IDLE interrupted for shutdown");
            return Ok(WaitOutcome::Interrupted);
        }

        match response {
            IdleResponse::NewData(_) => {
                debug!(host = %self.host, "IDLE signalled a change");
                Ok(WaitOutcome::Changed)
            }
            IdleResponse::Timeout | IdleResponse::ManualInterrupt => {
                // Liveness check so a silently dead connection surfaces here.
                let host = self.host.clone();
                let session = self.session()?;
                bounded(&host, "NOOP", command_timeout, session.noop()).await?;
                Ok(WaitOutcome::TimedOut)
            }
        }
    }

    async fn uids_above(&mut self, mark: u32) -> Result<Vec<u32>, MailboxError> {
        let start = mark.saturating_add(1);
        // `N:*` always matches the highest UID, even when it is below N.
        let uids = self.search(format!("UID {start}:*")).await?;
        Ok(uids.into_iter().filter(|&uid| uid > mark).collect())
    }

    async fn fetch(&mut self, uid: u32) -> Result<RawMessage, MailboxError> {
        let host = self.host.clone();
        let timeout = self.command_timeout;
        let session = self.session()?;

        let fetched = tokio::time::timeout(timeout, async {
            session
                .uid_fetch(uid.to_string(), "(UID FLAGS BODY.PEEK[])")
                .await?
                .try_collect::<Vec<_>>()
                .await
        })
        .await
        .map_err(|_| MailboxError::Timeout {
            command: "UID FETCH".into(),
            timeout,
        })?;

        let fetches = match fetched {
            Ok(fetches) => fetches,
            Err(ImapError::No(reason)) | Err(ImapError::Bad(reason)) => {
                return Err(MailboxError::Fetch { uid, reason });
            }
            Err(e) => return Err(map_imap_error(&host, "UID FETCH", e)),
        };

        let fetch = fetches
            .iter()
            .find(|f| f.uid == Some(uid) && f.body().is_some())
            .ok_or_else(|| MailboxError::Fetch {
                uid,
                reason: "no such message".into(),
            })?;

        Ok(RawMessage {
            uid,
            body: fetch.body().map(<[u8]>::to_vec).unwrap_or_default(),
            flags: fetch.flags().map(|flag| format!("{flag:?}")).collect(),
        })
    }

    async fn logout(&mut self) -> Result<(), MailboxError> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        if let Err(e) = session.logout().await {
            warn!(host = %self.host, "LOGOUT failed: {e}");
        }
        Ok(())
    }
}

/// Run one IMAP command under a deadline.
async fn bounded<T, F>(
    host: &str,
    command: &str,
    timeout: Duration,
    fut: F,
) -> Result<T, MailboxError>
where
    F: Future<Output = async_imap::error::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(|e| map_imap_error(host, command, e)),
        Err(_) => Err(MailboxError::Timeout {
            command: command.to_string(),
            timeout,
        }),
    }
}

/// A refused EXAMINE means the folder itself is wrong.
fn map_examine_error(host: &str, folder: &str, e: ImapError) -> MailboxError {
    match e {
        ImapError::No(reason) | ImapError::Bad(reason) => MailboxError::Folder {
            folder: folder.to_string(),
            reason,
        },
        other => map_imap_error(host, "EXAMINE", other),
    }
}

fn map_imap_error(host: &str, command: &str, e: ImapError) -> MailboxError {
    match e {
        ImapError::Io(_) | ImapError::ConnectionLost => MailboxError::Connectivity {
            host: host.to_string(),
            reason: format!("{command}: {e}"),
        },
        other => MailboxError::Protocol {
            command: command.to_string(),
            reason: other.to_string(),
        },
    }
}

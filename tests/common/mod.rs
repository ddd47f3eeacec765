//! In-memory mail store, reply service and relay for driving the watcher.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use inbox_responder::channels::{
    Dispatcher, FolderStatus, MailboxConnector, MailboxSession, RawMessage, ReplyDraft,
    WaitOutcome,
};
use inbox_responder::config::{ReplyProfile, WatchConfig};
use inbox_responder::error::{DispatchError, LlmError, MailboxError, WatchError};
use inbox_responder::pipeline::{MessagePipeline, ReplyService};
use inbox_responder::shutdown::shutdown_requested;
use inbox_responder::watcher::Supervisor;

/// Maximum time any test is allowed to run before we consider it hung.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

pub const OWN_ADDRESS: &str = "me@example.com";

/// Build an RFC 5322 message with a plain-text body.
pub fn email(from: &str, subject: &str, body: &str) -> Vec<u8> {
    format!(
        "From: {from}\r\n\
         To: {OWN_ADDRESS}\r\n\
         Subject: {subject}\r\n\
         Date: Tue, 1 Jul 2025 10:00:00 +0000\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         {body}\r\n"
    )
    .into_bytes()
}

pub fn offer(uid: u32) -> (u32, Vec<u8>) {
    (
        uid,
        email(
            &format!("recruiter{uid}@hiring.example"),
            &format!("Opening {uid}"),
            &format!("We have a job offer for you (ref {uid})."),
        ),
    )
}

pub fn newsletter(uid: u32) -> (u32, Vec<u8>) {
    (
        uid,
        email(
            "news@letters.example",
            &format!("Weekly digest {uid}"),
            &format!("This week in tech (issue {uid})."),
        ),
    )
}

/// One scripted answer to `wait_for_change`.
#[derive(Debug, Clone)]
pub enum WaitStep {
    /// Deliver messages, then signal a change.
    Signal(Vec<(u32, Vec<u8>)>),
    /// Deliver messages but let the wait time out without a signal.
    Quiet(Vec<(u32, Vec<u8>)>),
    /// Announce a UID that is gone by the time it is fetched, then signal.
    Vanish(u32),
    /// The connection drops.
    Drop,
    /// The folder is rebuilt under a new UIDVALIDITY and the connection drops.
    Reset(Vec<(u32, Vec<u8>)>),
    /// Nothing happens until someone else requests shutdown.
    Hang,
}

#[derive(Default)]
struct StoreState {
    messages: BTreeMap<u32, Vec<u8>>,
    vanished: BTreeSet<u32>,
    uid_validity: u32,
    script: VecDeque<WaitStep>,
    connect_errors: VecDeque<MailboxError>,
    connects: u32,
    /// (session number, uid) for every fetch.
    fetches: Vec<(u32, u32)>,
    /// Mark passed to every `uids_above` call.
    scans: Vec<u32>,
    timeouts: u32,
    logouts: u32,
}

/// Shared handle on the fake mail store. Clones see the same state.
#[derive(Clone)]
pub struct FakeMailbox {
    state: Arc<Mutex<StoreState>>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl FakeMailbox {
    /// A folder already holding `existing`. Once the wait script runs out
    /// the mailbox requests shutdown.
    pub fn new(existing: Vec<(u32, Vec<u8>)>, script: Vec<WaitStep>) -> Self {
        let (tx, _rx) = watch::channel(false);
        let state = StoreState {
            messages: existing.into_iter().collect(),
            uid_validity: 1,
            script: script.into(),
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            shutdown: Arc::new(tx),
        }
    }

    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Ask the supervisor to stop, as Ctrl-C does.
    pub fn request_shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn fail_next_connect(&self, error: MailboxError) {
        self.state.lock().unwrap().connect_errors.push_back(error);
    }

    pub fn connects(&self) -> u32 {
        self.state.lock().unwrap().connects
    }

    pub fn fetched(&self) -> Vec<u32> {
        self.state.lock().unwrap().fetches.iter().map(|(_, uid)| *uid).collect()
    }

    pub fn fetches_by_session(&self) -> Vec<(u32, u32)> {
        self.state.lock().unwrap().fetches.clone()
    }

    pub fn scans(&self) -> Vec<u32> {
        self.state.lock().unwrap().scans.clone()
    }

    pub fn timeouts(&self) -> u32 {
        self.state.lock().unwrap().timeouts
    }

    pub fn logouts(&self) -> u32 {
        self.state.lock().unwrap().logouts
    }
}

#[async_trait]
impl MailboxConnector for FakeMailbox {
    async fn connect(&self) -> Result<Box<dyn MailboxSession>, MailboxError> {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.connect_errors.pop_front() {
            return Err(e);
        }
        state.connects += 1;
        Ok(Box::new(FakeSession {
            number: state.connects,
            status: FolderStatus {
                uid_validity: Some(state.uid_validity),
            },
            conn: Some(()),
            mailbox: self.clone(),
        }))
    }
}

fn dropped() -> MailboxError {
    MailboxError::Connectivity {
        host: "imap.test".into(),
        reason: "connection reset by peer".into(),
    }
}

/// Like a real IDLE, the connection is taken away for the length of a wait
/// and only handed back when the wait finishes on its own.
struct FakeSession {
    number: u32,
    status: FolderStatus,
    conn: Option<()>,
    mailbox: FakeMailbox,
}

impl FakeSession {
    fn conn(&self) -> Result<(), MailboxError> {
        self.conn.ok_or_else(|| MailboxError::Connectivity {
            host: "imap.test".into(),
            reason: "session lost during IDLE".into(),
        })
    }

    async fn until_shutdown(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<WaitOutcome, MailboxError> {
        let conn = self.conn.take();
        shutdown_requested(shutdown).await;
        self.conn = conn;
        Ok(WaitOutcome::Interrupted)
    }
}

#[async_trait]
impl MailboxSession for FakeSession {
    fn folder_status(&self) -> FolderStatus {
        self.status
    }

    async fn highest_uid(&mut self) -> Result<Option<u32>, MailboxError> {
        self.conn()?;
        let state = self.mailbox.state.lock().unwrap();
        Ok(state.messages.keys().last().copied())
    }

    async fn wait_for_change(
        &mut self,
        _timeout: Duration,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<WaitOutcome, MailboxError> {
        self.conn()?;
        let step = self.mailbox.state.lock().unwrap().script.pop_front();
        let step = match step {
            None => {
                self.mailbox.request_shutdown();
                return self.until_shutdown(shutdown).await;
            }
            Some(WaitStep::Hang) => return self.until_shutdown(shutdown).await,
            Some(step) => step,
        };

        let mut state = self.mailbox.state.lock().unwrap();
        match step {
            WaitStep::Signal(arrivals) => {
                state.messages.extend(arrivals);
                Ok(WaitOutcome::Changed)
            }
            WaitStep::Quiet(arrivals) => {
                state.messages.extend(arrivals);
                state.timeouts += 1;
                Ok(WaitOutcome::TimedOut)
            }
            WaitStep::Vanish(uid) => {
                state.vanished.insert(uid);
                Ok(WaitOutcome::Changed)
            }
            WaitStep::Drop => Err(dropped()),
            WaitStep::Reset(messages) => {
                state.messages = messages.into_iter().collect();
                state.vanished.clear();
                state.uid_validity += 1;
                Err(dropped())
            }
            WaitStep::Hang => unreachable!("handled above"),
        }
    }

    async fn uids_above(&mut self, mark: u32) -> Result<Vec<u32>, MailboxError> {
        self.conn()?;
        let mut state = self.mailbox.state.lock().unwrap();
        state.scans.push(mark);
        let mut uids: Vec<u32> = state
            .messages
            .keys()
            .chain(state.vanished.iter())
            .copied()
            .filter(|&uid| uid > mark)
            .collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn fetch(&mut self, uid: u32) -> Result<RawMessage, MailboxError> {
        self.conn()?;
        let mut state = self.mailbox.state.lock().unwrap();
        state.fetches.push((self.number, uid));
        match state.messages.get(&uid) {
            Some(body) => Ok(RawMessage {
                uid,
                body: body.clone(),
                flags: Vec::new(),
            }),
            None => Err(MailboxError::Fetch {
                uid,
                reason: "no such message".into(),
            }),
        }
    }

    async fn logout(&mut self) -> Result<(), MailboxError> {
        self.conn.take().ok_or_else(|| MailboxError::Protocol {
            command: "LOGOUT".into(),
            reason: "no connection to log out of".into(),
        })?;
        self.mailbox.state.lock().unwrap().logouts += 1;
        Ok(())
    }
}

/// Classifies anything mentioning "job offer" as an offer. Failures can be
/// injected per body marker.
#[derive(Default)]
pub struct FakeReplyService {
    classified: Mutex<Vec<String>>,
    classify_failures: Mutex<HashMap<String, u32>>,
    generate_failures: Mutex<HashMap<String, u32>>,
}

impl FakeReplyService {
    /// Fail the next `times` classifications of bodies containing `marker`.
    pub fn fail_classify(&self, marker: &str, times: u32) {
        self.classify_failures
            .lock()
            .unwrap()
            .insert(marker.to_string(), times);
    }

    pub fn fail_generate(&self, marker: &str, times: u32) {
        self.generate_failures
            .lock()
            .unwrap()
            .insert(marker.to_string(), times);
    }

    pub fn classified(&self) -> usize {
        self.classified.lock().unwrap().len()
    }

    fn take_failure(failures: &Mutex<HashMap<String, u32>>, body: &str) -> bool {
        let mut failures = failures.lock().unwrap();
        for (marker, remaining) in failures.iter_mut() {
            if *remaining > 0 && body.contains(marker.as_str()) {
                *remaining -= 1;
                return true;
            }
        }
        false
    }

    fn unreachable() -> LlmError {
        LlmError::RequestFailed {
            provider: "fake".into(),
            reason: "connection refused".into(),
        }
    }
}

#[async_trait]
impl ReplyService for FakeReplyService {
    async fn classify(&self, body: &str) -> Result<bool, LlmError> {
        if Self::take_failure(&self.classify_failures, body) {
            return Err(Self::unreachable());
        }
        self.classified.lock().unwrap().push(body.to_string());
        Ok(body.to_lowercase().contains("job offer"))
    }

    async fn generate_reply(
        &self,
        body: &str,
        profile: &ReplyProfile,
    ) -> Result<String, LlmError> {
        if Self::take_failure(&self.generate_failures, body) {
            return Err(Self::unreachable());
        }
        Ok(format!(
            "Thank you for reaching out.\n\nBest regards,\n{}",
            profile.full_name
        ))
    }
}

/// Records every submission attempt; can be told to refuse them all.
#[derive(Default)]
pub struct RecordingDispatcher {
    attempts: Mutex<Vec<ReplyDraft>>,
    refuse: Mutex<bool>,
}

impl RecordingDispatcher {
    pub fn refusing() -> Self {
        Self {
            refuse: Mutex::new(true),
            ..Default::default()
        }
    }

    pub fn attempts(&self) -> Vec<ReplyDraft> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    async fn send(&self, draft: &ReplyDraft) -> Result<(), DispatchError> {
        self.attempts.lock().unwrap().push(draft.clone());
        if *self.refuse.lock().unwrap() {
            return Err(DispatchError::Relay {
                host: "smtp.test".into(),
                reason: "connection refused".into(),
            });
        }
        Ok(())
    }
}

pub fn profile() -> ReplyProfile {
    ReplyProfile {
        full_name: "Ada Lovelace".into(),
        contact: "+44 20 0000 0000".into(),
        job_title: "Backend Engineer".into(),
        attachment_path: PathBuf::from("cv.pdf"),
        attachment_name: "Ada_Lovelace_CV.pdf".into(),
        attachment_mime: "application/pdf".into(),
    }
}

pub fn fast_watch_config() -> WatchConfig {
    WatchConfig {
        idle_timeout: Duration::from_millis(50),
        retry_backoff: Duration::from_millis(5),
        service_timeout: Duration::from_millis(500),
        max_service_attempts: 3,
    }
}

/// Everything a scenario needs, wired together.
pub struct Harness {
    pub mailbox: FakeMailbox,
    pub service: Arc<FakeReplyService>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub supervisor: Supervisor,
}

impl Harness {
    pub fn new(mailbox: FakeMailbox) -> Self {
        Self::with(mailbox, RecordingDispatcher::default(), fast_watch_config())
    }

    pub fn with(mailbox: FakeMailbox, dispatcher: RecordingDispatcher, config: WatchConfig) -> Self {
        let service = Arc::new(FakeReplyService::default());
        let dispatcher = Arc::new(dispatcher);
        let pipeline = MessagePipeline::new(
            service.clone(),
            dispatcher.clone(),
            profile(),
            OWN_ADDRESS,
        );
        let supervisor = Supervisor::new(Arc::new(mailbox.clone()), pipeline, config);
        Self {
            mailbox,
            service,
            dispatcher,
            supervisor,
        }
    }

    /// Run the supervisor until the wait script is exhausted.
    pub async fn run(&mut self) -> Result<(), WatchError> {
        let shutdown = self.mailbox.shutdown_receiver();
        tokio::time::timeout(TEST_TIMEOUT, self.supervisor.run(shutdown))
            .await
            .expect("supervisor did not stop in time")
    }

    pub fn mark(&self) -> u32 {
        self.supervisor.state().mark()
    }
}

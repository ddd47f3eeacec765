//! Watcher state: loop phase and the high-water mark.

use tracing::{debug, warn};

use crate::channels::FolderStatus;

/// Phase of the change-detection loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopPhase {
    Disconnected,
    Connecting,
    Ready,
    Waiting,
    Draining,
}

impl LoopPhase {
    /// Check if this phase allows transitioning to another phase.
    pub fn can_transition_to(&self, target: LoopPhase) -> bool {
        use LoopPhase::*;

        matches!(
            (self, target),
            (Disconnected, Connecting) |
            (Connecting, Ready) |
            // catch-up scan right after connecting
            (Ready, Draining) |
            (Ready, Waiting) |
            // timeout without a signal
            (Waiting, Ready) |
            (Waiting, Draining) |
            (Draining, Ready)
        ) || target == Disconnected
    }
}

impl std::fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Waiting => "waiting",
            Self::Draining => "draining",
        };
        write!(f, "{s}")
    }
}

/// Largest UID already handled. Never decreases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct HighWaterMark(u32);

impl HighWaterMark {
    pub fn new(uid: u32) -> Self {
        Self(uid)
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    /// Move the mark up to `uid`. Returns whether it moved.
    pub fn advance(&mut self, uid: u32) -> bool {
        if uid > self.0 {
            self.0 = uid;
            true
        } else {
            false
        }
    }
}

/// What `WatchState::on_connected` did with the mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkInit {
    /// First connect of the process: mark set to the highest existing UID.
    Initialized(u32),
    /// Reconnect in the same UID space: mark kept.
    Resumed(u32),
    /// UIDVALIDITY changed: mark re-based onto the new highest UID.
    Rebased { from: u32, to: u32 },
}

/// State that outlives a single session, owned by the supervisor.
#[derive(Debug)]
pub struct WatchState {
    phase: LoopPhase,
    mark: Option<HighWaterMark>,
    uid_validity: Option<u32>,
    /// UID whose reply-service calls keep failing, and how many attempts.
    service_failures: Option<(u32, u32)>,
}

impl Default for WatchState {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchState {
    pub fn new() -> Self {
        Self {
            phase: LoopPhase::Disconnected,
            mark: None,
            uid_validity: None,
            service_failures: None,
        }
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    /// Current mark; 0 before the first connect.
    pub fn mark(&self) -> u32 {
        self.mark.map(|m| m.get()).unwrap_or(0)
    }

    pub fn transition(&mut self, target: LoopPhase) {
        if self.phase == target {
            return;
        }
        if !self.phase.can_transition_to(target) {
            warn!(from = %self.phase, to = %target, "Unexpected watcher phase transition");
        }
        debug!(from = %self.phase, to = %target, "Watcher phase");
        self.phase = target;
    }

    /// Settle the mark for a fresh session.
    pub fn on_connected(&mut self, status: FolderStatus, highest: Option<u32>) -> MarkInit {
        let highest = highest.unwrap_or(0);
        let previous_validity = self.uid_validity;
        self.uid_validity = status.uid_validity;

        match self.mark {
            None => {
                self.mark = Some(HighWaterMark::new(highest));
                MarkInit::Initialized(highest)
            }
            Some(mark)
                if previous_validity.is_some()
                    && status.uid_validity.is_some()
                    && previous_validity != status.uid_validity =>
            {
                self.mark = Some(HighWaterMark::new(highest));
                self.service_failures = None;
                MarkInit::Rebased {
                    from: mark.get(),
                    to: highest,
                }
            }
            Some(mark) => MarkInit::Resumed(mark.get()),
        }
    }

    /// Mark `uid` as handled.
    pub fn advance(&mut self, uid: u32) -> bool {
        if matches!(self.service_failures, Some((failed, _)) if failed <= uid) {
            self.service_failures = None;
        }
        self.mark.get_or_insert_with(HighWaterMark::default).advance(uid)
    }

    /// Count one more failed reply-service attempt on `uid`; returns the
    /// number of attempts that failed so far.
    pub fn record_service_failure(&mut self, uid: u32) -> u32 {
        let attempts = match self.service_failures {
            Some((failed, n)) if failed == uid => n + 1,
            _ => 1,
        };
        self.service_failures = Some((uid, attempts));
        attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(validity: u32) -> FolderStatus {
        FolderStatus {
            uid_validity: Some(validity),
        }
    }

    #[test]
    fn mark_never_decreases() {
        let mut mark = HighWaterMark::new(5);
        assert!(!mark.advance(3));
        assert!(!mark.advance(5));
        assert_eq!(mark.get(), 5);
        assert!(mark.advance(9));
        assert_eq!(mark.get(), 9);
    }

    #[test]
    fn first_connect_initializes_from_highest() {
        let mut state = WatchState::new();
        assert_eq!(state.on_connected(status(1), Some(3)), MarkInit::Initialized(3));
        assert_eq!(state.mark(), 3);
    }

    #[test]
    fn empty_folder_starts_at_zero() {
        let mut state = WatchState::new();
        assert_eq!(state.on_connected(status(1), None), MarkInit::Initialized(0));
        assert_eq!(state.mark(), 0);
    }

    #[test]
    fn reconnect_keeps_mark() {
        let mut state = WatchState::new();
        state.on_connected(status(1), Some(3));
        state.advance(4);
        assert_eq!(state.on_connected(status(1), Some(7)), MarkInit::Resumed(4));
        assert_eq!(state.mark(), 4);
    }

    #[test]
    fn uid_validity_change_rebases() {
        let mut state = WatchState::new();
        state.on_connected(status(1), Some(40));
        assert_eq!(
            state.on_connected(status(2), Some(6)),
            MarkInit::Rebased { from: 40, to: 6 }
        );
        assert_eq!(state.mark(), 6);
    }

    #[test]
    fn service_failures_counted_per_uid() {
        let mut state = WatchState::new();
        state.on_connected(status(1), Some(3));
        assert_eq!(state.record_service_failure(4), 1);
        assert_eq!(state.record_service_failure(4), 2);
        assert_eq!(state.record_service_failure(5), 1);

        state.advance(5);
        assert_eq!(state.record_service_failure(6), 1);
    }

    #[test]
    fn transitions_follow_cycle() {
        use LoopPhase::*;
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Waiting));
        assert!(Waiting.can_transition_to(Ready));
        assert!(Waiting.can_transition_to(Draining));
        assert!(Draining.can_transition_to(Ready));
        assert!(Draining.can_transition_to(Disconnected));
        assert!(!Disconnected.can_transition_to(Waiting));
        assert!(!Draining.can_transition_to(Waiting));
    }
}

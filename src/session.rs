// src/session.rs
//
// Link session lifecycle: Idle -> Running -> Stopping -> Closed.
// Transitions are compare-and-set so that racing stop requests (operator,
// watchdog, read failure) resolve to exactly one winner.

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Running,
    Stopping,
    Closed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::Idle => "idle",
            LinkState::Running => "running",
            LinkState::Stopping => "stopping",
            LinkState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Why a session left Running
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    Command,
    Watchdog,
    ReadError(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Command => f.write_str("stop command"),
            StopReason::Watchdog => f.write_str("watchdog expiry"),
            StopReason::ReadError(e) => write!(f, "read error: {}", e),
        }
    }
}

/// Shared handle on one session's state. Clones observe the same session.
#[derive(Clone)]
pub struct LinkSession {
    state: Arc<watch::Sender<LinkState>>,
    reason: Arc<Mutex<Option<StopReason>>>,
}

impl Default for LinkSession {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkSession {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(LinkState::Idle);
        LinkSession {
            state: Arc::new(tx),
            reason: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.state() == LinkState::Running
    }

    /// Move `from` -> `to`. Returns false (and changes nothing) if the
    /// session was not in `from`.
    pub fn transition(&self, from: LinkState, to: LinkState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    /// Running -> Stopping. Only the first caller wins and records its reason.
    ///
    /// The reason lock is held across the transition, so anyone who observes
    /// Stopping and then asks for the reason sees it.
    pub fn request_stop(&self, reason: StopReason) -> bool {
        let mut guard = self.reason.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !self.transition(LinkState::Running, LinkState::Stopping) {
            return false;
        }
        *guard = Some(reason);
        true
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Resolve once the state satisfies `pred` (immediately if it already does).
    pub async fn wait_until<F>(&self, mut pred: F)
    where
        F: FnMut(LinkState) -> bool,
    {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close under us
        let _ = rx.wait_for(|state| pred(*state)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_lifecycle_transitions() {
        let session = LinkSession::new();
        assert_eq!(session.state(), LinkState::Idle);
        assert!(!session.request_stop(StopReason::Command));

        assert!(session.transition(LinkState::Idle, LinkState::Running));
        assert!(session.is_running());
        assert!(!session.transition(LinkState::Idle, LinkState::Running));

        assert!(session.request_stop(StopReason::Watchdog));
        assert!(!session.request_stop(StopReason::Command));
        assert_eq!(session.stop_reason(), Some(StopReason::Watchdog));

        assert!(session.transition(LinkState::Stopping, LinkState::Closed));
        assert_eq!(session.state(), LinkState::Closed);
        // No resurrection
        assert!(!session.transition(LinkState::Idle, LinkState::Running));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_reason_visible_as_soon_as_stopping() {
        for _ in 0..200 {
            let session = LinkSession::new();
            session.transition(LinkState::Idle, LinkState::Running);

            let waiter = session.clone();
            let observer = tokio::spawn(async move {
                waiter.wait_until(|s| s == LinkState::Stopping).await;
                waiter.stop_reason()
            });

            let stopper = session.clone();
            std::thread::spawn(move || stopper.request_stop(StopReason::Watchdog))
                .join()
                .unwrap();
            assert_eq!(observer.await.unwrap(), Some(StopReason::Watchdog));
        }
    }

    #[tokio::test]
    async fn test_wait_until_observes_other_clone() {
        let session = LinkSession::new();
        session.transition(LinkState::Idle, LinkState::Running);

        let waiter = session.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_until(|s| s == LinkState::Stopping).await;
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());
        session.request_stop(StopReason::Command);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

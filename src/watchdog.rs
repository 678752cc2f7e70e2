// src/watchdog.rs
//
// Single-shot session watchdog.
//
// Two policies:
// - from_open: the countdown starts with the session and fires whatever the traffic
// - from_first_frame: the countdown starts on the first received frame; an idle
//   session never expires
//
// On expiry the watchdog requests a stop only if the session is still Running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::session::{LinkSession, LinkState, StopReason};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogPolicy {
    FromOpen,
    FromFirstFrame,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchdogConfig {
    pub policy: WatchdogPolicy,
    pub timeout: Duration,
}

pub struct Watchdog {
    armed: AtomicBool,
    arm_tx: Mutex<Option<oneshot::Sender<()>>>,
    handle: JoinHandle<()>,
}

impl Watchdog {
    /// Spawn the timer task for a session that is already Running.
    /// Must be called from inside a tokio runtime.
    pub fn spawn(config: WatchdogConfig, session: LinkSession) -> Self {
        let (arm_tx, arm_rx) = oneshot::channel::<()>();
        let from_open = config.policy == WatchdogPolicy::FromOpen;
        let timeout = config.timeout;

        let handle = tokio::spawn(async move {
            if !from_open {
                tokio::select! {
                    armed = arm_rx => {
                        // Sender dropped without arming: the watchdog went away
                        if armed.is_err() {
                            return;
                        }
                    }
                    _ = session.wait_until(|s| s != LinkState::Running) => return,
                }
            }

            debug!("[watchdog] Countdown started ({:?})", timeout);
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    if session.request_stop(StopReason::Watchdog) {
                        info!("[watchdog] Expired after {:?}, stopping session", timeout);
                    }
                }
                _ = session.wait_until(|s| s != LinkState::Running) => {
                    debug!("[watchdog] Session left running before expiry");
                }
            }
        });

        Watchdog {
            armed: AtomicBool::new(from_open),
            arm_tx: Mutex::new(if from_open { None } else { Some(arm_tx) }),
            handle,
        }
    }

    /// Start the countdown. Only the first call has any effect; returns
    /// whether this call was it. Safe to call from blocking threads.
    pub fn arm(&self) -> bool {
        if self.armed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let tx = self.arm_tx.lock().ok().and_then(|mut guard| guard.take());
        match tx {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Cancel the timer without firing it
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_session() -> LinkSession {
        let session = LinkSession::new();
        assert!(session.transition(LinkState::Idle, LinkState::Running));
        session
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_frame_policy_never_fires_without_traffic() {
        let session = running_session();
        let _watchdog = Watchdog::spawn(
            WatchdogConfig {
                policy: WatchdogPolicy::FromFirstFrame,
                timeout: Duration::from_secs(2),
            },
            session.clone(),
        );

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(session.state(), LinkState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_frame_policy_fires_after_arming() {
        let session = running_session();
        let watchdog = Watchdog::spawn(
            WatchdogConfig {
                policy: WatchdogPolicy::FromFirstFrame,
                timeout: Duration::from_secs(2),
            },
            session.clone(),
        );

        // First frame arrives at t=5
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(session.state(), LinkState::Running);
        assert!(watchdog.arm());
        assert!(!watchdog.arm());

        tokio::time::sleep(Duration::from_millis(1990)).await;
        assert_eq!(session.state(), LinkState::Running);

        // Expires at t=7
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(session.state(), LinkState::Stopping);
        assert_eq!(session.stop_reason(), Some(StopReason::Watchdog));
    }

    #[tokio::test(start_paused = true)]
    async fn test_from_open_fires_regardless_of_traffic() {
        let session = running_session();
        let watchdog = Watchdog::spawn(
            WatchdogConfig {
                policy: WatchdogPolicy::FromOpen,
                timeout: Duration::from_secs(300),
            },
            session.clone(),
        );
        assert!(watchdog.is_armed());
        assert!(!watchdog.arm());

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(session.state(), LinkState::Running);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(session.state(), LinkState::Stopping);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_late_shutdown_after_session_closed() {
        let session = running_session();
        let _watchdog = Watchdog::spawn(
            WatchdogConfig {
                policy: WatchdogPolicy::FromOpen,
                timeout: Duration::from_secs(2),
            },
            session.clone(),
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(session.request_stop(StopReason::Command));
        assert!(session.transition(LinkState::Stopping, LinkState::Closed));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(session.state(), LinkState::Closed);
        assert_eq!(session.stop_reason(), Some(StopReason::Command));
    }
}

//! Call test harness
//!
//! Runs real `Session` loops against an in-process relay and the scripted
//! RTC backend:
//! - `CallHarness` owns the relay
//! - `TestPeer` wraps one spawned session, its backend and a notice log
//!
//! Basic usage pattern:
//!
//! 1. Create a `CallHarness`
//! 2. Add peers with fixed identities using `harness.peer("aa")`
//! 3. Drive them through their `SessionHandle`
//! 4. Wait for notices with `peer.wait_for_state(..)` / `peer.wait_for(..)`
//! 5. Call `peer.shutdown()` to stop the loop and inspect the session

use peercall::media::{CaptureDevices, SyntheticDevices};
use peercall::signaling::MemoryRelay;
use peercall::testing::ScriptedBackend;
use peercall::{CallConfig, Session, SessionHandle, SessionNotice, SessionState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default wait for a notice
pub const NOTICE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result type for test harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Error type for test harness operations
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Session error: {0}")]
    SessionError(#[from] peercall::Error),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Notice channel closed")]
    ChannelClosed,

    #[error("Session task failed: {0}")]
    TaskFailed(String),
}

/// Owns the relay every peer connects through
#[derive(Default)]
pub struct CallHarness {
    pub relay: MemoryRelay,
}

impl CallHarness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a session with identity `id` and granting devices
    pub fn peer(&self, id: &str) -> TestPeer {
        self.peer_with_devices(id, Arc::new(SyntheticDevices::granting()))
    }

    /// Spawn a session with identity `id` and the given devices
    pub fn peer_with_devices(&self, id: &str, devices: Arc<dyn CaptureDevices>) -> TestPeer {
        let backend = Arc::new(ScriptedBackend::new());
        let session = Session::new(
            CallConfig::default(),
            devices,
            Arc::new(self.relay.connector_with_id(id)),
            backend.clone(),
        )
        .expect("default config is valid");

        let notices = session.subscribe();
        let (handle, task) = session.spawn();

        TestPeer {
            id: id.to_string(),
            handle,
            notices,
            seen: Vec::new(),
            task,
            backend,
        }
    }
}

/// One spawned session
pub struct TestPeer {
    pub id: String,
    pub handle: SessionHandle,
    notices: broadcast::Receiver<SessionNotice>,
    seen: Vec<SessionNotice>,
    task: JoinHandle<Session>,
    pub backend: Arc<ScriptedBackend>,
}

impl TestPeer {
    /// Wait for the first notice matching `pred`
    pub async fn wait_for<F>(&mut self, what: &str, pred: F) -> HarnessResult<SessionNotice>
    where
        F: Fn(&SessionNotice) -> bool,
    {
        let deadline = tokio::time::Instant::now() + NOTICE_TIMEOUT;
        loop {
            let notice = tokio::time::timeout_at(deadline, self.notices.recv())
                .await
                .map_err(|_| HarnessError::Timeout(format!("{}: {}", self.id, what)))?;

            match notice {
                Ok(notice) => {
                    debug!(peer = %self.id, "notice: {:?}", notice);
                    self.seen.push(notice.clone());
                    if pred(&notice) {
                        return Ok(notice);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(HarnessError::ChannelClosed)
                }
            }
        }
    }

    /// Wait until the session enters `state`
    pub async fn wait_for_state(&mut self, state: SessionState) -> HarnessResult<()> {
        self.wait_for(&format!("state {}", state), |n| {
            matches!(n, SessionNotice::StateChanged { to, .. } if *to == state)
        })
        .await
        .map(|_| ())
    }

    /// Every notice consumed so far
    pub fn seen(&self) -> &[SessionNotice] {
        &self.seen
    }

    /// Stop the loop and return the session for inspection
    pub async fn shutdown(self) -> HarnessResult<Session> {
        // The loop may already have stopped
        let _ = self.handle.shutdown();
        tokio::time::timeout(NOTICE_TIMEOUT, self.task)
            .await
            .map_err(|_| HarnessError::Timeout(format!("{}: shutdown", self.id)))?
            .map_err(|e| HarnessError::TaskFailed(e.to_string()))
    }
}

/// Initialize test logging (safe to call from every test)
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info,peercall=debug")
        .with_test_writer()
        .try_init();
}

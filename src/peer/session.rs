//! One peer negotiation attempt.
//!
//! A [`PeerSession`] owns its [`PeerLink`] for its whole life. It watches
//! the link's ICE state and reports a failure through the close callback,
//! at most once.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::identifiers::PeerSessionId;
use crate::protocol::{SessionDescription, Signal};
use crate::session::{RpcOptions, Session};

use super::link::{LinkState, PeerLink};

// ============================================================================
// Types
// ============================================================================

/// Callback run once when the link fails or the session closes.
pub type Callback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct CloseSlot {
    callback: Option<Callback>,
    failed: bool,
}

// ============================================================================
// PeerSession
// ============================================================================

/// Peer link plus the identity it was negotiated under.
pub struct PeerSession {
    id: PeerSessionId,
    link: Arc<dyn PeerLink>,
    on_close: Arc<Mutex<CloseSlot>>,
    on_stop: Mutex<Option<Callback>>,
    closed: AtomicBool,
    monitor: JoinHandle<()>,
}

impl fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSession")
            .field("id", &self.id)
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl PeerSession {
    /// Wraps `link` under a fresh id and starts watching its state.
    ///
    /// `on_stop` runs when the session is closed locally.
    pub fn new(link: Arc<dyn PeerLink>, on_stop: Option<Callback>) -> Self {
        let id = PeerSessionId::generate();
        let on_close = Arc::new(Mutex::new(CloseSlot::default()));
        let monitor = tokio::spawn(monitor(id.clone(), link.state(), Arc::clone(&on_close)));

        Self {
            id,
            link,
            on_close,
            on_stop: Mutex::new(on_stop),
            closed: AtomicBool::new(false),
            monitor,
        }
    }

    /// Returns the session id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> &PeerSessionId {
        &self.id
    }

    /// Returns the underlying link.
    #[inline]
    #[must_use]
    pub fn link(&self) -> &Arc<dyn PeerLink> {
        &self.link
    }

    /// Installs the failure callback.
    ///
    /// Runs right away if the link already failed.
    pub fn set_on_close(&self, callback: Callback) {
        let fire = {
            let mut slot = self.on_close.lock();
            if slot.failed {
                Some(callback)
            } else {
                slot.callback = Some(callback);
                None
            }
        };

        if let Some(callback) = fire {
            callback();
        }
    }

    /// Runs the offer/answer exchange through `method` on the far end.
    ///
    /// # Errors
    ///
    /// Fails if the link rejects a description, the call fails, or the
    /// reply is not a session description.
    pub async fn negotiate(&self, session: &Session, method: &str) -> Result<()> {
        let offer = self.link.create_offer().await?;
        self.link.set_local_description(offer.clone()).await?;

        debug!(peer_session = %self.id, method, "Sending offer");
        let reply = session
            .rpc(
                method,
                json!({ "id": self.id, "offer": offer }),
                RpcOptions::new(),
            )
            .await?
            .into_value()?;

        let answer: SessionDescription = serde_json::from_value(reply)?;
        self.link.set_remote_description(answer).await
    }

    /// Applies one envelope from the signaling side channel.
    ///
    /// # Errors
    ///
    /// Fails if the link rejects a description or candidate.
    pub async fn apply_signal(&self, signal: Signal) -> Result<()> {
        match signal {
            Signal::Sdp(description) => self.link.set_remote_description(description).await,
            Signal::Candidate(candidate) => self.link.add_ice_candidate(candidate).await,
            Signal::CloseConnection(true) => {
                self.close();
                Ok(())
            }
            Signal::CloseConnection(false) => Ok(()),
        }
    }

    /// Closes the link and runs the stop callback. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) || self.link.is_closed() {
            return;
        }

        debug!(peer_session = %self.id, "Closing peer session");
        self.link.close();
        if let Some(stop) = self.on_stop.lock().take() {
            stop();
        }
    }

    /// Returns `true` once closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for PeerSession {
    fn drop(&mut self) {
        self.monitor.abort();
    }
}

async fn monitor(
    id: PeerSessionId,
    mut states: tokio::sync::watch::Receiver<LinkState>,
    slot: Arc<Mutex<CloseSlot>>,
) {
    loop {
        let state = *states.borrow_and_update();
        if state == LinkState::Failed {
            warn!(peer_session = %id, "Peer link failed");
            let callback = {
                let mut slot = slot.lock();
                slot.failed = true;
                slot.callback.take()
            };
            if let Some(callback) = callback {
                callback();
            }
            return;
        }

        if states.changed().await.is_err() {
            return;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;

    use crate::peer::testing::FakeLink;
    use crate::protocol::IceCandidate;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_id_is_32_uppercase_hex() {
        let (link, _) = FakeLink::new();
        let a = PeerSession::new(link.clone(), None);
        let b = PeerSession::new(link, None);

        assert_eq!(a.id().as_str().len(), 32);
        assert!(
            a.id()
                .as_str()
                .chars()
                .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
        );
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_failure_fires_close_once() {
        let (link, _) = FakeLink::new();
        let session = PeerSession::new(link.clone(), None);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        session.set_on_close(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        link.set_state(LinkState::Checking);
        link.set_state(LinkState::Failed);
        settle().await;
        link.set_state(LinkState::Failed);
        settle().await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_late_close_callback_fires_immediately() {
        let (link, _) = FakeLink::new();
        let session = PeerSession::new(link.clone(), None);
        link.set_state(LinkState::Failed);
        settle().await;

        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        session.set_on_close(Box::new(move || flag.store(true, Ordering::SeqCst)));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (link, _) = FakeLink::new();
        let stops = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&stops);
        let session = PeerSession::new(
            link.clone(),
            Some(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );

        session.close();
        session.close();
        assert!(session.is_closed());
        assert_eq!(link.close_count(), 1);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_apply_signal() {
        let (link, _) = FakeLink::new();
        let session = PeerSession::new(link.clone(), None);

        session
            .apply_signal(Signal::from_text(r#"{"sdp":{"type":"answer","sdp":"v=0 a"}}"#).expect("signal"))
            .await
            .expect("sdp");
        session
            .apply_signal(Signal::Candidate(IceCandidate {
                candidate: "candidate:1 1 UDP 1 10.0.0.1 9 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
            }))
            .await
            .expect("candidate");
        assert_eq!(link.remote(), Some(SessionDescription::answer("v=0 a")));
        assert_eq!(link.candidates().len(), 1);

        session
            .apply_signal(Signal::CloseConnection(true))
            .await
            .expect("close");
        assert!(session.is_closed());
    }
}

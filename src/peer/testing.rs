//! Scriptable peer link for tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::error::{Error, Result};
use crate::protocol::{IceCandidate, IceServer, SessionDescription};
use crate::transport::WirePayload;

use super::link::{ChannelEvent, DataChannel, LinkState, PeerLink, PeerLinkFactory};

/// Far side of one data channel.
pub(crate) struct ChannelRemote {
    pub(crate) label: String,
    pub(crate) events: mpsc::UnboundedSender<ChannelEvent>,
    pub(crate) outgoing: mpsc::UnboundedReceiver<WirePayload>,
}

pub(crate) struct FakeLink {
    state: watch::Sender<LinkState>,
    local: Mutex<Option<SessionDescription>>,
    remote: Mutex<Option<SessionDescription>>,
    candidates: Mutex<Vec<IceCandidate>>,
    ice_servers: Mutex<Vec<IceServer>>,
    channels: mpsc::UnboundedSender<ChannelRemote>,
    fail_remote: AtomicBool,
    closed: AtomicBool,
    closes: AtomicUsize,
}

impl FakeLink {
    pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ChannelRemote>) {
        let (channels, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(LinkState::New);
        let link = Arc::new(Self {
            state,
            local: Mutex::new(None),
            remote: Mutex::new(None),
            candidates: Mutex::new(Vec::new()),
            ice_servers: Mutex::new(Vec::new()),
            channels,
            fail_remote: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            closes: AtomicUsize::new(0),
        });
        (link, rx)
    }

    pub(crate) fn set_state(&self, state: LinkState) {
        self.state.send_replace(state);
    }

    pub(crate) fn reject_remote_description(&self) {
        self.fail_remote.store(true, Ordering::SeqCst);
    }

    pub(crate) fn local(&self) -> Option<SessionDescription> {
        self.local.lock().clone()
    }

    pub(crate) fn remote(&self) -> Option<SessionDescription> {
        self.remote.lock().clone()
    }

    pub(crate) fn candidates(&self) -> Vec<IceCandidate> {
        self.candidates.lock().clone()
    }

    pub(crate) fn ice_servers(&self) -> Vec<IceServer> {
        self.ice_servers.lock().clone()
    }

    pub(crate) fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerLink for FakeLink {
    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::offer("v=0 fake-offer"))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<()> {
        *self.local.lock() = Some(description);
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<()> {
        if self.fail_remote.load(Ordering::SeqCst) {
            return Err(Error::negotiation("remote description rejected"));
        }
        *self.remote.lock() = Some(description);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.candidates.lock().push(candidate);
        Ok(())
    }

    fn create_data_channel(&self, label: &str) -> Result<DataChannel> {
        let (outgoing, remote_outgoing) = mpsc::unbounded_channel();
        let (remote_events, events) = mpsc::unbounded_channel();
        let _ = self.channels.send(ChannelRemote {
            label: label.to_owned(),
            events: remote_events,
            outgoing: remote_outgoing,
        });
        Ok(DataChannel {
            label: label.to_owned(),
            outgoing,
            events,
        })
    }

    fn state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(LinkState::Closed);
    }
}

/// Factory handing every link it creates to the test.
pub(crate) struct FakeFactory {
    links: mpsc::UnboundedSender<(Arc<FakeLink>, mpsc::UnboundedReceiver<ChannelRemote>)>,
    reject_remote: AtomicBool,
}

impl FakeFactory {
    pub(crate) fn new() -> (
        Self,
        mpsc::UnboundedReceiver<(Arc<FakeLink>, mpsc::UnboundedReceiver<ChannelRemote>)>,
    ) {
        let (links, rx) = mpsc::unbounded_channel();
        (
            Self {
                links,
                reject_remote: AtomicBool::new(false),
            },
            rx,
        )
    }

    pub(crate) fn reject_remote_descriptions(&self) {
        self.reject_remote.store(true, Ordering::SeqCst);
    }
}

impl PeerLinkFactory for FakeFactory {
    fn create(&self, ice_servers: &[IceServer]) -> Result<Arc<dyn PeerLink>> {
        let (link, channels) = FakeLink::new();
        *link.ice_servers.lock() = ice_servers.to_vec();
        if self.reject_remote.load(Ordering::SeqCst) {
            link.reject_remote_description();
        }
        let _ = self.links.send((Arc::clone(&link), channels));
        Ok(link)
    }
}

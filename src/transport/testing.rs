//! In-memory binding for lifecycle and session tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{Error, Result, code};
use crate::protocol::{LoginResponse, Message};
use crate::session::Session;

use super::binding::{Link, LinkEnd, LinkEvent, TransportBinding, WirePayload};

const RECV_TIMEOUT: Duration = Duration::from_secs(30);

/// Routes `tracing` output to the test harness, filtered by `RUST_LOG`.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Control {
    ends: mpsc::UnboundedSender<LinkEnd>,
    failures: Mutex<VecDeque<Error>>,
    retry: AtomicBool,
    require_direct: AtomicBool,
    opens: AtomicUsize,
}

/// Binding whose links are handed to a [`MockRemote`].
pub(crate) struct MockBinding {
    kind: &'static str,
    priority: u32,
    control: Arc<Control>,
}

/// Test side of a [`MockBinding`].
pub(crate) struct MockRemote {
    control: Arc<Control>,
    ends: tokio::sync::Mutex<mpsc::UnboundedReceiver<LinkEnd>>,
}

impl MockBinding {
    pub(crate) fn new(kind: &'static str, priority: u32) -> (Self, MockRemote) {
        let (tx, rx) = mpsc::unbounded_channel();
        let control = Arc::new(Control {
            ends: tx,
            failures: Mutex::new(VecDeque::new()),
            retry: AtomicBool::new(true),
            require_direct: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
        });
        let binding = Self {
            kind,
            priority,
            control: Arc::clone(&control),
        };
        let remote = MockRemote {
            control,
            ends: tokio::sync::Mutex::new(rx),
        };
        (binding, remote)
    }
}

#[async_trait]
impl TransportBinding for MockBinding {
    fn kind(&self) -> &'static str {
        self.kind
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn enabled(&self, session: &Session) -> bool {
        !self.control.require_direct.load(Ordering::SeqCst) || session.direct_enabled()
    }

    async fn open(&self, _session: &Session) -> Result<Link> {
        self.control.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.control.failures.lock().pop_front() {
            return Err(err);
        }

        let (link, end) = Link::pair();
        self.control
            .ends
            .send(end)
            .map_err(|_| Error::transport("mock remote dropped", code::CONNECT_FAILED))?;
        Ok(link)
    }

    fn disconnect(&self, _session: &Session) -> bool {
        self.control.retry.load(Ordering::SeqCst)
    }
}

impl MockRemote {
    /// Waits for the next link the binding opens.
    pub(crate) async fn accept(&self) -> RemoteEnd {
        let mut ends = self.ends.lock().await;
        let end = tokio::time::timeout(RECV_TIMEOUT, ends.recv())
            .await
            .expect("link opened in time")
            .expect("binding alive");
        RemoteEnd {
            events: end.events,
            outgoing: end.outgoing,
        }
    }

    /// Makes the next `open` fail with `err`.
    pub(crate) fn fail_next_open(&self, err: Error) {
        self.control.failures.lock().push_back(err);
    }

    /// Sets what `disconnect` reports.
    pub(crate) fn set_retry(&self, retry: bool) {
        self.control.retry.store(retry, Ordering::SeqCst);
    }

    /// Makes the binding follow the session's direct mode switch.
    pub(crate) fn require_direct_mode(&self) {
        self.control.require_direct.store(true, Ordering::SeqCst);
    }

    pub(crate) fn open_count(&self) -> usize {
        self.control.opens.load(Ordering::SeqCst)
    }
}

/// Far end of one mock link.
pub(crate) struct RemoteEnd {
    events: mpsc::UnboundedSender<LinkEvent>,
    outgoing: mpsc::UnboundedReceiver<WirePayload>,
}

impl RemoteEnd {
    pub(crate) async fn recv(&mut self) -> WirePayload {
        tokio::time::timeout(RECV_TIMEOUT, self.outgoing.recv())
            .await
            .expect("payload in time")
            .expect("link open")
    }

    pub(crate) async fn recv_message(&mut self) -> Message {
        match self.recv().await {
            WirePayload::Text(text) => Message::from_text(&text).expect("valid message"),
            WirePayload::Binary(bytes) => panic!("expected text, got {} bytes", bytes.len()),
        }
    }

    pub(crate) async fn recv_binary(&mut self) -> Bytes {
        match self.recv().await {
            WirePayload::Binary(bytes) => bytes,
            WirePayload::Text(text) => panic!("expected binary, got {text}"),
        }
    }

    pub(crate) fn try_recv(&mut self) -> Option<WirePayload> {
        self.outgoing.try_recv().ok()
    }

    pub(crate) fn send_text(&self, text: &str) {
        let _ = self
            .events
            .send(LinkEvent::Payload(WirePayload::Text(text.to_owned())));
    }

    pub(crate) fn send_message(&self, message: &Message) {
        self.send_text(&message.to_text().expect("serializable"));
    }

    pub(crate) fn send_binary(&self, bytes: Bytes) {
        let _ = self
            .events
            .send(LinkEvent::Payload(WirePayload::Binary(bytes)));
    }

    pub(crate) fn close(&self, reason: &str, code: u32) {
        let _ = self.events.send(LinkEvent::Closed {
            reason: reason.to_owned(),
            code,
        });
    }

    /// Reads the login and acknowledges it.
    pub(crate) async fn accept_login(&mut self) {
        match self.recv_message().await {
            Message::Login(_) => {}
            other => panic!("expected login, got {other:?}"),
        }
        self.send_message(&Message::LoginResponse(LoginResponse::default()));
    }
}

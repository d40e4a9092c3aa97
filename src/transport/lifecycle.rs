//! Shared transport lifecycle.
//!
//! Every transport kind goes through the same state machine; only opening
//! and closing the physical link differ, and those are delegated to a
//! [`TransportBinding`].
//!
//! # States
//!
//! ```text
//!           start()                link open, login sent
//!   Idle ───────────► Connecting ─────────────────────► Authenticating
//!    ▲                    │                                   │
//!    │ no retry           │ failure                 login ack │
//!    │                    ▼                                   ▼
//!    └────────────── BackingOff ◄──────── failure ────── Established
//!                         │
//!                         └─ delay elapsed ─► Connecting
//! ```
//!
//! [`suspend`](Transport::suspend) moves any state to `Suspended`, which
//! is left only through an explicit [`start`](Transport::start).

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result, code};
use crate::identifiers::TransportId;
use crate::protocol::{Frame, Message};
use crate::session::{AuthStatus, Session, SessionConfig, SessionHandle};

use super::backoff::Backoff;
use super::binding::{Link, LinkEvent, Outbound, TransportBinding, WirePayload};

// ============================================================================
// TransportState
// ============================================================================

/// Lifecycle state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Not connected and not trying to.
    Idle,
    /// Opening the link.
    Connecting,
    /// Link open, waiting for the login acknowledgment.
    Authenticating,
    /// Logged in and usable.
    Established,
    /// Disabled until started explicitly.
    Suspended,
    /// Waiting to reconnect.
    BackingOff,
}

// ============================================================================
// Internal State
// ============================================================================

struct TransportShared {
    state: TransportState,
    /// A link task is running for the current epoch.
    active: bool,
    suspended: bool,
    closed: bool,
    logged_in: bool,
    awaiting_credentials: bool,
    backoff: Backoff,
    inflight: u64,
    outbound: Option<mpsc::UnboundedSender<WirePayload>>,
    link_task: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    countdown_timer: Option<JoinHandle<()>>,
    last_error: Option<(String, u32)>,
    /// Bumped on every start and teardown; stale tasks compare against it.
    epoch: u64,
}

impl TransportShared {
    fn cancel_timers(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(timer) = self.countdown_timer.take() {
            timer.abort();
        }
    }

    fn drop_link(&mut self) {
        self.outbound = None;
        self.logged_in = false;
        self.awaiting_credentials = false;
        self.inflight = 0;
        self.active = false;
    }
}

struct TransportInner {
    id: TransportId,
    session: SessionHandle,
    binding: Arc<dyn TransportBinding>,
    countdown_tick: Duration,
    shared: Mutex<TransportShared>,
}

// ============================================================================
// Transport
// ============================================================================

/// One way of reaching the far end, with its own connect/login/backoff
/// lifecycle.
///
/// Created by [`Session::add_transport`]. Cheap to clone.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("id", &self.inner.id)
            .field("kind", &self.kind())
            .field("priority", &self.priority())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Transport - Accessors
// ============================================================================

impl Transport {
    pub(crate) fn new(
        session: SessionHandle,
        binding: Arc<dyn TransportBinding>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                id: TransportId::next(),
                session,
                binding,
                countdown_tick: config.countdown_tick,
                shared: Mutex::new(TransportShared {
                    state: TransportState::Idle,
                    active: false,
                    suspended: false,
                    closed: false,
                    logged_in: false,
                    awaiting_credentials: false,
                    backoff: Backoff::new(config.backoff_initial, config.backoff_max),
                    inflight: 0,
                    outbound: None,
                    link_task: None,
                    reconnect_timer: None,
                    countdown_timer: None,
                    last_error: None,
                    epoch: 0,
                }),
            }),
        }
    }

    /// Returns the transport id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> TransportId {
        self.inner.id
    }

    /// Returns the binding kind.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &'static str {
        self.inner.binding.kind()
    }

    /// Returns the selection priority.
    #[inline]
    #[must_use]
    pub fn priority(&self) -> u32 {
        self.inner.binding.priority()
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> TransportState {
        self.inner.shared.lock().state
    }

    /// Returns `true` once the login was acknowledged.
    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.inner.shared.lock().logged_in
    }

    /// Bytes of binary frames sent but not yet acknowledged.
    #[must_use]
    pub fn inflight_bytes(&self) -> u64 {
        self.inner.shared.lock().inflight
    }

    /// Current reconnect delay.
    #[must_use]
    pub fn backoff(&self) -> Duration {
        self.inner.shared.lock().backoff.current()
    }

    /// Message and code of the last failure.
    #[must_use]
    pub fn last_error(&self) -> Option<(String, u32)> {
        self.inner.shared.lock().last_error.clone()
    }
}

// ============================================================================
// Transport - Control
// ============================================================================

impl Transport {
    /// Connects now, cancelling any pending reconnect.
    ///
    /// No-op while a link is already being opened or used, or after
    /// shutdown.
    pub fn start(&self) {
        let epoch = {
            let mut shared = self.inner.shared.lock();
            if shared.active || shared.closed {
                return;
            }
            shared.cancel_timers();
            shared.suspended = false;
            shared.active = true;
            shared.state = TransportState::Connecting;
            shared.epoch += 1;
            shared.epoch
        };

        debug!(transport = %self.inner.id, kind = self.kind(), epoch, "Transport starting");
        if let Some(session) = self.inner.session.upgrade() {
            session.update_local_state(|local| {
                local.connecting = true;
                local.reconnect_countdown = None;
            });
        }

        let transport = self.clone();
        let task = tokio::spawn(async move { transport.run(epoch).await });

        let mut shared = self.inner.shared.lock();
        if shared.epoch == epoch && shared.active {
            shared.link_task = Some(task);
        }
    }

    /// Drops the link and stays down until [`start`](Self::start).
    pub fn suspend(&self) {
        debug!(transport = %self.inner.id, "Transport suspended");
        self.teardown(TransportState::Suspended, false);
    }

    /// Drops the link for good.
    pub(crate) fn shutdown(&self) {
        self.teardown(TransportState::Idle, true);
    }

    /// Starts or stops the transport after its binding's enablement may
    /// have changed.
    pub(crate) fn refresh(&self, session: &Session) {
        let enabled = self.inner.binding.enabled(session);
        match self.state() {
            TransportState::Idle if enabled => self.start(),
            TransportState::Idle | TransportState::Suspended => {}
            _ if !enabled => {
                debug!(transport = %self.inner.id, "Binding disabled, stopping");
                self.teardown(TransportState::Idle, false);
            }
            _ => {}
        }
    }

    /// Sends the login if this transport is waiting for credentials.
    pub(crate) fn resend_login(&self, session: &Session) {
        let waiting = {
            let shared = self.inner.shared.lock();
            shared.awaiting_credentials && shared.outbound.is_some()
        };
        if waiting {
            self.login(session);
        }
    }

    fn teardown(&self, next: TransportState, close: bool) {
        {
            let mut shared = self.inner.shared.lock();
            shared.epoch += 1;
            shared.cancel_timers();
            if let Some(task) = shared.link_task.take() {
                task.abort();
            }
            shared.drop_link();
            shared.suspended = next == TransportState::Suspended;
            shared.closed |= close;
            shared.state = next;
        }

        if let Some(session) = self.inner.session.upgrade() {
            self.inner.binding.disconnect(&session);
            session.select_primary_connection();
            session.detach_subscriptions(self.inner.id);
        }
    }
}

// ============================================================================
// Transport - Sending
// ============================================================================

impl Transport {
    /// Writes a message to this transport's link.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionClosed`] if no link is open.
    pub fn send(&self, message: Outbound) -> Result<()> {
        self.deliver(message).map_err(|_| Error::ConnectionClosed)
    }

    /// Writes a message, handing it back if no link is open.
    pub(crate) fn deliver(&self, message: Outbound) -> std::result::Result<(), Outbound> {
        let payload = match &message {
            Outbound::Message(inner) => match inner.to_text() {
                Ok(text) => WirePayload::Text(text),
                Err(e) => {
                    warn!(op = inner.op(), error = %e, "Dropping unserializable message");
                    return Ok(());
                }
            },
            Outbound::Binary(bytes) => WirePayload::Binary(bytes.clone()),
        };

        let mut shared = self.inner.shared.lock();
        let Some(outbound) = shared.outbound.as_ref() else {
            return Err(message);
        };
        if outbound.send(payload).is_err() {
            return Err(message);
        }
        if let Outbound::Binary(bytes) = &message {
            shared.inflight = shared.inflight.saturating_add(bytes.len() as u64);
        }
        Ok(())
    }

    fn login(&self, session: &Session) {
        match session.login_request() {
            Some(login) => {
                self.inner.shared.lock().awaiting_credentials = false;
                trace!(transport = %self.inner.id, "Sending login");
                if let Err(e) = self.send(Message::Login(login).into()) {
                    debug!(transport = %self.inner.id, error = %e, "Login not sent");
                }
            }
            None => {
                self.inner.shared.lock().awaiting_credentials = true;
                debug!(transport = %self.inner.id, "No username configured, waiting for credentials");
                session.update_local_state(|local| local.auth_status = AuthStatus::NeedLogin);
            }
        }
    }
}

// ============================================================================
// Transport - Link Task
// ============================================================================

impl Transport {
    async fn run(self, epoch: u64) {
        let Some(session) = self.inner.session.upgrade() else {
            return;
        };

        if !self.inner.binding.enabled(&session) {
            debug!(transport = %self.inner.id, "Binding disabled, staying idle");
            let mut shared = self.inner.shared.lock();
            if shared.epoch == epoch {
                shared.active = false;
                shared.link_task = None;
                shared.state = TransportState::Idle;
            }
            return;
        }

        let link = match self.inner.binding.open(&session).await {
            Ok(link) => link,
            Err(e) => {
                drop(session);
                self.connection_failed(epoch, &e);
                return;
            }
        };
        let Link {
            outbound,
            mut inbound,
        } = link;

        {
            let mut shared = self.inner.shared.lock();
            if shared.epoch != epoch {
                return;
            }
            shared.outbound = Some(outbound);
            shared.inflight = 0;
            shared.state = TransportState::Authenticating;
        }

        debug!(transport = %self.inner.id, kind = self.kind(), "Link open");
        session.update_local_state(|local| {
            local.connecting = false;
            local.error_code = 0;
            local.error = None;
        });
        self.login(&session);
        drop(session);

        let failure = loop {
            match inbound.recv().await {
                Some(LinkEvent::Payload(payload)) => {
                    if let Err(e) = self.input(payload) {
                        break e;
                    }
                }
                Some(LinkEvent::Closed { reason, code }) => break Error::transport(reason, code),
                None => break Error::transport("link closed", code::LINK_CLOSED),
            }
        };
        self.connection_failed(epoch, &failure);
    }

    fn input(&self, payload: WirePayload) -> Result<()> {
        let Some(session) = self.inner.session.upgrade() else {
            return Err(Error::SessionClosed);
        };
        let logged_in = self.inner.shared.lock().logged_in;

        match payload {
            WirePayload::Binary(_) if !logged_in => {
                trace!(transport = %self.inner.id, "Binary input before login ignored");
            }
            WirePayload::Binary(data) => match Frame::decode(data) {
                Ok(Frame::Ack { bytes }) => {
                    let mut shared = self.inner.shared.lock();
                    shared.inflight = shared.inflight.saturating_sub(u64::from(bytes));
                }
                Ok(Frame::Chunk {
                    call_id,
                    last,
                    total_len,
                    payload,
                }) => {
                    session
                        .calls()
                        .accept_chunk(call_id, last, total_len, &payload);
                }
                Err(e) => warn!(transport = %self.inner.id, error = %e, "Dropping binary frame"),
            },
            WirePayload::Text(text) if !logged_in => return self.login_response(&session, &text),
            WirePayload::Text(text) => match Message::from_text(&text) {
                Ok(message) => self.dispatch(&session, message),
                Err(e) => warn!(transport = %self.inner.id, error = %e, "Dropping malformed message"),
            },
        }
        Ok(())
    }

    fn login_response(&self, session: &Session, text: &str) -> Result<()> {
        let response = match Message::from_text(text)? {
            Message::LoginResponse(response) => response,
            other => {
                return Err(Error::protocol(format!(
                    "expected loginresponse, got {}",
                    other.op()
                )));
            }
        };

        if let Some(error) = response.error {
            warn!(transport = %self.inner.id, error = %error, "Login rejected");
            session.update_local_state(|local| local.auth_status = AuthStatus::BadLogin);
            return Err(Error::login_rejected(error));
        }

        session.on_login(&response);
        {
            let mut shared = self.inner.shared.lock();
            shared.logged_in = true;
            shared.state = TransportState::Established;
            shared.backoff.reset();
            shared.last_error = None;
        }

        info!(transport = %self.inner.id, kind = self.kind(), "Transport established");
        session.select_primary_connection();
        session.restart_idle_transports();
        Ok(())
    }

    fn dispatch(&self, session: &Session, message: Message) {
        match message {
            Message::Rpc(request) => session.handle_incoming_rpc(self, request),
            Message::RpcReply(reply) => {
                session.calls().resolve(reply);
            }
            Message::RpcProgress(progress) => {
                session.calls().progress(progress);
            }
            Message::SetIceServers(update) => session.set_ice_servers(update.ice_servers),
            message @ (Message::AddItem(_)
            | Message::DelItem(_)
            | Message::MoveItem(_)
            | Message::UpdateField(_)
            | Message::SubSync(_)) => {
                if let Some(event) = message.into_mutation() {
                    session.route_mutation(self.inner.id, event);
                }
            }
            Message::Login(_) | Message::LoginResponse(_) => {
                trace!(transport = %self.inner.id, "Ignoring login message after login");
            }
            Message::Unknown => {
                trace!(transport = %self.inner.id, "Ignoring unknown message");
            }
        }
    }
}

// ============================================================================
// Transport - Failure & Reconnect
// ============================================================================

impl Transport {
    fn connection_failed(&self, epoch: u64, error: &Error) {
        let code = error.failure_code();
        let message = error.to_string();

        let suspended = {
            let mut shared = self.inner.shared.lock();
            if shared.epoch != epoch {
                return;
            }
            // Drop our own handle; this may be running inside the link task.
            shared.link_task = None;
            shared.cancel_timers();
            shared.drop_link();
            shared.last_error = Some((message.clone(), code));
            shared.state = if shared.suspended {
                TransportState::Suspended
            } else {
                TransportState::Idle
            };
            shared.suspended
        };

        warn!(transport = %self.inner.id, kind = self.kind(), code, error = %message, "Transport failed");

        let Some(session) = self.inner.session.upgrade() else {
            return;
        };

        if suspended {
            session.select_primary_connection();
            session.detach_subscriptions(self.inner.id);
            return;
        }

        let retry = self.inner.binding.disconnect(&session);
        session.update_local_state(|local| {
            local.connecting = false;
            local.error_code = code;
            local.error = Some(message);
        });
        session.select_primary_connection();
        session.detach_subscriptions(self.inner.id);

        if !retry || session.page_hidden() || session.is_closed() {
            debug!(transport = %self.inner.id, retry, "Not scheduling reconnect");
            return;
        }

        let mut shared = self.inner.shared.lock();
        if shared.epoch != epoch || shared.active || shared.closed {
            return;
        }
        let delay = shared.backoff.advance();
        shared.state = TransportState::BackingOff;
        shared.reconnect_timer = Some(self.arm_reconnect(epoch, delay));
        shared.countdown_timer = Some(self.arm_countdown(delay));
        debug!(transport = %self.inner.id, delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
    }

    fn arm_reconnect(&self, epoch: u64, delay: Duration) -> JoinHandle<()> {
        let transport = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut shared = transport.inner.shared.lock();
                if shared.epoch != epoch || shared.state != TransportState::BackingOff {
                    return;
                }
                // Detach rather than abort: this is the timer task.
                shared.reconnect_timer = None;
            }
            transport.start();
        })
    }

    fn arm_countdown(&self, delay: Duration) -> JoinHandle<()> {
        let handle = self.inner.session.clone();
        let tick = self.inner.countdown_tick;
        let deadline = Instant::now() + delay;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                let remaining = deadline.saturating_duration_since(Instant::now());
                let Some(session) = handle.upgrade() else {
                    return;
                };
                session.update_local_state(|local| local.reconnect_countdown = Some(remaining));
                if remaining.is_zero() {
                    return;
                }
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use bytes::Bytes;
    use serde_json::json;

    use crate::protocol::LoginResponse;
    use crate::session::RpcOptions;
    use crate::transport::testing::{MockBinding, init_tracing};

    fn session() -> Session {
        init_tracing();
        Session::builder()
            .credentials("alice", "secret")
            .build()
            .expect("session")
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_grows_then_resets_after_login() {
        let session = session();
        let (binding, remote) = MockBinding::new("relay", 50);
        remote.fail_next_open(Error::transport("refused", code::CONNECT_FAILED));
        remote.fail_next_open(Error::transport("refused", code::CONNECT_FAILED));
        let transport = session.add_transport(binding).expect("add");
        session.start();
        settle().await;

        assert_eq!(transport.state(), TransportState::BackingOff);
        let first = transport.backoff();
        assert!(first >= Duration::from_millis(1500) && first < Duration::from_millis(2000));
        assert_eq!(
            transport.last_error(),
            Some(("Transport error 1005: refused".to_string(), code::CONNECT_FAILED))
        );
        assert_eq!(session.local_state().error_code, code::CONNECT_FAILED);

        tokio::time::sleep(first).await;
        settle().await;
        assert_eq!(transport.state(), TransportState::BackingOff);
        assert!(transport.backoff() > first);

        let mut end = remote.accept().await;
        end.accept_login().await;
        settle().await;
        assert_eq!(transport.state(), TransportState::Established);
        assert_eq!(transport.backoff(), Duration::from_millis(1000));
        assert_eq!(remote.open_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_is_published() {
        let session = session();
        let (binding, remote) = MockBinding::new("relay", 50);
        remote.fail_next_open(Error::transport("refused", code::CONNECT_FAILED));
        session.add_transport(binding).expect("add");
        let mut local = session.watch_local_state();
        session.start();
        settle().await;

        tokio::time::sleep(Duration::from_millis(600)).await;
        settle().await;
        let remaining = local
            .borrow_and_update()
            .reconnect_countdown
            .expect("countdown");
        assert!(remaining < Duration::from_millis(2000));
        assert!(remaining > Duration::ZERO);
    }

    #[tokio::test]
    async fn test_no_retry_goes_idle() {
        let session = session();
        let (binding, remote) = MockBinding::new("direct", 100);
        remote.set_retry(false);
        let transport = session.add_transport(binding).expect("add");
        session.start();

        let mut end = remote.accept().await;
        end.accept_login().await;
        settle().await;
        end.close("ICE failed", code::LINK_FAILED);
        settle().await;

        assert_eq!(transport.state(), TransportState::Idle);
        assert!(!transport.is_logged_in());
        assert_eq!(session.local_state().error_code, code::LINK_FAILED);
    }

    #[tokio::test]
    async fn test_first_message_must_be_login_response() {
        let session = session();
        let (binding, remote) = MockBinding::new("relay", 50);
        let transport = session.add_transport(binding).expect("add");
        session.start();

        let mut end = remote.accept().await;
        assert!(matches!(end.recv_message().await, Message::Login(_)));
        end.send_text(r#"{"op":"rpcreply","rpcid":1,"result":null}"#);
        settle().await;

        assert_eq!(transport.state(), TransportState::BackingOff);
        assert_eq!(
            transport.last_error().map(|(_, code)| code),
            Some(code::PROTOCOL_VIOLATION)
        );
    }

    #[tokio::test]
    async fn test_binary_before_login_is_ignored() {
        let session = session();
        let (binding, remote) = MockBinding::new("relay", 50);
        let transport = session.add_transport(binding).expect("add");
        session.start();

        let mut end = remote.accept().await;
        end.send_binary(Bytes::from_static(b"\x09garbage"));
        settle().await;
        assert_eq!(transport.state(), TransportState::Authenticating);

        end.accept_login().await;
        settle().await;
        assert_eq!(transport.state(), TransportState::Established);
    }

    #[tokio::test]
    async fn test_inflight_tracks_acks() {
        let session = session();
        let (binding, remote) = MockBinding::new("relay", 50);
        let transport = session.add_transport(binding).expect("add");
        session.start();
        let mut end = remote.accept().await;
        end.accept_login().await;
        settle().await;

        transport
            .send(Outbound::Binary(Bytes::from(vec![0u8; 100])))
            .expect("send");
        assert_eq!(transport.inflight_bytes(), 100);
        assert_eq!(end.recv_binary().await.len(), 100);

        end.send_binary(Frame::Ack { bytes: 60 }.encode());
        settle().await;
        assert_eq!(transport.inflight_bytes(), 40);

        end.send_binary(Frame::Ack { bytes: 500 }.encode());
        settle().await;
        assert_eq!(transport.inflight_bytes(), 0);
    }

    #[tokio::test]
    async fn test_unknown_opcode_and_op_are_dropped() {
        let session = session();
        let (binding, remote) = MockBinding::new("relay", 50);
        let transport = session.add_transport(binding).expect("add");
        session.start();
        let mut end = remote.accept().await;
        end.accept_login().await;
        settle().await;

        end.send_binary(Bytes::from_static(b"\x09\0\0\0\x01"));
        end.send_text(r#"{"op":"somethingNew","x":1}"#);
        end.send_text("not json");
        settle().await;
        assert_eq!(transport.state(), TransportState::Established);
    }

    #[tokio::test]
    async fn test_progress_reaches_sink() {
        let session = session();
        let (binding, remote) = MockBinding::new("relay", 50);
        session.add_transport(binding).expect("add");
        session.start();
        let mut end = remote.accept().await;
        end.accept_login().await;
        settle().await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let caller = session.clone();
        let call = tokio::spawn(async move {
            let options = RpcOptions::new().on_progress(move |status, value| {
                let _ = tx.send((status.clone(), value.clone()));
            });
            caller.rpc("copy", json!({}), options).await
        });

        let rpcid = match end.recv_message().await {
            Message::Rpc(request) => request.rpcid.expect("rpcid"),
            other => panic!("unexpected message: {other:?}"),
        };
        end.send_text(&format!(
            r#"{{"op":"rpcprogress","rpcid":{rpcid},"status":"copying","value":50}}"#
        ));
        assert_eq!(rx.recv().await, Some((json!("copying"), json!(50))));

        end.send_text(&format!(r#"{{"op":"rpcreply","rpcid":{rpcid},"error":"disk full"}}"#));
        let err = call.await.expect("join").unwrap_err();
        assert!(err.is_remote());
        assert_eq!(transport_state(&session), TransportState::Established);
    }

    #[tokio::test]
    async fn test_set_ice_servers_message() {
        let session = session();
        let (binding, remote) = MockBinding::new("relay", 50);
        session.add_transport(binding).expect("add");
        session.start();
        let mut end = remote.accept().await;
        end.accept_login().await;
        settle().await;

        end.send_text(r#"{"op":"setIceServers","iceServers":[{"urls":"turn:t.example"}]}"#);
        settle().await;
        assert_eq!(session.ice_servers()[0].urls, vec!["turn:t.example".to_string()]);
    }

    #[tokio::test]
    async fn test_stale_link_after_restart_is_ignored() {
        let session = session();
        let (binding, remote) = MockBinding::new("relay", 50);
        let transport = session.add_transport(binding).expect("add");
        session.start();
        let old = remote.accept().await;

        transport.suspend();
        transport.start();
        let mut end = remote.accept().await;
        end.accept_login().await;
        settle().await;

        old.close("late", code::LINK_CLOSED);
        settle().await;
        assert_eq!(transport.state(), TransportState::Established);
    }

    #[tokio::test]
    async fn test_suspend_during_backoff() {
        let session = session();
        let (binding, remote) = MockBinding::new("relay", 50);
        remote.fail_next_open(Error::transport("refused", code::CONNECT_FAILED));
        let transport = session.add_transport(binding).expect("add");
        session.start();
        settle().await;
        assert_eq!(transport.state(), TransportState::BackingOff);

        transport.suspend();
        assert_eq!(transport.state(), TransportState::Suspended);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.state(), TransportState::Suspended);
    }

    #[tokio::test]
    async fn test_login_response_error_is_bad_login() {
        let session = session();
        let (binding, remote) = MockBinding::new("relay", 50);
        let transport = session.add_transport(binding).expect("add");
        session.start();

        let mut end = remote.accept().await;
        end.recv_message().await;
        end.send_message(&Message::LoginResponse(LoginResponse {
            error: Some("nope".into()),
            ..LoginResponse::default()
        }));
        settle().await;

        assert_eq!(
            transport.last_error().map(|(_, code)| code),
            Some(code::LOGIN_REJECTED)
        );
        assert!(!session.is_authenticated());
    }

    fn transport_state(session: &Session) -> TransportState {
        session.transports()[0].state()
    }
}

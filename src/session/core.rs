//! Session orchestrator.
//!
//! A [`Session`] owns every transport of one client, the outbound queue,
//! the call table and the subscription registry. Exactly one transport at
//! a time is the *primary*: all sends go through it. While there is no
//! primary, sends are queued and flushed in order once one is selected.
//!
//! # Lifecycle
//!
//! ```text
//! Session::builder()...build() ─► add_transport() ─► start() ─► shutdown()
//! ```
//!
//! Transports hold a [`SessionHandle`] (a weak reference) back to the
//! session, so dropping the last [`Session`] clone releases everything.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::{SubscriptionId, TransportId};
use crate::protocol::{
    IceServer, Login, LoginResponse, Message, MutationEvent, PROTOCOL_VERSION, RpcReply,
    RpcRequest, chunk_reply,
};
use crate::transport::{Outbound, Transport, TransportBinding, TransportState};

use super::builder::{RpcOptions, SessionBuilder, SessionConfig};
use super::calls::{CallTable, Reply};
use super::state::{AuthStatus, LocalState};
use super::subscription::{Subscription, SubscriptionRegistry};

// ============================================================================
// Types
// ============================================================================

/// Handler for calls initiated by the far end.
pub type MethodHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Reply>> + Send + Sync>;

#[derive(Debug, Default)]
struct Credentials {
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
}

struct SessionState {
    transports: Vec<Transport>,
    primary: Option<TransportId>,
    queue: VecDeque<Outbound>,
    page_hidden: bool,
    direct_enabled: bool,
    started: bool,
    closed: bool,
}

impl SessionState {
    fn transport(&self, id: TransportId) -> Option<&Transport> {
        self.transports.iter().find(|t| t.id() == id)
    }

    /// Highest priority transport matching `filter`; the first one wins ties.
    fn best(&self, filter: impl Fn(&Transport) -> bool) -> Option<&Transport> {
        self.transports
            .iter()
            .filter(|t| filter(t))
            .fold(None, |best: Option<&Transport>, t| match best {
                Some(b) if b.priority() >= t.priority() => Some(b),
                _ => Some(t),
            })
    }
}

pub(crate) struct SessionInner {
    config: SessionConfig,
    state: Mutex<SessionState>,
    calls: Arc<CallTable>,
    subscriptions: SubscriptionRegistry,
    methods: RwLock<FxHashMap<String, MethodHandler>>,
    credentials: RwLock<Credentials>,
    ice_servers: RwLock<Vec<IceServer>>,
    local_state: watch::Sender<LocalState>,
}

// ============================================================================
// SessionHandle
// ============================================================================

/// Non-owning reference from a transport back to its session.
#[derive(Clone)]
pub struct SessionHandle(Weak<SessionInner>);

impl SessionHandle {
    /// Returns the session if it is still alive.
    #[inline]
    #[must_use]
    pub fn upgrade(&self) -> Option<Session> {
        self.0.upgrade().map(|inner| Session { inner })
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("alive", &(self.0.strong_count() > 0))
            .finish()
    }
}

// ============================================================================
// Session
// ============================================================================

/// One client's connection to the far end.
///
/// Cheap to clone; all clones share state.
///
/// # Example
///
/// ```no_run
/// use viewshare::{RpcOptions, Session, WebSocketBinding};
///
/// # async fn example() -> viewshare::Result<()> {
/// let session = Session::builder().credentials("alice", "secret").build()?;
/// session.add_transport(WebSocketBinding::new("wss://relay.example/ws")?)?;
/// session.start();
///
/// let reply = session
///     .rpc("listScreens", serde_json::json!({}), RpcOptions::new())
///     .await?;
/// println!("{:?}", reply);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Session")
            .field("transports", &state.transports.len())
            .field("primary", &state.primary)
            .field("queued", &state.queue.len())
            .field("pending_calls", &self.inner.calls.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Session - Construction & Lifecycle
// ============================================================================

impl Session {
    /// Creates a builder for a new session.
    #[inline]
    #[must_use]
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    pub(crate) fn new(config: SessionConfig) -> Self {
        let credentials = Credentials {
            username: config.username.clone(),
            password: config.password.clone(),
            token: config.token.clone(),
        };
        let (local_state, _) = watch::channel(LocalState::default());

        Self {
            inner: Arc::new(SessionInner {
                state: Mutex::new(SessionState {
                    transports: Vec::new(),
                    primary: None,
                    queue: VecDeque::new(),
                    page_hidden: false,
                    direct_enabled: config.direct_enabled,
                    started: false,
                    closed: false,
                }),
                calls: CallTable::new(),
                subscriptions: SubscriptionRegistry::default(),
                methods: RwLock::new(FxHashMap::default()),
                credentials: RwLock::new(credentials),
                ice_servers: RwLock::new(config.ice_servers.clone()),
                local_state,
                config,
            }),
        }
    }

    /// Returns a weak handle to this session.
    #[inline]
    #[must_use]
    pub fn handle(&self) -> SessionHandle {
        SessionHandle(Arc::downgrade(&self.inner))
    }

    /// Adds a transport. It starts immediately if the session is running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] after [`shutdown`](Self::shutdown).
    pub fn add_transport<B: TransportBinding>(&self, binding: B) -> Result<Transport> {
        let transport = Transport::new(self.handle(), Arc::new(binding), &self.inner.config);

        let start = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(Error::SessionClosed);
            }
            state.transports.push(transport.clone());
            state.started
        };

        debug!(
            transport = %transport.id(),
            kind = transport.kind(),
            priority = transport.priority(),
            "Transport added"
        );

        if start {
            transport.start();
        }
        Ok(transport)
    }

    /// Returns all transports in insertion order.
    #[must_use]
    pub fn transports(&self) -> Vec<Transport> {
        self.inner.state.lock().transports.clone()
    }

    /// Returns the current primary transport.
    #[must_use]
    pub fn primary(&self) -> Option<Transport> {
        let state = self.inner.state.lock();
        state.primary.and_then(|id| state.transport(id).cloned())
    }

    /// Starts every transport.
    pub fn start(&self) {
        let transports = {
            let mut state = self.inner.state.lock();
            if state.closed || state.started {
                return;
            }
            state.started = true;
            state.transports.clone()
        };

        info!(transports = transports.len(), "Session starting");
        for transport in &transports {
            transport.start();
        }
    }

    /// Tears every transport down and rejects outstanding calls.
    ///
    /// Queued messages are discarded. Further sends fail with
    /// [`Error::SessionClosed`].
    pub fn shutdown(&self) {
        let transports = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.primary = None;
            state.queue.clear();
            std::mem::take(&mut state.transports)
        };

        for transport in &transports {
            transport.shutdown();
        }
        let rejected = self.inner.calls.reject_all(|| Error::SessionClosed);

        self.update_local_state(|local| {
            local.connecting = false;
            local.reconnect_countdown = None;
        });
        info!(rejected, "Session shut down");
    }

    /// Returns `true` after [`shutdown`](Self::shutdown).
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }
}

// ============================================================================
// Session - Sending & Calls
// ============================================================================

impl Session {
    /// Sends a message through the primary transport, or queues it.
    ///
    /// When nothing is connected, every suspended transport is woken up.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] after [`shutdown`](Self::shutdown).
    pub fn send(&self, message: impl Into<Outbound>) -> Result<()> {
        let mut message = message.into();

        let wake = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(Error::SessionClosed);
            }

            if let Some(primary) = state.primary.and_then(|id| state.transport(id)) {
                match primary.deliver(message) {
                    Ok(()) => return Ok(()),
                    Err(returned) => message = returned,
                }
            }

            state.queue.push_back(message);
            trace!(queued = state.queue.len(), "Message queued");

            // A peer link can only negotiate over another transport.
            state
                .transports
                .iter()
                .filter(|t| t.state() == TransportState::Suspended)
                .cloned()
                .collect::<Vec<_>>()
        };

        for transport in wake {
            debug!(transport = %transport.id(), "Waking suspended transport for queued send");
            transport.start();
        }
        Ok(())
    }

    /// Calls `method` on the far end and waits for the result.
    ///
    /// # Errors
    ///
    /// - [`Error::RemoteCall`] if the far end reports a failure
    /// - [`Error::CallTimeout`] if neither reply nor progress arrives in time
    /// - [`Error::SessionClosed`] if the session shuts down first
    pub async fn rpc(
        &self,
        method: impl Into<String>,
        args: Value,
        options: RpcOptions,
    ) -> Result<Reply> {
        if self.is_closed() {
            return Err(Error::SessionClosed);
        }

        let timeout = options.timeout.unwrap_or(self.inner.config.call_timeout);
        let (call_id, rx) = self.inner.calls.register(timeout, options.progress);
        let method = method.into();
        trace!(call_id = %call_id, method = %method, "Sending call");

        let request = Message::Rpc(RpcRequest {
            rpcid: Some(call_id),
            method,
            args,
        });
        if let Err(e) = self.send(request) {
            self.inner.calls.discard(call_id);
            return Err(e);
        }

        rx.await?
    }

    /// Calls `method` on the far end without expecting a reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`] after [`shutdown`](Self::shutdown).
    pub fn notify(&self, method: impl Into<String>, args: Value) -> Result<()> {
        self.send(Message::Rpc(RpcRequest {
            rpcid: None,
            method: method.into(),
            args,
        }))
    }

    /// Re-evaluates which transport is primary.
    ///
    /// Picks the highest-priority established transport. When the primary
    /// changes, queued messages are flushed to the new one in order and
    /// unbound subscriptions are bound to it.
    pub fn select_primary_connection(&self) {
        let selected = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;

            let best = state
                .best(|t| t.state() == TransportState::Established)
                .cloned();
            let best_id = best.as_ref().map(Transport::id);
            if best_id == state.primary {
                return;
            }
            state.primary = best_id;

            if let Some(transport) = &best {
                let mut flushed = 0usize;
                while let Some(message) = state.queue.pop_front() {
                    if let Err(returned) = transport.deliver(message) {
                        state.queue.push_front(returned);
                        break;
                    }
                    flushed += 1;
                }
                debug!(
                    transport = %transport.id(),
                    kind = transport.kind(),
                    flushed,
                    "Primary connection selected"
                );
            } else {
                debug!("No primary connection");
            }
            best_id
        };

        if let Some(id) = selected {
            self.inner.subscriptions.bind_unbound(id);
        }
    }

    /// Number of messages waiting for a primary.
    #[must_use]
    pub fn queued_len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Number of outstanding calls.
    #[must_use]
    pub fn pending_calls(&self) -> usize {
        self.inner.calls.len()
    }

    /// Returns `true` if the call is outstanding.
    #[must_use]
    pub fn has_pending_call(&self, call_id: crate::identifiers::CallId) -> bool {
        self.inner.calls.contains(call_id)
    }
}

// ============================================================================
// Session - Methods & Subscriptions
// ============================================================================

impl Session {
    /// Registers a handler for calls the far end makes to this client.
    ///
    /// Replaces any handler previously registered under `name`.
    pub fn register_method<F, Fut>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply>> + Send + 'static,
    {
        let handler: MethodHandler = Arc::new(move |args| handler(args).boxed());
        self.inner.methods.write().insert(name.into(), handler);
    }

    /// Removes a method handler.
    pub fn unregister_method(&self, name: &str) -> bool {
        self.inner.methods.write().remove(name).is_some()
    }

    /// Registers a subscription, bound to the current primary if any.
    pub fn subscribe(&self, id: impl Into<SubscriptionId>, subscription: Arc<dyn Subscription>) {
        let bound = self.inner.state.lock().primary;
        self.inner
            .subscriptions
            .insert(id.into(), subscription, bound);
    }

    /// Removes a subscription.
    pub fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        self.inner.subscriptions.remove(id)
    }

    /// Transport feeding a subscription.
    #[must_use]
    pub fn subscription_transport(&self, id: &SubscriptionId) -> Option<TransportId> {
        self.inner.subscriptions.bound_to(id)
    }

    pub(crate) fn route_mutation(&self, source: TransportId, event: MutationEvent) -> bool {
        self.inner.subscriptions.route(source, event)
    }

    pub(crate) fn detach_subscriptions(&self, transport: TransportId) {
        let detached = self.inner.subscriptions.detach(transport);
        if detached > 0 {
            debug!(transport = %transport, detached, "Subscriptions detached");
        }
    }

    /// Runs the handler for an incoming call and replies on `transport`.
    pub(crate) fn handle_incoming_rpc(&self, transport: &Transport, request: RpcRequest) {
        let handler = self.inner.methods.read().get(&request.method).cloned();

        let Some(handler) = handler else {
            let err = Error::unknown_method(&request.method);
            warn!(method = %request.method, "Incoming call for unknown method");
            if let Some(rpcid) = request.rpcid {
                let reply = Message::RpcReply(RpcReply::failure(rpcid, err.to_string()));
                if let Err(e) = transport.send(reply.into()) {
                    debug!(error = %e, "Could not report unknown method");
                }
            }
            return;
        };

        let transport = transport.clone();
        tokio::spawn(async move {
            let outcome = handler(request.args).await;
            let Some(rpcid) = request.rpcid else {
                return;
            };

            let sent = match outcome {
                Ok(Reply::Binary(bytes)) => chunk_reply(rpcid, &bytes).and_then(|frames| {
                    frames
                        .into_iter()
                        .try_for_each(|frame| transport.send(Outbound::Binary(frame)))
                }),
                Ok(Reply::Value(value)) => {
                    transport.send(Message::RpcReply(RpcReply::success(rpcid, value)).into())
                }
                Err(e) => {
                    transport.send(Message::RpcReply(RpcReply::failure(rpcid, e.to_string())).into())
                }
            };

            if let Err(e) = sent {
                debug!(call_id = %rpcid, error = %e, "Reply not delivered");
            }
        });
    }

    pub(crate) fn calls(&self) -> &Arc<CallTable> {
        &self.inner.calls
    }
}

// ============================================================================
// Session - Credentials & Login
// ============================================================================

impl Session {
    /// Replaces the login credentials.
    ///
    /// Transports waiting for credentials send their login right away.
    pub fn set_credentials(&self, username: impl Into<String>, password: impl Into<String>) {
        {
            let mut credentials = self.inner.credentials.write();
            credentials.username = Some(username.into());
            credentials.password = Some(password.into());
        }

        for transport in self.transports() {
            if transport.state() == TransportState::Authenticating {
                transport.resend_login(self);
            }
        }
    }

    /// Token issued by the last successful login.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.inner.credentials.read().token.clone()
    }

    /// Builds the login request, or `None` when no username is set.
    pub(crate) fn login_request(&self) -> Option<Login> {
        let credentials = self.inner.credentials.read();
        credentials.username.as_ref()?;
        Some(Login {
            version: PROTOCOL_VERSION,
            username: credentials.username.clone(),
            password: credentials.password.clone(),
            token: credentials.token.clone(),
        })
    }

    /// Applies a successful login acknowledgment.
    pub(crate) fn on_login(&self, response: &LoginResponse) {
        if let Some(token) = &response.token {
            self.inner.credentials.write().token = Some(token.clone());
        }
        if let Some(servers) = &response.ice_servers {
            self.set_ice_servers(servers.clone());
        }

        let my_id = response.peer_id();
        self.update_local_state(|local| {
            local.auth_status = AuthStatus::LoggedIn;
            if my_id.is_some() {
                local.my_id = my_id;
            }
        });
    }

    /// Returns `true` if any transport is logged in.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner
            .state
            .lock()
            .transports
            .iter()
            .any(Transport::is_logged_in)
    }

    /// ICE servers for new peer links.
    #[must_use]
    pub fn ice_servers(&self) -> Vec<IceServer> {
        self.inner.ice_servers.read().clone()
    }

    /// Replaces the ICE servers used for new peer links.
    pub fn set_ice_servers(&self, servers: Vec<IceServer>) {
        debug!(count = servers.len(), "ICE servers updated");
        *self.inner.ice_servers.write() = servers;
    }
}

// ============================================================================
// Session - Visibility, Suspension & Direct Mode
// ============================================================================

impl Session {
    /// Marks the page hidden or visible.
    ///
    /// Hidden clients schedule no reconnects. Becoming visible restarts
    /// idle transports.
    pub fn set_page_hidden(&self, hidden: bool) {
        let was_hidden = std::mem::replace(&mut self.inner.state.lock().page_hidden, hidden);
        if was_hidden && !hidden {
            self.restart_idle_transports();
        }
    }

    /// Starts transports that are down without a pending reconnect.
    ///
    /// Runs when the page becomes visible and after every successful
    /// login, so a transport that needed another one logged in gets
    /// another chance.
    pub(crate) fn restart_idle_transports(&self) {
        let idle: Vec<_> = {
            let state = self.inner.state.lock();
            if !state.started || state.closed || state.page_hidden {
                return;
            }
            state
                .transports
                .iter()
                .filter(|t| t.state() == TransportState::Idle)
                .cloned()
                .collect()
        };

        for transport in idle {
            transport.start();
        }
    }

    /// Returns `true` while the page is hidden.
    #[must_use]
    pub fn page_hidden(&self) -> bool {
        self.inner.state.lock().page_hidden
    }

    /// Suspends every transport. Nothing reconnects until resumed or a
    /// send needs a link.
    pub fn suspend(&self) {
        for transport in self.transports() {
            transport.suspend();
        }
    }

    /// Restarts every transport that is not connected.
    pub fn resume(&self) {
        if self.is_closed() {
            return;
        }
        for transport in self.transports() {
            transport.start();
        }
    }

    /// Enables or disables direct peer links.
    pub fn set_direct_enabled(&self, enabled: bool) {
        let (transports, started) = {
            let mut state = self.inner.state.lock();
            if state.direct_enabled == enabled {
                return;
            }
            state.direct_enabled = enabled;
            (state.transports.clone(), state.started && !state.closed)
        };

        debug!(enabled, "Direct mode changed");
        if !started {
            return;
        }
        for transport in transports {
            transport.refresh(self);
        }
    }

    /// Returns `true` if direct peer links are allowed.
    #[must_use]
    pub fn direct_enabled(&self) -> bool {
        self.inner.state.lock().direct_enabled
    }
}

// ============================================================================
// Session - Observers
// ============================================================================

impl Session {
    /// Subscribes to local state changes.
    #[must_use]
    pub fn watch_local_state(&self) -> watch::Receiver<LocalState> {
        self.inner.local_state.subscribe()
    }

    /// Returns a snapshot of the local state.
    #[must_use]
    pub fn local_state(&self) -> LocalState {
        self.inner.local_state.borrow().clone()
    }

    pub(crate) fn update_local_state(&self, modify: impl FnOnce(&mut LocalState)) {
        self.inner.local_state.send_modify(modify);
    }
}

// ============================================================================
// Tests
// ============================================================================

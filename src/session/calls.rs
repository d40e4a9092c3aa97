//! Table of outstanding calls.
//!
//! Each entry is terminated by exactly one of: a terminal reply, a remote
//! error, its own timeout, or session shutdown. Transports feed replies,
//! progress and binary chunks in; they never insert or remove entries
//! themselves.
//!
//! Timeouts are per-call timer tasks. Progress re-arms the timer; a
//! generation counter keeps a timer that already fired from expiring a
//! re-armed call.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::CallId;
use crate::protocol::{Reassembly, RpcProgress, RpcReply};

// ============================================================================
// Constants
// ============================================================================

/// Default time a call may go without a reply or progress.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// Types
// ============================================================================

/// Progress callback, invoked with `(status, value)`.
pub type ProgressSink = Arc<dyn Fn(&Value, &Value) + Send + Sync>;

/// Result of a successful call.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Structured result from `rpcreply`.
    Value(Value),
    /// Reassembled binary reply.
    Binary(Bytes),
}

impl Reply {
    /// Returns the structured result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] for a binary reply.
    pub fn into_value(self) -> Result<Value> {
        match self {
            Self::Value(value) => Ok(value),
            Self::Binary(_) => Err(Error::protocol("expected structured reply, got binary")),
        }
    }

    /// Returns the binary result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProtocolViolation`] for a structured reply.
    pub fn into_binary(self) -> Result<Bytes> {
        match self {
            Self::Binary(bytes) => Ok(bytes),
            Self::Value(_) => Err(Error::protocol("expected binary reply, got structured")),
        }
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Bytes> for Reply {
    fn from(bytes: Bytes) -> Self {
        Self::Binary(bytes)
    }
}

// ============================================================================
// PendingCall
// ============================================================================

struct PendingCall {
    continuation: oneshot::Sender<Result<Reply>>,
    timeout: Duration,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    assembly: Option<Reassembly>,
    progress: Option<ProgressSink>,
}

impl PendingCall {
    fn finish(mut self, outcome: Result<Reply>) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        // The caller may have given up on the future already.
        let _ = self.continuation.send(outcome);
    }
}

// ============================================================================
// CallTable
// ============================================================================

/// Outstanding calls keyed by [`CallId`].
pub(crate) struct CallTable {
    inner: Mutex<CallTableInner>,
}

struct CallTableInner {
    pending: FxHashMap<CallId, PendingCall>,
    next_id: u32,
    generation: u64,
}

impl fmt::Debug for CallTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallTable")
            .field("pending", &self.len())
            .finish_non_exhaustive()
    }
}

impl CallTable {
    /// Creates an empty table.
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(CallTableInner {
                pending: FxHashMap::default(),
                next_id: 1,
                generation: 0,
            }),
        })
    }

    /// Allocates an id, inserts the call and arms its timer.
    pub(crate) fn register(
        self: &Arc<Self>,
        timeout: Duration,
        progress: Option<ProgressSink>,
    ) -> (CallId, oneshot::Receiver<Result<Reply>>) {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();

        let id = loop {
            let candidate = CallId::new(inner.next_id);
            inner.next_id = inner.next_id.wrapping_add(1).max(1);
            if !inner.pending.contains_key(&candidate) {
                break candidate;
            }
        };

        inner.generation += 1;
        let generation = inner.generation;
        let timer = self.arm(id, generation, timeout);
        inner.pending.insert(
            id,
            PendingCall {
                continuation: tx,
                timeout,
                generation,
                timer: Some(timer),
                assembly: None,
                progress,
            },
        );

        trace!(call_id = %id, pending = inner.pending.len(), "Call registered");
        (id, rx)
    }

    fn arm(self: &Arc<Self>, id: CallId, generation: u64, timeout: Duration) -> JoinHandle<()> {
        let table = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            table.expire(id, generation);
        })
    }

    fn expire(&self, id: CallId, generation: u64) {
        let call = {
            let mut inner = self.inner.lock();
            match inner.pending.get(&id) {
                Some(call) if call.generation == generation => inner.pending.remove(&id),
                _ => None,
            }
        };

        if let Some(mut call) = call {
            let timeout_ms = call.timeout.as_millis() as u64;
            debug!(call_id = %id, timeout_ms, "Call timed out");
            // This task is the timer; nothing to abort.
            call.timer = None;
            call.finish(Err(Error::call_timeout(id, timeout_ms)));
        }
    }

    /// Terminates a call with a structured reply.
    ///
    /// Returns `false` if the id is unknown.
    pub(crate) fn resolve(&self, reply: RpcReply) -> bool {
        let Some(call) = self.inner.lock().pending.remove(&reply.rpcid) else {
            trace!(call_id = %reply.rpcid, "Reply for unknown call");
            return false;
        };

        let outcome = match reply.error {
            Some(message) => Err(Error::remote(message)),
            None => Ok(Reply::Value(reply.result.unwrap_or(Value::Null))),
        };
        call.finish(outcome);
        true
    }

    /// Re-arms the timer of a call and reports progress to its sink.
    ///
    /// Returns `false` if the id is unknown.
    pub(crate) fn progress(self: &Arc<Self>, progress: RpcProgress) -> bool {
        let sink = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            let generation = inner.generation;
            let Some(call) = inner.pending.get_mut(&progress.rpcid) else {
                trace!(call_id = %progress.rpcid, "Progress for unknown call");
                return false;
            };

            if let Some(timer) = call.timer.take() {
                timer.abort();
            }
            call.generation = generation;
            call.timer = Some(self.arm(progress.rpcid, generation, call.timeout));
            call.progress.clone()
        };

        if let Some(sink) = sink {
            sink(&progress.status, &progress.value);
        }
        true
    }

    /// Copies one binary chunk into its call's reassembly buffer.
    ///
    /// The final chunk terminates the call. Returns `false` if the id is
    /// unknown.
    pub(crate) fn accept_chunk(
        &self,
        id: CallId,
        last: bool,
        total_len: u32,
        payload: &[u8],
    ) -> bool {
        let finished = {
            let mut inner = self.inner.lock();
            let Some(call) = inner.pending.get_mut(&id) else {
                trace!(call_id = %id, "Chunk for unknown call");
                return false;
            };

            let assembly = call
                .assembly
                .get_or_insert_with(|| Reassembly::new(total_len));
            match assembly.push(payload) {
                Ok(()) if !last => None,
                Ok(()) => inner.pending.remove(&id).map(|mut call| {
                    let outcome = match call.assembly.take() {
                        Some(assembly) => assembly.finish().map(Reply::Binary),
                        None => Ok(Reply::Binary(Bytes::new())),
                    };
                    if let Err(e) = &outcome {
                        warn!(call_id = %id, error = %e, "Dropping call with truncated reply");
                    }
                    (call, outcome)
                }),
                Err(e) => {
                    warn!(call_id = %id, error = %e, "Dropping call with malformed reply");
                    inner.pending.remove(&id).map(|call| (call, Err(e)))
                }
            }
        };

        if let Some((call, outcome)) = finished {
            call.finish(outcome);
        }
        true
    }

    /// Terminates every outstanding call with the error built by `make_err`.
    pub(crate) fn reject_all(&self, make_err: impl Fn() -> Error) -> usize {
        let pending: Vec<_> = self.inner.lock().pending.drain().collect();
        let count = pending.len();

        for (_, call) in pending {
            call.finish(Err(make_err()));
        }

        if count > 0 {
            debug!(count, "Rejected pending calls");
        }
        count
    }

    /// Drops a call whose request never left, without completing it.
    pub(crate) fn discard(&self, id: CallId) -> bool {
        let call = self.inner.lock().pending.remove(&id);
        match call {
            Some(mut call) => {
                if let Some(timer) = call.timer.take() {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Number of outstanding calls.
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Returns `true` if the call is outstanding.
    pub(crate) fn contains(&self, id: CallId) -> bool {
        self.inner.lock().pending.contains_key(&id)
    }

    #[cfg(test)]
    pub(crate) fn set_next_id(&self, id: u32) {
        self.inner.lock().next_id = id;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    #[tokio::test]
    async fn test_resolve_success() {
        let table = CallTable::new();
        let (id, rx) = table.register(DEFAULT_CALL_TIMEOUT, None);

        assert!(table.resolve(RpcReply::success(id, json!({"ok": true}))));
        let reply = rx.await.expect("continuation").expect("success");
        assert_eq!(reply, Reply::Value(json!({"ok": true})));
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn test_resolve_remote_error() {
        let table = CallTable::new();
        let (id, rx) = table.register(DEFAULT_CALL_TIMEOUT, None);

        table.resolve(RpcReply::failure(id, "device offline"));
        let err = rx.await.expect("continuation").unwrap_err();
        assert!(err.is_remote());
        assert_eq!(err.to_string(), "Remote: device offline");
    }

    #[tokio::test]
    async fn test_unknown_ids_are_ignored() {
        let table = CallTable::new();
        assert!(!table.resolve(RpcReply::success(CallId::new(99), Value::Null)));
        assert!(!table.accept_chunk(CallId::new(99), true, 1, b"x"));
        assert!(!table.progress(RpcProgress {
            rpcid: CallId::new(99),
            status: Value::Null,
            value: Value::Null,
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_leaves_no_entry() {
        let table = CallTable::new();
        let (id, rx) = table.register(Duration::from_millis(500), None);

        let err = rx.await.expect("continuation").unwrap_err();
        assert!(err.is_timeout());
        assert!(matches!(err, Error::CallTimeout { call_id, timeout_ms: 500 } if call_id == id));
        assert!(!table.contains(id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_rearms_timeout() {
        let table = CallTable::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let sink_seen = Arc::clone(&seen);
        let sink: ProgressSink = Arc::new(move |status, value| {
            assert_eq!(status, &json!("copying"));
            assert!(value.is_number());
            sink_seen.fetch_add(1, Ordering::SeqCst);
        });
        let (id, mut rx) = table.register(Duration::from_secs(10), Some(sink));

        for step in 0..3 {
            tokio::time::sleep(Duration::from_secs(8)).await;
            assert!(table.progress(RpcProgress {
                rpcid: id,
                status: json!("copying"),
                value: json!(step),
            }));
        }

        // 24s elapsed, well past the original deadline.
        assert!(table.contains(id));
        assert!(rx.try_recv().is_err());
        assert_eq!(seen.load(Ordering::SeqCst), 3);

        table.resolve(RpcReply::success(id, json!("done")));
        assert_eq!(
            rx.await.expect("continuation").expect("success"),
            Reply::Value(json!("done"))
        );
    }

    #[tokio::test]
    async fn test_chunks_assemble_in_order() {
        let table = CallTable::new();
        let (id, rx) = table.register(DEFAULT_CALL_TIMEOUT, None);

        assert!(table.accept_chunk(id, false, 6, b"abc"));
        assert!(table.contains(id));
        assert!(table.accept_chunk(id, true, 6, b"def"));

        let reply = rx.await.expect("continuation").expect("success");
        assert_eq!(reply, Reply::Binary(Bytes::from_static(b"abcdef")));
        assert!(!table.contains(id));
    }

    #[tokio::test]
    async fn test_overrunning_chunk_rejects_call() {
        let table = CallTable::new();
        let (id, rx) = table.register(DEFAULT_CALL_TIMEOUT, None);

        table.accept_chunk(id, false, 2, b"abc");
        let err = rx.await.expect("continuation").unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { .. }));
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn test_truncated_final_chunk_rejects_call() {
        let table = CallTable::new();
        let (id, rx) = table.register(DEFAULT_CALL_TIMEOUT, None);

        assert!(table.accept_chunk(id, true, u32::MAX, b"abc"));
        let err = rx.await.expect("continuation").unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation { .. }));
        assert!(!table.contains(id));
    }

    #[tokio::test]
    async fn test_ids_skip_outstanding_calls() {
        let table = CallTable::new();
        table.set_next_id(5);
        let (first, _rx1) = table.register(DEFAULT_CALL_TIMEOUT, None);
        table.set_next_id(5);
        let (second, _rx2) = table.register(DEFAULT_CALL_TIMEOUT, None);

        assert_eq!(first, CallId::new(5));
        assert_eq!(second, CallId::new(6));
    }

    #[tokio::test]
    async fn test_reject_all() {
        let table = CallTable::new();
        let (_, rx1) = table.register(DEFAULT_CALL_TIMEOUT, None);
        let (_, rx2) = table.register(DEFAULT_CALL_TIMEOUT, None);

        assert_eq!(table.reject_all(|| Error::SessionClosed), 2);
        assert!(matches!(rx1.await, Ok(Err(Error::SessionClosed))));
        assert!(matches!(rx2.await, Ok(Err(Error::SessionClosed))));
    }

    #[test]
    fn test_reply_accessors() {
        assert!(Reply::Value(json!(1)).into_binary().is_err());
        assert_eq!(
            Reply::Binary(Bytes::from_static(b"x"))
                .into_binary()
                .expect("binary"),
            Bytes::from_static(b"x")
        );
    }
}

//! Subscription registry.
//!
//! The session only routes mutation events by id and tells each
//! subscription which transport currently feeds it. What a subscription
//! does with the events is its own business.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

use crate::identifiers::{SubscriptionId, TransportId};
use crate::protocol::MutationEvent;

// ============================================================================
// Subscription
// ============================================================================

/// Receiver of ordered mutation events for one resource.
pub trait Subscription: Send + Sync {
    /// Handles one mutation.
    fn input(&self, event: MutationEvent);

    /// Called when the feeding transport changes; `None` means the
    /// subscription lost its transport and must resync once rebound.
    fn set_connection(&self, _transport: Option<TransportId>) {}
}

// ============================================================================
// Registry
// ============================================================================

struct Entry {
    subscription: Arc<dyn Subscription>,
    bound: Option<TransportId>,
}

/// Subscriptions keyed by id, with the transport each one is bound to.
#[derive(Default)]
pub(crate) struct SubscriptionRegistry {
    entries: RwLock<FxHashMap<SubscriptionId, Entry>>,
}

impl SubscriptionRegistry {
    /// Registers or replaces a subscription.
    pub(crate) fn insert(
        &self,
        id: SubscriptionId,
        subscription: Arc<dyn Subscription>,
        bound: Option<TransportId>,
    ) {
        self.entries.write().insert(
            id,
            Entry {
                subscription: Arc::clone(&subscription),
                bound,
            },
        );
        subscription.set_connection(bound);
    }

    /// Removes a subscription. Returns `false` if it was not registered.
    pub(crate) fn remove(&self, id: &SubscriptionId) -> bool {
        self.entries.write().remove(id).is_some()
    }

    /// Delivers an event that arrived on `source`.
    ///
    /// Only the transport a subscription is bound to feeds it; events from
    /// any other transport and for unknown ids are dropped.
    pub(crate) fn route(&self, source: TransportId, event: MutationEvent) -> bool {
        let subscription = match self.entries.read().get(&event.subid) {
            Some(entry) if entry.bound == Some(source) => Arc::clone(&entry.subscription),
            Some(entry) => {
                trace!(
                    subid = %event.subid,
                    source = %source,
                    bound = ?entry.bound,
                    "Mutation from unbound transport"
                );
                return false;
            }
            None => {
                trace!(subid = %event.subid, "Mutation for unknown subscription");
                return false;
            }
        };

        subscription.input(event);
        true
    }

    /// Unbinds every subscription fed by `transport`.
    pub(crate) fn detach(&self, transport: TransportId) -> usize {
        self.rebind(|bound| *bound == Some(transport), None)
    }

    /// Binds every unbound subscription to `transport`.
    pub(crate) fn bind_unbound(&self, transport: TransportId) -> usize {
        self.rebind(Option::is_none, Some(transport))
    }

    fn rebind(
        &self,
        select: impl Fn(&Option<TransportId>) -> bool,
        target: Option<TransportId>,
    ) -> usize {
        let changed: Vec<_> = {
            let mut entries = self.entries.write();
            entries
                .values_mut()
                .filter(|entry| select(&entry.bound))
                .map(|entry| {
                    entry.bound = target;
                    Arc::clone(&entry.subscription)
                })
                .collect()
        };

        for subscription in &changed {
            subscription.set_connection(target);
        }
        changed.len()
    }

    /// Transport a subscription is bound to.
    pub(crate) fn bound_to(&self, id: &SubscriptionId) -> Option<TransportId> {
        self.entries.read().get(id).and_then(|entry| entry.bound)
    }
}

// ============================================================================
// Tests
// ============================================================================

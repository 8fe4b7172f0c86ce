//! Runtime Event Delivery
//!
//! Observer registration with synchronous, in-order multicast delivery.
//! Each runtime component (sandbox, hot reload, update manager) owns one
//! `ObserverSet` per event kind it raises.

use std::sync::Arc;
use parking_lot::Mutex;

/// Observer callback for events of type `E`
pub type Observer<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Token returned by [`ObserverSet::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionToken(u64);

/// A registered observer list for one event kind
///
/// Delivery is synchronous and in registration order. Observers must not
/// block; long-running reactions belong on a task of their own.
pub struct ObserverSet<E> {
    observers: Mutex<Vec<(u64, Observer<E>)>>,
    next_token: Mutex<u64>,
}

impl<E> ObserverSet<E> {
    /// Create an empty observer set
    pub fn new() -> Self {
        Self {
            observers: Mutex::new(Vec::new()),
            next_token: Mutex::new(0),
        }
    }

    /// Register an observer; returns a token for later removal
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionToken
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let mut next = self.next_token.lock();
        let token = *next;
        *next += 1;
        drop(next);

        self.observers.lock().push((token, Arc::new(observer)));
        SubscriptionToken(token)
    }

    /// Remove a previously registered observer
    ///
    /// Returns true if the token matched a live subscription.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(id, _)| *id != token.0);
        observers.len() != before
    }

    /// Deliver an event to every observer, in registration order
    pub fn emit(&self, event: &E) {
        // Snapshot under the lock so an observer may (un)subscribe reentrantly.
        let snapshot: Vec<Observer<E>> = self
            .observers
            .lock()
            .iter()
            .map(|(_, obs)| Arc::clone(obs))
            .collect();

        for observer in snapshot {
            observer(event);
        }
    }

    /// Number of registered observers
    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }
}

impl<E> Default for ObserverSet<E> {
    fn default() -> Self {
        Self::new()
    }
}

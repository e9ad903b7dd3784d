// cartos_core/src/provider.rs

use crate::messages::{Observation, ObservationHandle};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// The single-argument callback a data provider invokes for every observation.
pub type ObservationCallback = Arc<dyn Fn(&ObservationHandle) + Send + Sync>;

type SubscriberList = RwLock<Vec<(u64, ObservationCallback)>>;

// =========================================================================
// == Data Provider ==
// =========================================================================

/// A named source of observations. Subscribers are called synchronously on
/// whichever thread calls `publish`.
pub struct DataProvider {
    name: String,
    subscribers: Arc<SubscriberList>,
    next_id: AtomicU64,
    published: AtomicU64,
}

impl DataProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            next_id: AtomicU64::new(0),
            published: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers `callback`. It stays registered until the returned
    /// `Connection` is dropped.
    pub fn connect<F>(&self, callback: F) -> Connection
    where
        F: Fn(&ObservationHandle) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.write().push((id, Arc::new(callback)));
        Connection {
            id,
            provider: self.name.clone(),
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Wraps `observation` in a handle and delivers it. Returns the number of
    /// subscribers that were called.
    pub fn publish(&self, observation: Observation) -> usize {
        self.publish_handle(&observation.into_handle())
    }

    pub fn publish_handle(&self, observation: &ObservationHandle) -> usize {
        // Snapshot the list so callbacks run without holding the lock.
        let callbacks: Vec<ObservationCallback> = self
            .subscribers
            .read()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in &callbacks {
            callback(observation);
        }
        self.published.fetch_add(1, Ordering::Relaxed);
        callbacks.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for DataProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataProvider")
            .field("name", &self.name)
            .field("subscribers", &self.subscriber_count())
            .field("published", &self.published_count())
            .finish()
    }
}

/// Keeps a callback registered with a `DataProvider`. Dropping it disconnects.
#[must_use = "dropping a Connection disconnects its callback immediately"]
pub struct Connection {
    id: u64,
    provider: String,
    subscribers: Weak<SubscriberList>,
}

impl Connection {
    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn is_connected(&self) -> bool {
        self.subscribers
            .upgrade()
            .map_or(false, |subs| subs.read().iter().any(|(id, _)| *id == self.id))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.write().retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .finish()
    }
}

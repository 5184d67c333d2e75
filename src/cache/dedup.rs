//! Collapse concurrent identical requests into one

use std::future::Future;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::debug;

use crate::error::StandardError;

type Pending<V> = Shared<BoxFuture<'static, Result<V, StandardError>>>;

/// In-flight request map keyed like the TTL cache.
/// Clones share the same map.
pub struct RequestDeduplicator<V: Clone> {
    pending: Arc<DashMap<String, Pending<V>>>,
}

impl<V: Clone> Clone for RequestDeduplicator<V> {
    fn clone(&self) -> Self {
        Self {
            pending: self.pending.clone(),
        }
    }
}

impl<V> Default for RequestDeduplicator<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> RequestDeduplicator<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
        }
    }

    /// Run `call` unless a call with the same key is already in flight,
    /// in which case wait for that one and share its result.
    pub async fn run<F, Fut>(&self, key: &str, call: F) -> Result<V, StandardError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, StandardError>> + Send + 'static,
    {
        let (shared, owner) = match self.pending.entry(key.to_string()) {
            Entry::Occupied(existing) => {
                debug!(key, "Joining in-flight request");
                (existing.get().clone(), false)
            }
            Entry::Vacant(slot) => {
                let shared = call().boxed().shared();
                slot.insert(shared.clone());
                (shared, true)
            }
        };

        // Removes the entry even if the owning caller is cancelled mid-flight
        let _cleanup = owner.then(|| Cleanup {
            pending: &self.pending,
            key,
            shared: shared.clone(),
        });

        shared.await
    }

    /// Stop handing out in-flight requests whose key contains `pattern`
    /// (all of them when `None`). Callers already waiting keep their result;
    /// later callers start a fresh request.
    pub fn forget(&self, pattern: Option<&str>) -> usize {
        let before = self.pending.len();
        match pattern {
            Some(pattern) => self.pending.retain(|key, _| !key.contains(pattern)),
            None => self.pending.clear(),
        }
        before.saturating_sub(self.pending.len())
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}

struct Cleanup<'a, V: Clone> {
    pending: &'a DashMap<String, Pending<V>>,
    key: &'a str,
    shared: Pending<V>,
}

impl<V: Clone> Drop for Cleanup<'_, V> {
    fn drop(&mut self) {
        // A newer request may own the key after `forget`
        self.pending
            .remove_if(self.key, |_, pending| pending.ptr_eq(&self.shared));
    }
}

//! Keyed single-flight initialization.
//!
//! Concurrent callers asking for the same not-yet-ready key share one
//! in-flight initialization and all observe its result. A failed
//! initialization is forgotten so the next caller retries.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};

type Flight<V, E> = Shared<BoxFuture<'static, Result<V, E>>>;

enum Slot<V, E>
where
    V: Clone,
    E: Clone,
{
    Ready(V),
    Pending(Flight<V, E>),
}

pub struct SingleFlight<K, V, E>
where
    V: Clone,
    E: Clone,
{
    slots: Mutex<HashMap<K, Slot<V, E>>>,
}

impl<K, V, E> Default for SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> SingleFlight<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<K, Slot<V, E>>> {
        // The map is only touched in short non-async sections, so a poisoned
        // lock still holds a consistent map.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the ready value for `key`, join an in-flight initialization, or
    /// start one with `init`.
    pub async fn get_or_init<F, Fut>(&self, key: K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let flight = {
            let mut slots = self.slots();
            match slots.get(&key) {
                Some(Slot::Ready(value)) => return Ok(value.clone()),
                Some(Slot::Pending(flight)) => flight.clone(),
                None => {
                    let flight = init().boxed().shared();
                    slots.insert(key.clone(), Slot::Pending(flight.clone()));
                    flight
                }
            }
        };

        let result = flight.clone().await;

        let mut slots = self.slots();
        let still_ours = matches!(
            slots.get(&key),
            Some(Slot::Pending(current)) if current.ptr_eq(&flight)
        );
        if still_ours {
            match &result {
                Ok(value) => {
                    slots.insert(key, Slot::Ready(value.clone()));
                }
                Err(_) => {
                    slots.remove(&key);
                }
            }
        }

        result
    }

    /// Ready value for `key`, if initialization already succeeded.
    pub fn get(&self, key: &K) -> Option<V> {
        match self.slots().get(key) {
            Some(Slot::Ready(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Drop a ready value so the next caller initializes again.
    pub fn invalidate(&self, key: &K) {
        let mut slots = self.slots();
        if matches!(slots.get(key), Some(Slot::Ready(_))) {
            slots.remove(key);
        }
    }
}

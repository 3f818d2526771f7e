//! Per-key single-flight guard
//!
//! Concurrent cold requests for the same id queue behind one async mutex;
//! the leader generates while followers wait and then find the cache warm.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

#[derive(Debug, Default)]
pub struct InFlight {
    slots: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Held while a key is being generated. Dropping it releases the key and
/// removes the slot once nobody else is queued on it.
pub struct FlightGuard<'a> {
    owner: &'a InFlight,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> FlightGuard<'_> {
        let slot = {
            let mut slots = self.slots.lock();
            slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        // Clears the slot if this request is cancelled while still queued.
        let mut queued = Queued {
            owner: self,
            key: key.to_string(),
            armed: true,
        };
        let guard = slot.lock_owned().await;
        queued.armed = false;
        FlightGuard {
            owner: self,
            key: std::mem::take(&mut queued.key),
            guard: Some(guard),
        }
    }

    fn remove_idle(slots: &mut HashMap<String, Arc<tokio::sync::Mutex<()>>>, key: &str) {
        // Only the map itself still references an idle slot.
        if slots
            .get(key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(key);
        }
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        let mut slots = self.owner.slots.lock();
        self.guard.take();
        InFlight::remove_idle(&mut slots, &self.key);
    }
}

/// Pending `acquire`. The lock future is a temporary of the awaiting
/// statement, so it has released its slot reference by the time this drops.
struct Queued<'a> {
    owner: &'a InFlight,
    key: String,
    armed: bool,
}

impl Drop for Queued<'_> {
    fn drop(&mut self) {
        if self.armed {
            InFlight::remove_idle(&mut self.owner.slots.lock(), &self.key);
        }
    }
}

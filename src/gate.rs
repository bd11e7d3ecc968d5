//! Per-key construction gate.
//!
//! Construction of a value (disk write, network download, object build) is
//! serialized per key but not globally. Callers may be blocking threads or async
//! tasks; both kinds wait on the same gate, so a render-side blocking constructor and
//! a background async loader can never build the same key twice at once.
//!
//! Gates live in a map only while somebody holds or waits for them. Every clone and
//! drop of a gate `Arc` happens under the map lock, which keeps the reference count
//! an exact measure of interest in the key.

use core::hash::Hash;
use std::pin::pin;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

#[cfg(feature = "hashbrown")]
use hashbrown::HashMap;
#[cfg(not(feature = "hashbrown"))]
use std::collections::HashMap;

/// A binary lock that can be awaited or blocked on.
#[derive(Debug, Default)]
struct KeyGate {
    busy: Mutex<bool>,
    blocked: Condvar,
    awaiting: Notify,
}

impl KeyGate {
    fn try_acquire(&self) -> bool {
        let mut busy = self.busy.lock();
        if *busy {
            false
        } else {
            *busy = true;
            true
        }
    }

    fn acquire_blocking(&self) {
        let mut busy = self.busy.lock();
        while *busy {
            self.blocked.wait(&mut busy);
        }
        *busy = true;
    }

    async fn acquire(&self) {
        loop {
            let mut notified = pin!(self.awaiting.notified());
            // Register before checking so a release between the check and the
            // await is not lost.
            notified.as_mut().enable();
            if self.try_acquire() {
                return;
            }
            notified.await;
        }
    }

    fn release(&self) {
        *self.busy.lock() = false;
        self.blocked.notify_one();
        self.awaiting.notify_waiters();
    }
}

/// Map of key to gate.
pub(crate) struct GateMap<K> {
    gates: Mutex<HashMap<K, Arc<KeyGate>>>,
}

impl<K> GateMap<K>
where
    K: Hash + Eq + Clone,
{
    pub(crate) fn new() -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
        }
    }

    fn ticket(&self, key: &K) -> GateTicket<'_, K> {
        let gate = Arc::clone(
            self.gates
                .lock()
                .entry(key.clone())
                .or_insert_with(|| Arc::new(KeyGate::default())),
        );
        GateTicket {
            map: self,
            key: key.clone(),
            gate: Some(gate),
            held: false,
        }
    }

    /// Blocks the current thread until the gate for `key` is free, then holds it
    /// until the returned ticket is dropped.
    pub(crate) fn lock(&self, key: &K) -> GateTicket<'_, K> {
        let mut ticket = self.ticket(key);
        if let Some(gate) = &ticket.gate {
            gate.acquire_blocking();
        }
        ticket.held = true;
        ticket
    }

    /// Waits asynchronously for the gate for `key`.
    ///
    /// Dropping the future before it resolves leaves the gate untouched.
    pub(crate) async fn lock_async(&self, key: &K) -> GateTicket<'_, K> {
        let mut ticket = self.ticket(key);
        if let Some(gate) = &ticket.gate {
            gate.acquire().await;
        }
        ticket.held = true;
        ticket
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.gates.lock().len()
    }
}

impl<K> core::fmt::Debug for GateMap<K> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GateMap")
            .field("active", &self.gates.lock().len())
            .finish()
    }
}

/// Interest in one key's gate. Releases the gate (if held) and prunes the map on drop.
pub(crate) struct GateTicket<'a, K>
where
    K: Hash + Eq + Clone,
{
    map: &'a GateMap<K>,
    key: K,
    gate: Option<Arc<KeyGate>>,
    held: bool,
}

impl<K> Drop for GateTicket<'_, K>
where
    K: Hash + Eq + Clone,
{
    fn drop(&mut self) {
        let Some(gate) = self.gate.take() else {
            return;
        };
        if self.held {
            gate.release();
        }
        let mut gates = self.map.gates.lock();
        let last = gates
            .get(&self.key)
            .is_some_and(|current| Arc::ptr_eq(current, &gate) && Arc::strong_count(&gate) == 2);
        if last {
            gates.remove(&self.key);
        }
        drop(gate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_gate_is_pruned_after_use() {
        let gates: GateMap<String> = GateMap::new();
        {
            let _ticket = gates.lock(&"a".to_string());
            assert_eq!(gates.len(), 1);
        }
        assert_eq!(gates.len(), 0);
    }

    #[test]
    fn test_gate_serializes_same_key() {
        let gates: Arc<GateMap<u32>> = Arc::new(GateMap::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gates = Arc::clone(&gates);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    let _ticket = gates.lock(&7);
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(2));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(gates.len(), 0);
    }

    #[test]
    fn test_different_keys_do_not_block() {
        let gates: GateMap<u32> = GateMap::new();
        let _a = gates.lock(&1);
        let _b = gates.lock(&2);
        assert_eq!(gates.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_async_and_blocking_share_gate() {
        let gates: Arc<GateMap<u32>> = Arc::new(GateMap::new());
        let ticket = gates.lock(&1);

        let waiter = {
            let gates = Arc::clone(&gates);
            tokio::spawn(async move {
                let _ticket = gates.lock_async(&1).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(ticket);
        waiter.await.unwrap();
        assert_eq!(gates.len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_gate_usable() {
        let gates: GateMap<u32> = GateMap::new();
        let held = gates.lock(&1);
        {
            let pending = gates.lock_async(&1);
            let timed_out = tokio::time::timeout(Duration::from_millis(5), pending).await;
            assert!(timed_out.is_err());
        }
        drop(held);
        assert_eq!(gates.len(), 0);
        let _again = gates.lock_async(&1).await;
    }
}

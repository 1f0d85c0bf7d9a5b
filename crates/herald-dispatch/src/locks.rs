//! Lock registry — the sole synchronization point between manual and
//! scheduled dispatches.
//!
//! All acquisition is atomic check-and-set under one mutex, non-blocking:
//! a held lock means "try again later", never "wait here". Guards release
//! on drop so no exit path can leak a lock; a periodic stale sweep of the
//! recipient and fingerprint scopes is the backstop for anything that
//! slips through anyway. Global and schedule locks are never swept: a
//! long-running dispatch must stay exclusive for as long as it runs.
//!
//! Every acquisition gets a generation token, and a guard only removes
//! the entry it created. A guard whose lock was swept and reacquired by
//! someone else drops without touching the new holder.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Lock scopes. One registry serves all four.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockScope {
    /// In-flight send to one recipient.
    Recipient,
    /// In-flight payload by content hash.
    Fingerprint,
    /// Whole-dispatch exclusion — serializes broadcasts entirely.
    Global,
    /// One run per schedule at a time.
    Schedule,
}

impl std::fmt::Display for LockScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockScope::Recipient => write!(f, "recipient"),
            LockScope::Fingerprint => write!(f, "fingerprint"),
            LockScope::Global => write!(f, "global"),
            LockScope::Schedule => write!(f, "schedule"),
        }
    }
}

/// Key of the single global lock.
pub const GLOBAL_KEY: &str = "dispatch";

struct Held {
    acquired: Instant,
    generation: u64,
}

#[derive(Default)]
pub struct LockRegistry {
    held: Mutex<HashMap<(LockScope, String), Held>>,
    next_generation: AtomicU64,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire_entry(&self, scope: LockScope, key: &str) -> Option<u64> {
        let mut held = self.held.lock().unwrap();
        match held.entry((scope, key.to_string())) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                slot.insert(Held {
                    acquired: Instant::now(),
                    generation,
                });
                Some(generation)
            }
        }
    }

    /// Atomically acquire if free. Returns false when already held.
    pub fn try_acquire(&self, scope: LockScope, key: &str) -> bool {
        self.acquire_entry(scope, key).is_some()
    }

    /// Acquire as an RAII guard that releases on drop.
    pub fn try_acquire_guard(
        self: &Arc<Self>,
        scope: LockScope,
        key: &str,
    ) -> Option<LockGuard> {
        self.acquire_entry(scope, key).map(|generation| LockGuard {
            registry: Arc::clone(self),
            scope,
            key: key.to_string(),
            generation,
        })
    }

    /// Unconditional release, regardless of who holds the lock.
    pub fn release(&self, scope: LockScope, key: &str) {
        self.held.lock().unwrap().remove(&(scope, key.to_string()));
    }

    /// Release only if the entry still belongs to `generation`.
    fn release_generation(&self, scope: LockScope, key: &str, generation: u64) {
        let mut held = self.held.lock().unwrap();
        if let Entry::Occupied(entry) = held.entry((scope, key.to_string()))
            && entry.get().generation == generation
        {
            entry.remove();
        }
    }

    pub fn is_held(&self, scope: LockScope, key: &str) -> bool {
        self.held
            .lock()
            .unwrap()
            .contains_key(&(scope, key.to_string()))
    }

    /// Force-clear everything. Called on disconnect: in-flight sends on a
    /// dead connection cannot be trusted to complete and release.
    pub fn clear_all(&self) {
        let mut held = self.held.lock().unwrap();
        if !held.is_empty() {
            tracing::warn!("🔓 force-clearing {} lock(s)", held.len());
            held.clear();
        }
    }

    /// Expire recipient and fingerprint locks older than `ceiling`.
    /// Returns how many were dropped. Global and schedule locks are
    /// exempt: they are held for a whole run, however long it takes.
    pub fn sweep_stale(&self, ceiling: Duration) -> usize {
        let mut held = self.held.lock().unwrap();
        let before = held.len();
        held.retain(|(scope, key), entry| {
            if !matches!(scope, LockScope::Recipient | LockScope::Fingerprint) {
                return true;
            }
            let stale = entry.acquired.elapsed() > ceiling;
            if stale {
                tracing::warn!("🔓 expiring stale {scope} lock '{key}'");
            }
            !stale
        });
        before - held.len()
    }

    /// Snapshot of held locks (scope, key, age) for status reporting.
    pub fn snapshot(&self) -> Vec<(LockScope, String, Duration)> {
        self.held
            .lock()
            .unwrap()
            .iter()
            .map(|((scope, key), entry)| (*scope, key.clone(), entry.acquired.elapsed()))
            .collect()
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().unwrap().len()
    }
}

/// Releases its lock when dropped, whatever the exit path was.
pub struct LockGuard {
    registry: Arc<LockRegistry>,
    scope: LockScope,
    key: String,
    generation: u64,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.registry
            .release_generation(self.scope, &self.key, self.generation);
    }
}

//! Per-key lock registry
//!
//! Mutations on one fingerprint (or one path, or one tag) are serialized by
//! an async mutex for that key only; unrelated keys never contend.
//!
//! Global acquisition order is the `Ord` of [`LockKey`]: all location keys,
//! then image keys in fingerprint byte order, then tag keys in name order.
//! [`LockRegistry::acquire`] sorts its input and [`LockSet::extend`] refuses
//! keys that would break the order, so two operations can never wait on each
//! other in a cycle.

use crate::error::{CatalogError, CatalogResult};
use gopher_common::Fingerprint;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::Instant;

/// Idle slots are pruned once the registry grows past this size
const PRUNE_THRESHOLD: usize = 4096;

/// Lockable catalog entity. Variant order is part of the lock order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    /// A (scanner, path) location binding
    Location { scanner_id: String, path: String },
    /// An image record
    Image(Fingerprint),
    /// A tag's membership set
    Tag(String),
}

impl LockKey {
    pub fn location(scanner_id: &str, path: &str) -> Self {
        LockKey::Location {
            scanner_id: scanner_id.to_string(),
            path: path.to_string(),
        }
    }

    fn describe(&self) -> String {
        match self {
            LockKey::Location { scanner_id, path } => format!("location {}:{}", scanner_id, path),
            LockKey::Image(fp) => format!("image {}", fp.short()),
            LockKey::Tag(name) => format!("tag {}", name),
        }
    }
}

type Slot = Arc<AsyncMutex<()>>;

/// Registry of keyed async mutexes with bounded waits
pub struct LockRegistry {
    slots: Mutex<HashMap<LockKey, Slot>>,
    timeout: Duration,
}

/// Guards held by one operation; released on drop
pub struct LockSet {
    held: Vec<(LockKey, OwnedMutexGuard<()>)>,
    deadline: Instant,
}

impl LockRegistry {
    /// Create a registry whose acquisitions give up after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    fn slot(&self, key: &LockKey) -> Slot {
        let mut slots = self.slots.lock();
        if slots.len() > PRUNE_THRESHOLD {
            // Only the map holds an idle slot
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        }
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    /// Acquire every key in global order
    ///
    /// Fails with `Timeout` if the whole set is not held within the
    /// registry timeout; guards taken so far are released.
    pub async fn acquire<I>(&self, keys: I) -> CatalogResult<LockSet>
    where
        I: IntoIterator<Item = LockKey>,
    {
        let mut set = LockSet {
            held: Vec::new(),
            deadline: Instant::now() + self.timeout,
        };
        self.lock_into(&mut set, keys).await?;
        Ok(set)
    }

    async fn lock_into<I>(&self, set: &mut LockSet, keys: I) -> CatalogResult<()>
    where
        I: IntoIterator<Item = LockKey>,
    {
        let mut keys: Vec<LockKey> = keys
            .into_iter()
            .filter(|k| !set.holds(k))
            .collect();
        keys.sort();
        keys.dedup();

        if let (Some(last_held), Some(first_new)) = (set.held.last(), keys.first()) {
            if first_new < &last_held.0 {
                return Err(CatalogError::Internal(format!(
                    "lock order violation: {} requested while holding {}",
                    first_new.describe(),
                    last_held.0.describe()
                )));
            }
        }

        for key in keys {
            let slot = self.slot(&key);
            match tokio::time::timeout_at(set.deadline, slot.lock_owned()).await {
                Ok(guard) => set.held.push((key, guard)),
                Err(_) => {
                    tracing::warn!(
                        key = %key.describe(),
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Lock wait exceeded bound"
                    );
                    return Err(CatalogError::Timeout(key.describe()));
                }
            }
        }

        Ok(())
    }
}

impl LockSet {
    /// Whether this set already holds `key`
    pub fn holds(&self, key: &LockKey) -> bool {
        self.held.iter().any(|(k, _)| k == key)
    }

    /// Take more keys while keeping the ones already held
    ///
    /// Every new key must sort after every held key.
    pub async fn extend<I>(&mut self, registry: &LockRegistry, keys: I) -> CatalogResult<()>
    where
        I: IntoIterator<Item = LockKey>,
    {
        registry.lock_into(self, keys).await
    }

    /// Keys held, in acquisition order
    pub fn keys(&self) -> impl Iterator<Item = &LockKey> {
        self.held.iter().map(|(k, _)| k)
    }
}

//! Subscription table.
//!
//! Maps `(topic, msg_type)` keys to append-only subscriber lists. The table
//! is sharded by key hash with one `RwLock` per shard, so inserts under
//! different keys proceed independently, inserts under the same key
//! serialize against each other only, and dispatch lookups never block
//! lookups of other keys.
//!
//! Dispatch takes a *snapshot* of the bucket under the read lock: the set
//! of subscribers observed at lookup is exactly the set delivered to, and
//! entries appended concurrently with an in-flight publish may or may not
//! see that publish.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use fanout_abi::MsgType;
use fxhash::{FxHashMap, FxHasher};
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use std::sync::Arc;

use crate::core::Core;
use crate::message::FrozenMessage;
use crate::node::NodeId;

/// Default shard count (power of two).
pub const DEFAULT_SHARDS: usize = 16;

// ---------------------------------------------------------------------------
// SubscriptionKey
// ---------------------------------------------------------------------------

/// `(topic, msg_type)` pair identifying one delivery channel.
///
/// Topics compare byte-exact; there are no wildcards. Types match only on
/// bit equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    /// Topic name.
    pub topic: String,
    /// Schema tag.
    pub msg_type: MsgType,
}

impl SubscriptionKey {
    /// Creates a key.
    pub fn new(topic: impl Into<String>, msg_type: MsgType) -> Self {
        Self {
            topic: topic.into(),
            msg_type,
        }
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {:#018x})", self.topic, self.msg_type)
    }
}

// ---------------------------------------------------------------------------
// SubscriberEntry
// ---------------------------------------------------------------------------

/// Delivery closure invoked once per matching publish.
///
/// Returns the subscriber's status code; non-zero is logged by the caller
/// and never affects other deliveries.
pub type DeliveryFn = Arc<dyn Fn(&Core, &FrozenMessage) -> i32 + Send + Sync>;

/// One registered subscriber.
#[derive(Clone)]
pub struct SubscriberEntry {
    /// Table-unique id, used for removal.
    pub id: u64,
    /// Node that owns the subscription.
    pub node: NodeId,
    /// Delivery closure.
    pub deliver: DeliveryFn,
}

impl std::fmt::Debug for SubscriberEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberEntry")
            .field("id", &self.id)
            .field("node", &self.node)
            .finish_non_exhaustive()
    }
}

/// Snapshot of a bucket taken at dispatch time.
pub type DispatchSet = SmallVec<[SubscriberEntry; 8]>;

// ---------------------------------------------------------------------------
// SubscriptionTable
// ---------------------------------------------------------------------------

type Bucket = Vec<SubscriberEntry>;

struct Shard {
    buckets: RwLock<FxHashMap<SubscriptionKey, Bucket>>,
}

/// Concurrent `(topic, msg_type)` → subscriber-list map.
pub struct SubscriptionTable {
    shards: Box<[Shard]>,
    mask: usize,
    next_id: AtomicU64,
}

impl SubscriptionTable {
    /// Creates a table with `shards` shards (rounded up to a power of two).
    #[must_use]
    pub fn new(shards: usize) -> Self {
        let count = shards.max(1).next_power_of_two();
        let shards = (0..count)
            .map(|_| Shard {
                buckets: RwLock::new(FxHashMap::default()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            shards,
            mask: count - 1,
            next_id: AtomicU64::new(1),
        }
    }

    fn shard(&self, key: &SubscriptionKey) -> &Shard {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) & self.mask]
    }

    /// Appends a subscriber under `key` and returns its removal id.
    pub fn insert(&self, key: SubscriptionKey, node: NodeId, deliver: DeliveryFn) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shard = self.shard(&key);

        shard
            .buckets
            .write()
            .entry(key)
            .or_default()
            .push(SubscriberEntry { id, node, deliver });

        id
    }

    /// Removes the subscriber `id` under `key`.
    ///
    /// Returns `true` if an entry was removed. Empty buckets are pruned.
    pub fn remove(&self, key: &SubscriptionKey, id: u64) -> bool {
        let shard = self.shard(key);
        let mut buckets = shard.buckets.write();

        let Some(bucket) = buckets.get_mut(key) else {
            return false;
        };

        let before = bucket.len();
        bucket.retain(|e| e.id != id);
        let removed = bucket.len() != before;

        if bucket.is_empty() {
            buckets.remove(key);
        }

        removed
    }

    /// Removes every subscription owned by `node` across all shards.
    ///
    /// Returns the number of entries removed.
    pub fn remove_node(&self, node: NodeId) -> usize {
        let mut removed = 0;

        for shard in &*self.shards {
            let mut buckets = shard.buckets.write();
            for bucket in buckets.values_mut() {
                let before = bucket.len();
                bucket.retain(|e| e.node != node);
                removed += before - bucket.len();
            }
            buckets.retain(|_, bucket| !bucket.is_empty());
        }

        removed
    }

    /// Snapshots the subscriber list for `key`.
    ///
    /// The snapshot is stable for the duration of one dispatch; concurrent
    /// inserts under the same key are not reflected.
    #[must_use]
    pub fn snapshot(&self, key: &SubscriptionKey) -> DispatchSet {
        let shard = self.shard(key);
        let buckets = shard.buckets.read();

        buckets
            .get(key)
            .map(|bucket| bucket.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Total number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.buckets.read().values().map(Vec::len).sum::<usize>())
            .sum()
    }

    /// Whether the table holds no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every bucket in every shard.
    pub fn clear(&self) {
        for shard in &*self.shards {
            shard.buckets.write().clear();
        }
    }
}

impl std::fmt::Debug for SubscriptionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionTable")
            .field("shards", &self.shards.len())
            .field("subscribers", &self.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// WriterTable
// ---------------------------------------------------------------------------

/// Advertisement bookkeeping.
///
/// Records which nodes declared themselves writers of which keys. Purely
/// informational: publishing is never restricted to advertisers.
#[derive(Default)]
pub struct WriterTable {
    writers: Mutex<FxHashMap<u64, (SubscriptionKey, NodeId)>>,
    next_id: AtomicU64,
}

impl WriterTable {
    /// Creates an empty writer table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            writers: Mutex::new(FxHashMap::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Records `node` as a writer of `key`; returns the removal id.
    pub fn insert(&self, key: SubscriptionKey, node: NodeId) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.writers.lock().insert(id, (key, node));
        id
    }

    /// Removes the record `id`. Returns `true` if it existed.
    pub fn remove(&self, id: u64) -> bool {
        self.writers.lock().remove(&id).is_some()
    }

    /// Removes every record owned by `node`.
    pub fn remove_node(&self, node: NodeId) {
        self.writers.lock().retain(|_, (_, n)| *n != node);
    }

    /// Number of advertised writers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writers.lock().len()
    }

    /// Whether no writers are recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ===========================================================================
// Tests
// ===========================================================================

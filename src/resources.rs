//! Incidental resource cache
//!
//! Orchestration flows create resources as a side effect of a larger task:
//! a security group for a node cluster, a key pair for an account, a
//! placement group for a zone. Concurrent flows asking for the same resource
//! must agree on one instance instead of racing to create duplicates.
//!
//! [`ResourceCache`] is a keyed get-or-create map with the single-creator
//! guarantee: for each key the creation function runs at most once at a time,
//! and once a value exists every caller observes that value.

use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::Result;

/// 槽位: 每个 key 一个, 持有槽位锁的调用者负责创建
///
/// 与会话缓存相同的单飞结构: 创建期间锁住槽位而不是整个 map,
/// 其他 key 的调用者不受影响, 同 key 的调用者等待后直接读到创建结果。
type Slot<V> = Arc<Mutex<Option<V>>>;

/// Keyed get-or-create cache with a single-creator guarantee per key.
///
/// Values are held for the lifetime of the cache; incidental resources do not
/// expire on their own. A failed creation is not cached, so the next caller
/// triggers a fresh attempt.
pub struct ResourceCache<K, V> {
    name: String,
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> ResourceCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    /// Create an empty cache. `name` identifies the resource kind in logs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Return the cached value for `key`, creating it with `create` if absent.
    ///
    /// Concurrent callers for the same key wait for the one in-flight
    /// creation and receive its value. A creation error propagates to the
    /// caller that triggered it and leaves nothing cached.
    pub async fn get_or_create<F, Fut>(&self, key: K, create: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        let slot = self.slot(&key).await;
        let mut guard = slot.lock().await;

        if let Some(value) = guard.as_ref() {
            return Ok(value.clone());
        }

        log::debug!("[{}] Creating resource for key {key:?}", self.name);
        let value = create().await?;
        *guard = Some(value.clone());
        Ok(value)
    }

    /// Return the cached value for `key` without creating one.
    ///
    /// Waits for an in-flight creation of the same key to settle first.
    pub async fn get(&self, key: &K) -> Option<V> {
        let slot = {
            let slots = self.slots.lock().await;
            slots.get(key).cloned()
        }?;
        let guard = slot.lock().await;
        guard.clone()
    }

    /// Forget the value for `key`, returning it if one was cached.
    ///
    /// The next `get_or_create` for the key runs its creation function again.
    pub async fn remove(&self, key: &K) -> Option<V> {
        let slot = {
            let mut slots = self.slots.lock().await;
            slots.remove(key)
        }?;
        let mut guard = slot.lock().await;
        guard.take()
    }

    /// Number of keys tracked, including keys whose last creation failed.
    pub async fn len(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// Whether no keys are tracked.
    pub async fn is_empty(&self) -> bool {
        self.slots.lock().await.is_empty()
    }

    /// 取出或建立 key 对应的槽位
    async fn slot(&self, key: &K) -> Slot<V> {
        let mut slots = self.slots.lock().await;
        slots.entry(key.clone()).or_default().clone()
    }
}

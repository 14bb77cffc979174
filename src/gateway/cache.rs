//! Bounded, time-expiring caches used by every gateway.

use crate::types::{Block, BlockId, Transaction};
use lru::LruCache;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

#[derive(Debug, Clone, Copy)]
pub struct CacheOptions {
    pub max_entries: NonZeroUsize,
    pub max_age: Duration,
    /// Recompute confirmations of transactions served from cache.
    pub refresh_cached_confirmations: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            max_entries: NonZeroUsize::new(1024 * 1024).unwrap_or(NonZeroUsize::MIN),
            max_age: Duration::from_secs(60 * 60),
            refresh_cached_confirmations: false,
        }
    }
}

/// An LRU map whose entries also expire after a fixed age.
pub struct TimedLru<K: Hash + Eq, V> {
    entries: LruCache<K, (Instant, V)>,
    max_age: Duration,
}

impl<K: Hash + Eq, V: Clone> TimedLru<K, V> {
    pub fn new(max_entries: NonZeroUsize, max_age: Duration) -> Self {
        Self {
            entries: LruCache::new(max_entries),
            max_age,
        }
    }

    pub fn get(&mut self, key: &K) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some((inserted_at, value)) => {
                if inserted_at.elapsed() < self.max_age {
                    return Some(value.clone());
                }
                true
            }
            None => false,
        };
        if expired {
            self.entries.pop(key);
        }
        None
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.entries.put(key, (Instant::now(), value));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Block and transaction caches owned by one gateway instance.
pub struct GatewayCache {
    options: CacheOptions,
    blocks: Mutex<TimedLru<BlockId, Arc<Block>>>,
    txs: Mutex<TimedLru<String, Transaction>>,
}

impl GatewayCache {
    pub fn new(options: CacheOptions) -> Self {
        Self {
            options,
            blocks: Mutex::new(TimedLru::new(options.max_entries, options.max_age)),
            txs: Mutex::new(TimedLru::new(options.max_entries, options.max_age)),
        }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    pub async fn block(&self, id: &BlockId) -> Option<Arc<Block>> {
        let hit = self.blocks.lock().await.get(id);
        if hit.is_some() {
            trace!("Block cache HIT {}", id);
        }
        hit
    }

    pub async fn put_block(&self, id: BlockId, block: Arc<Block>) {
        self.blocks.lock().await.insert(id, block);
    }

    pub async fn transaction(&self, txid: &str) -> Option<Transaction> {
        let hit = self.txs.lock().await.get(&txid.to_string());
        if hit.is_some() {
            trace!("Transaction cache HIT {}", txid);
        }
        hit
    }

    pub async fn put_transaction(&self, tx: Transaction) {
        self.txs.lock().await.insert(tx.txid.clone(), tx);
    }
}

impl Default for GatewayCache {
    fn default() -> Self {
        Self::new(CacheOptions::default())
    }
}

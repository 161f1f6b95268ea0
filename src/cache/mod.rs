//! Best-effort response cache for read-only tool calls.
//!
//! Any backend failure degrades to a miss and is logged; it never fails
//! the request.

pub mod file;
pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::keys;

pub use file::FileBackend;
pub use memory::MemoryBackend;

/// Parameter payloads above this size are unlikely to repeat.
pub const DEFAULT_MAX_PARAM_BYTES: usize = 2048;

const NAMESPACE: &str = "cache";

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

/// A stored tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub data: Value,
    pub cached_at_epoch_ms: i64,
    pub ttl_seconds: u64,
    pub content_hash: String,
}

impl CacheEntry {
    pub fn is_fresh(&self, now_ms: i64) -> bool {
        let ttl_ms = i64::try_from(self.ttl_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
        now_ms.saturating_sub(self.cached_at_epoch_ms) < ttl_ms
    }
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;
    async fn store(&self, key: &str, entry: &CacheEntry) -> Result<(), CacheError>;
    async fn remove(&self, key: &str) -> Result<(), CacheError>;
}

/// Which methods are cacheable and for how long.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub ttl_seconds: BTreeMap<String, u64>,
    pub max_param_bytes: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        let ttl_seconds = [("get_node", 600), ("list_nodes", 300), ("search_nodes", 120)]
            .into_iter()
            .map(|(m, ttl)| (m.to_string(), ttl))
            .collect();
        Self {
            ttl_seconds,
            max_param_bytes: DEFAULT_MAX_PARAM_BYTES,
        }
    }
}

impl CachePolicy {
    pub fn ttl_for(&self, method: &str) -> Option<u64> {
        self.ttl_seconds.get(method).copied()
    }
}

pub struct ResponseCache {
    backend: Arc<dyn CacheBackend>,
    policy: CachePolicy,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl ResponseCache {
    pub fn new(
        backend: Arc<dyn CacheBackend>,
        policy: CachePolicy,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            backend,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn should_cache(&self, method: &str, params: &Value) -> bool {
        self.policy.ttl_for(method).is_some()
            && !keys::requests_fresh_data(params)
            && keys::serialized_len(params) <= self.policy.max_param_bytes
    }

    pub fn key_for(method: &str, params: &Value, identity: &str) -> String {
        keys::derive_key(NAMESPACE, method, params, identity)
    }

    fn now_ms(&self) -> i64 {
        self.clock.utc().timestamp_millis()
    }

    /// Look up a fresh entry. Expired entries are deleted on the way out.
    pub async fn get(&self, method: &str, params: &Value, identity: &str) -> Option<Value> {
        if !self.should_cache(method, params) {
            return None;
        }
        let key = Self::key_for(method, params, identity);

        let entry = match self.backend.load(&key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                warn!(method, error = %e, "cache lookup failed; treating as miss");
                return None;
            }
        };

        if entry.is_fresh(self.now_ms()) {
            debug!(method, "cache hit");
            return Some(entry.data);
        }

        debug!(method, "cache entry expired");
        if let Err(e) = self.backend.remove(&key).await {
            warn!(method, error = %e, "failed to delete expired cache entry");
        }
        None
    }

    /// Store `data` for a cacheable call. `ttl_seconds` overrides the
    /// method's policy TTL.
    pub async fn set(
        &self,
        method: &str,
        params: &Value,
        data: &Value,
        ttl_seconds: Option<u64>,
        identity: &str,
    ) {
        if !self.should_cache(method, params) {
            return;
        }
        let Some(ttl_seconds) = ttl_seconds.or_else(|| self.policy.ttl_for(method)) else {
            return;
        };

        let serialized = match serde_json::to_vec(data) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(method, error = %e, "failed to serialize cache payload");
                return;
            }
        };

        let entry = CacheEntry {
            data: data.clone(),
            cached_at_epoch_ms: self.now_ms(),
            ttl_seconds,
            content_hash: keys::sha256_hex(&serialized),
        };

        let key = Self::key_for(method, params, identity);
        if let Err(e) = self.backend.store(&key, &entry).await {
            warn!(method, error = %e, "cache store failed");
        }
    }

    pub async fn invalidate(&self, method: &str, params: &Value, identity: &str) {
        let key = Self::key_for(method, params, identity);
        if let Err(e) = self.backend.remove(&key).await {
            warn!(method, error = %e, "cache invalidation failed");
        }
    }
}

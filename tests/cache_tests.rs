//! Response cache: TTL expiry, eligibility and backend failure handling.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::ManualClock;
use mcp_workflowy_gateway::cache::{
    CacheBackend, CacheEntry, CacheError, CachePolicy, FileBackend, MemoryBackend, ResponseCache,
};
use mcp_workflowy_gateway::keys;
use serde_json::json;

fn memory_cache() -> (ResponseCache, Arc<MemoryBackend>, Arc<ManualClock>) {
    let backend = Arc::new(MemoryBackend::new());
    let clock = Arc::new(ManualClock::new());
    let cache = ResponseCache::new(backend.clone(), CachePolicy::default(), clock.clone());
    (cache, backend, clock)
}

/// Backend whose every operation fails.
#[derive(Default)]
struct BrokenBackend {
    attempts: AtomicUsize,
}

#[async_trait]
impl CacheBackend for BrokenBackend {
    async fn load(&self, _key: &str) -> Result<Option<CacheEntry>, CacheError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Unavailable("storage offline".into()))
    }

    async fn store(&self, _key: &str, _entry: &CacheEntry) -> Result<(), CacheError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Unavailable("storage offline".into()))
    }

    async fn remove(&self, _key: &str) -> Result<(), CacheError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::Unavailable("storage offline".into()))
    }
}

// ---------------------------------------------------------------------------
// TTL
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ttl_boundary() {
    let (cache, backend, clock) = memory_cache();
    let params = json!({"query": "test"});
    let data = json!({"nodes": [{"id": "n2"}]});

    cache.set("search_nodes", &params, &data, Some(120), "ada").await;

    clock.advance(Duration::from_secs(119));
    assert_eq!(cache.get("search_nodes", &params, "ada").await, Some(data));

    clock.advance(Duration::from_secs(2));
    assert_eq!(cache.get("search_nodes", &params, "ada").await, None);
    assert!(backend.is_empty().await, "expired entry is deleted on lookup");
}

#[tokio::test]
async fn policy_ttl_used_when_not_overridden() {
    let (cache, _backend, clock) = memory_cache();
    let params = json!({});
    cache.set("list_nodes", &params, &json!([]), None, "ada").await;

    clock.advance(Duration::from_secs(299));
    assert!(cache.get("list_nodes", &params, "ada").await.is_some());
    clock.advance(Duration::from_secs(1));
    assert!(cache.get("list_nodes", &params, "ada").await.is_none());
}

#[tokio::test]
async fn entries_carry_content_hash() {
    let (cache, backend, _clock) = memory_cache();
    let params = json!({"id": "n1"});
    let data = json!({"id": "n1", "name": "Inbox"});
    cache.set("get_node", &params, &data, None, "ada").await;

    let key = ResponseCache::key_for("get_node", &params, "ada");
    let entry = backend.load(&key).await.unwrap().unwrap();
    assert_eq!(entry.ttl_seconds, 600);
    assert_eq!(entry.content_hash, keys::sha256_hex(serde_json::to_vec(&data).unwrap()));
}

// ---------------------------------------------------------------------------
// Eligibility
// ---------------------------------------------------------------------------

#[tokio::test]
async fn only_whitelisted_reads_are_cached() {
    let (cache, backend, _clock) = memory_cache();
    let small = json!({"parent_id": "n1"});
    assert!(cache.should_cache("list_nodes", &small));
    assert!(!cache.should_cache("create_node", &json!({"name": "x"})));

    let big = json!({"parent_id": "x".repeat(4096)});
    assert!(!cache.should_cache("list_nodes", &big));
    assert!(!cache.should_cache("list_nodes", &json!({"skip_cache": true})));

    cache.set("create_node", &json!({"name": "x"}), &json!({"id": "n9"}), None, "ada").await;
    cache.set("list_nodes", &big, &json!([]), None, "ada").await;
    assert!(backend.is_empty().await);
}

#[tokio::test]
async fn identities_are_isolated() {
    let (cache, _backend, _clock) = memory_cache();
    let params = json!({"id": "n1"});
    cache.set("get_node", &params, &json!({"owner": "ada"}), None, "ada").await;
    assert!(cache.get("get_node", &params, "bob").await.is_none());
    assert!(ResponseCache::key_for("get_node", &params, "ada").starts_with("cache:"));
}

#[tokio::test]
async fn invalidate_removes_single_key() {
    let (cache, backend, _clock) = memory_cache();
    let a = json!({"id": "a"});
    let b = json!({"id": "b"});
    cache.set("get_node", &a, &json!(1), None, "ada").await;
    cache.set("get_node", &b, &json!(2), None, "ada").await;

    cache.invalidate("get_node", &a, "ada").await;
    assert!(cache.get("get_node", &a, "ada").await.is_none());
    assert_eq!(cache.get("get_node", &b, "ada").await, Some(json!(2)));
    assert_eq!(backend.len().await, 1);
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

#[tokio::test]
async fn broken_backend_degrades_to_miss() {
    let backend = Arc::new(BrokenBackend::default());
    let cache = ResponseCache::new(backend.clone(), CachePolicy::default(), Arc::new(ManualClock::new()));
    let params = json!({"id": "n1"});

    cache.set("get_node", &params, &json!({"id": "n1"}), None, "ada").await;
    assert_eq!(cache.get("get_node", &params, "ada").await, None);
    cache.invalidate("get_node", &params, "ada").await;
    assert_eq!(backend.attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn file_backend_round_trips_and_expires() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = Arc::new(FileBackend::new(tmp.path().join("cache")));
    let clock = Arc::new(ManualClock::new());
    let cache = ResponseCache::new(backend.clone(), CachePolicy::default(), clock.clone());
    let params = json!({"query": "plan"});
    let data = json!({"nodes": [{"id": "n2"}]});

    cache.set("search_nodes", &params, &data, None, "ada").await;
    let files: Vec<_> = std::fs::read_dir(backend.root()).unwrap().collect();
    assert_eq!(files.len(), 1);
    assert_eq!(cache.get("search_nodes", &params, "ada").await, Some(data));

    clock.advance(Duration::from_secs(121));
    assert_eq!(cache.get("search_nodes", &params, "ada").await, None);
    assert_eq!(std::fs::read_dir(backend.root()).unwrap().count(), 0);
}

#[tokio::test]
async fn file_backend_treats_corrupt_file_as_miss() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = Arc::new(FileBackend::new(tmp.path()));
    let cache = ResponseCache::new(backend.clone(), CachePolicy::default(), Arc::new(ManualClock::new()));
    let params = json!({"id": "n1"});

    cache.set("get_node", &params, &json!({"id": "n1"}), None, "ada").await;
    let path = std::fs::read_dir(tmp.path()).unwrap().next().unwrap().unwrap().path();
    std::fs::write(&path, b"{ truncated").unwrap();

    assert_eq!(cache.get("get_node", &params, "ada").await, None);
}

//! Shared fixtures: a scripted upstream, a manual clock and a dispatcher
//! wired the way `main` wires it.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone, Utc};
use mcp_workflowy_gateway::cache::{CachePolicy, MemoryBackend, ResponseCache};
use mcp_workflowy_gateway::credentials::{
    ConnectorTokenCodec, CredentialResolver, Credentials, MemoryTokenStore,
};
use mcp_workflowy_gateway::dedup::RequestDeduplicator;
use mcp_workflowy_gateway::error::GatewayError;
use mcp_workflowy_gateway::handlers::tools::ToolRegistry;
use mcp_workflowy_gateway::handlers::{DispatchOptions, Dispatcher};
use mcp_workflowy_gateway::protocol::{
    CreateNodeParams, DeleteNodeParams, GetNodeParams, ListNodesParams, MoveNodeParams,
    SearchNodesParams, SetCompletionParams, UpdateNodeParams,
};
use mcp_workflowy_gateway::retry::RetryEngine;
use mcp_workflowy_gateway::upstream::UpstreamClient;
use mockable::Clock;
use serde_json::{json, Value};

pub const API_KEY: &str = "test-api-key";

// ---------------------------------------------------------------------------
// Manual clock
// ---------------------------------------------------------------------------

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::at(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap())
    }

    pub fn at(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now = *now + chrono::Duration::from_std(by).unwrap();
    }

    pub fn now_ms(&self) -> i64 {
        self.utc().timestamp_millis()
    }
}

impl Clock for ManualClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

// ---------------------------------------------------------------------------
// Scripted upstream
// ---------------------------------------------------------------------------

/// Upstream double with per-method call counters.
///
/// Queued failures are returned (one per call) before any success;
/// a persistent failure is returned forever.
#[derive(Default)]
pub struct MockUpstream {
    calls: Mutex<HashMap<&'static str, usize>>,
    queued: Mutex<VecDeque<GatewayError>>,
    persistent: Mutex<Option<GatewayError>>,
    ping_failure: Mutex<Option<GatewayError>>,
    last_credentials: Mutex<Option<Credentials>>,
    delay: Mutex<Duration>,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, err: GatewayError) {
        self.queued.lock().unwrap().push_back(err);
    }

    pub fn fail_always(&self, err: GatewayError) {
        *self.persistent.lock().unwrap() = Some(err);
    }

    pub fn fail_ping(&self, err: GatewayError) {
        *self.ping_failure.lock().unwrap() = Some(err);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self, method: &str) -> usize {
        self.calls.lock().unwrap().get(method).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn last_credentials(&self) -> Option<Credentials> {
        self.last_credentials.lock().unwrap().clone()
    }

    async fn record(&self, method: &'static str, credentials: &Credentials) -> Result<(), GatewayError> {
        *self.calls.lock().unwrap().entry(method).or_insert(0) += 1;
        *self.last_credentials.lock().unwrap() = Some(credentials.clone());

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.queued.lock().unwrap().pop_front() {
            return Err(err);
        }
        if let Some(err) = self.persistent.lock().unwrap().clone() {
            return Err(err);
        }
        if !credentials.is_complete() {
            return Err(GatewayError::auth("missing Workflowy credentials"));
        }
        Ok(())
    }
}

pub fn sample_nodes() -> Value {
    json!([
        {"id": "n1", "name": "Inbox", "completed": false},
        {"id": "n2", "name": "Project test plan", "completed": false},
        {"id": "n3", "name": "Groceries", "completed": true}
    ])
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    async fn list_nodes(&self, credentials: &Credentials, _params: &ListNodesParams) -> Result<Value, GatewayError> {
        self.record("list_nodes", credentials).await?;
        Ok(json!({ "nodes": sample_nodes() }))
    }

    async fn search_nodes(&self, credentials: &Credentials, params: &SearchNodesParams) -> Result<Value, GatewayError> {
        self.record("search_nodes", credentials).await?;
        let query = params.query.to_lowercase();
        let hits: Vec<Value> = sample_nodes()
            .as_array()
            .unwrap()
            .iter()
            .filter(|n| n["name"].as_str().unwrap().to_lowercase().contains(&query))
            .cloned()
            .collect();
        Ok(json!({ "nodes": hits }))
    }

    async fn get_node(&self, credentials: &Credentials, params: &GetNodeParams) -> Result<Value, GatewayError> {
        self.record("get_node", credentials).await?;
        sample_nodes()
            .as_array()
            .unwrap()
            .iter()
            .find(|n| n["id"] == params.id.as_str())
            .cloned()
            .ok_or_else(|| GatewayError::not_found(format!("node {} does not exist", params.id)))
    }

    async fn create_node(&self, credentials: &Credentials, params: &CreateNodeParams) -> Result<Value, GatewayError> {
        self.record("create_node", credentials).await?;
        Ok(json!({ "id": "n-new", "name": params.name }))
    }

    async fn update_node(&self, credentials: &Credentials, params: &UpdateNodeParams) -> Result<Value, GatewayError> {
        self.record("update_node", credentials).await?;
        Ok(json!({ "id": params.id, "name": params.name, "note": params.note }))
    }

    async fn delete_node(&self, credentials: &Credentials, _params: &DeleteNodeParams) -> Result<Value, GatewayError> {
        self.record("delete_node", credentials).await?;
        Ok(json!({ "ok": true }))
    }

    async fn move_node(&self, credentials: &Credentials, params: &MoveNodeParams) -> Result<Value, GatewayError> {
        self.record("move_node", credentials).await?;
        Ok(json!({ "id": params.id, "parent_id": params.parent_id }))
    }

    async fn set_completion(&self, credentials: &Credentials, params: &SetCompletionParams) -> Result<Value, GatewayError> {
        self.record("set_completion", credentials).await?;
        Ok(json!({ "id": params.id, "completed": params.completed }))
    }

    async fn ping(&self) -> Result<(), GatewayError> {
        match self.ping_failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatcher harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub dispatcher: Dispatcher,
    pub upstream: Arc<MockUpstream>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<MemoryTokenStore>,
    pub cache_backend: Arc<MemoryBackend>,
}

pub struct HarnessOptions {
    pub require_auth: bool,
    pub include_detail: bool,
    pub defaults: Credentials,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            require_auth: true,
            include_detail: false,
            defaults: Credentials::new("env-user", "env-pass"),
        }
    }
}

pub fn harness() -> Harness {
    harness_with(HarnessOptions::default())
}

pub fn harness_with(options: HarnessOptions) -> Harness {
    let upstream = Arc::new(MockUpstream::new());
    let clock = Arc::new(ManualClock::new());
    let store = Arc::new(MemoryTokenStore::new());
    let cache_backend = Arc::new(MemoryBackend::new());

    let resolver = CredentialResolver::new(
        vec![API_KEY.to_string()],
        options.defaults,
        Arc::new(ConnectorTokenCodec),
        store.clone(),
        clock.clone(),
    );
    let cache = ResponseCache::new(cache_backend.clone(), CachePolicy::default(), clock.clone());

    let dispatcher = Dispatcher::new(
        ToolRegistry::workflowy().unwrap(),
        resolver,
        upstream.clone(),
        Arc::new(RequestDeduplicator::default()),
    )
    .with_cache(cache)
    .with_retry(RetryEngine::without_jitter())
    .with_options(DispatchOptions {
        require_auth: options.require_auth,
        include_detail: options.include_detail,
    });

    Harness {
        dispatcher,
        upstream,
        clock,
        store,
        cache_backend,
    }
}

/// `tools/call` envelope line.
pub fn tool_call(id: i64, name: &str, arguments: Value) -> String {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": { "name": name, "arguments": arguments }
    })
    .to_string()
}

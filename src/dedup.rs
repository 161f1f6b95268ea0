use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::GatewayError;
use crate::keys;

/// Maximum age of an in-flight entry before the sweeper drops it.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(30);

/// How often the background sweeper runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Requests with larger serialized params are treated as one-off.
pub const DEFAULT_MAX_PARAM_BYTES: usize = 2048;

const NAMESPACE: &str = "dedup";

type SharedOutcome = Shared<BoxFuture<'static, Result<Value, GatewayError>>>;

#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub methods: BTreeSet<String>,
    pub max_param_bytes: usize,
    pub max_age: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            methods: ["list_nodes", "search_nodes", "get_node"]
                .into_iter()
                .map(String::from)
                .collect(),
            max_param_bytes: DEFAULT_MAX_PARAM_BYTES,
            max_age: DEFAULT_MAX_AGE,
        }
    }
}

struct Entry {
    generation: u64,
    outcome: SharedOutcome,
    started_at: Instant,
    observers: usize,
}

#[derive(Default)]
struct Inflight {
    entries: HashMap<String, Entry>,
    next_generation: u64,
}

/// Collapses concurrent identical reads into a single execution.
///
/// Every caller attached to an entry observes the same `Ok` value or the
/// same `Err`. Entries are removed as soon as the execution settles.
pub struct RequestDeduplicator {
    config: DedupConfig,
    inflight: Arc<Mutex<Inflight>>,
}

impl Default for RequestDeduplicator {
    fn default() -> Self {
        Self::new(DedupConfig::default())
    }
}

impl RequestDeduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            inflight: Arc::new(Mutex::new(Inflight::default())),
        }
    }

    pub fn should_deduplicate(&self, method: &str, params: &Value) -> bool {
        self.config.methods.contains(method)
            && !keys::requests_fresh_data(params)
            && keys::serialized_len(params) <= self.config.max_param_bytes
    }

    pub fn key_for(method: &str, params: &Value, identity: &str) -> String {
        keys::derive_key(NAMESPACE, method, params, identity)
    }

    /// Run `operation`, or attach to an identical execution already in flight.
    ///
    /// The execution is driven by a spawned task, so dropping one caller
    /// never cancels work other callers are waiting on.
    pub async fn execute<F, Fut>(
        &self,
        method: &str,
        params: &Value,
        identity: &str,
        operation: F,
    ) -> Result<Value, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, GatewayError>> + Send + 'static,
    {
        if !self.should_deduplicate(method, params) {
            return operation().await;
        }

        let key = Self::key_for(method, params, identity);
        let (generation, outcome) = {
            let mut inflight = lock(&self.inflight);
            let attach = inflight
                .entries
                .get_mut(&key)
                .filter(|entry| entry.started_at.elapsed() < self.config.max_age);

            match attach {
                Some(entry) => {
                    entry.observers += 1;
                    debug!(method, observers = entry.observers, "attached to in-flight request");
                    (entry.generation, entry.outcome.clone())
                }
                None => {
                    let generation = inflight.next_generation;
                    inflight.next_generation += 1;

                    let outcome = operation().boxed().shared();
                    inflight.entries.insert(
                        key.clone(),
                        Entry {
                            generation,
                            outcome: outcome.clone(),
                            started_at: Instant::now(),
                            observers: 1,
                        },
                    );
                    self.drive(key.clone(), generation, outcome.clone());
                    (generation, outcome)
                }
            }
        };

        let result = outcome.await;
        release(&self.inflight, &key, generation);
        result
    }

    fn drive(&self, key: String, generation: u64, outcome: SharedOutcome) {
        let inflight = Arc::clone(&self.inflight);
        tokio::spawn(async move {
            let _ = outcome.await;
            release(&inflight, &key, generation);
        });
    }

    /// Drop entries older than the configured max age. Returns how many went.
    pub fn sweep_stale(&self) -> usize {
        let max_age = self.config.max_age;
        let mut inflight = lock(&self.inflight);
        let before = inflight.entries.len();
        inflight
            .entries
            .retain(|_, entry| entry.started_at.elapsed() < max_age);
        let removed = before - inflight.entries.len();
        if removed > 0 {
            debug!(removed, "swept stale in-flight entries");
        }
        removed
    }

    /// Periodically sweep stale entries until the process exits.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let dedup = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                dedup.sweep_stale();
            }
        })
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.inflight).entries.len()
    }

    /// Callers attached to `key`, including the one that started it.
    pub fn observer_count(&self, key: &str) -> Option<usize> {
        lock(&self.inflight).entries.get(key).map(|e| e.observers)
    }
}

/// Remove `key` if it still belongs to the execution that just settled.
fn release(inflight: &Mutex<Inflight>, key: &str, generation: u64) {
    let mut inflight = lock(inflight);
    if inflight
        .entries
        .get(key)
        .is_some_and(|entry| entry.generation == generation)
    {
        inflight.entries.remove(key);
    }
}

fn lock(inflight: &Mutex<Inflight>) -> MutexGuard<'_, Inflight> {
    inflight.lock().unwrap_or_else(PoisonError::into_inner)
}

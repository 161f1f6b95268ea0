//! Request deduplication: one execution per in-flight key.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{harness, tool_call, API_KEY};
use mcp_workflowy_gateway::credentials::TransportContext;
use mcp_workflowy_gateway::dedup::{DedupConfig, RequestDeduplicator};
use mcp_workflowy_gateway::error::GatewayError;
use serde_json::{json, Value};

fn slow_ok(counter: Arc<AtomicUsize>, value: Value) -> impl std::future::Future<Output = Result<Value, GatewayError>> + Send + 'static {
    async move {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(value)
    }
}

#[tokio::test]
async fn concurrent_identical_searches_execute_once() {
    let dedup = RequestDeduplicator::default();
    let counter = Arc::new(AtomicUsize::new(0));
    let params = json!({"query": "test"});

    let (a, b, c) = tokio::join!(
        dedup.execute("search_nodes", &params, "ada", || slow_ok(counter.clone(), json!(["hit"]))),
        dedup.execute("search_nodes", &params, "ada", || slow_ok(counter.clone(), json!(["other"]))),
        dedup.execute("search_nodes", &params, "ada", || slow_ok(counter.clone(), json!(["third"]))),
    );

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(a.unwrap(), json!(["hit"]));
    assert_eq!(b.unwrap(), json!(["hit"]));
    assert_eq!(c.unwrap(), json!(["hit"]));
    assert_eq!(dedup.in_flight(), 0, "entry must be released after settling");
}

#[tokio::test]
async fn attached_callers_share_the_error() {
    let dedup = RequestDeduplicator::default();
    let counter = Arc::new(AtomicUsize::new(0));
    let params = json!({"id": "n1"});

    let failing = |counter: Arc<AtomicUsize>| async move {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        Err::<Value, _>(GatewayError::overload("upstream returned 503"))
    };

    let (a, b) = tokio::join!(
        dedup.execute("get_node", &params, "ada", || failing(counter.clone())),
        dedup.execute("get_node", &params, "ada", || failing(counter.clone())),
    );

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    let (a, b) = (a.unwrap_err(), b.unwrap_err());
    assert_eq!(a, b);
    assert!(a.overloaded);
}

#[tokio::test]
async fn different_identities_do_not_share() {
    let dedup = RequestDeduplicator::default();
    let counter = Arc::new(AtomicUsize::new(0));
    let params = json!({"query": "test"});

    let _ = tokio::join!(
        dedup.execute("search_nodes", &params, "ada", || slow_ok(counter.clone(), json!(1))),
        dedup.execute("search_nodes", &params, "bob", || slow_ok(counter.clone(), json!(2))),
    );
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn key_ignores_parameter_order() {
    let a = RequestDeduplicator::key_for("search_nodes", &json!({"query": "x", "limit": 5}), "ada");
    let b = RequestDeduplicator::key_for("search_nodes", &json!({"limit": 5, "query": "x"}), "ada");
    assert_eq!(a, b);
    assert!(a.starts_with("dedup:"));
}

#[tokio::test]
async fn non_whitelisted_methods_always_execute() {
    let dedup = RequestDeduplicator::default();
    let counter = Arc::new(AtomicUsize::new(0));
    let params = json!({"name": "Draft"});

    assert!(!dedup.should_deduplicate("create_node", &params));
    let _ = tokio::join!(
        dedup.execute("create_node", &params, "ada", || slow_ok(counter.clone(), json!(1))),
        dedup.execute("create_node", &params, "ada", || slow_ok(counter.clone(), json!(2))),
    );
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn oversized_params_bypass() {
    let dedup = RequestDeduplicator::default();
    let big = json!({"query": "x".repeat(4096)});
    assert!(!dedup.should_deduplicate("search_nodes", &big));
    assert!(dedup.should_deduplicate("search_nodes", &json!({"query": "x"})));
    assert!(!dedup.should_deduplicate("search_nodes", &json!({"query": "x", "no_cache": true})));
}

#[tokio::test]
async fn observers_counted_while_in_flight() {
    let dedup = Arc::new(RequestDeduplicator::default());
    let params = json!({"id": "n1"});
    let key = RequestDeduplicator::key_for("get_node", &params, "ada");
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    let first = {
        let dedup = dedup.clone();
        let params = params.clone();
        tokio::spawn(async move {
            dedup
                .execute("get_node", &params, "ada", move || async move {
                    let _ = release_rx.await;
                    Ok(json!({"id": "n1"}))
                })
                .await
        })
    };
    while dedup.in_flight() == 0 {
        tokio::task::yield_now().await;
    }

    let second = {
        let dedup = dedup.clone();
        let params = params.clone();
        tokio::spawn(async move {
            dedup
                .execute("get_node", &params, "ada", || async { Ok(json!("unused")) })
                .await
        })
    };
    while dedup.observer_count(&key) != Some(2) {
        tokio::task::yield_now().await;
    }

    release_tx.send(()).unwrap();
    assert_eq!(first.await.unwrap().unwrap(), json!({"id": "n1"}));
    assert_eq!(second.await.unwrap().unwrap(), json!({"id": "n1"}));
    assert_eq!(dedup.in_flight(), 0);
}

#[tokio::test]
async fn sweep_drops_stale_entries() {
    let dedup = Arc::new(RequestDeduplicator::new(DedupConfig {
        max_age: Duration::from_millis(10),
        ..DedupConfig::default()
    }));
    let params = json!({});
    let (_hold, hold_rx) = tokio::sync::oneshot::channel::<()>();

    let stuck = {
        let dedup = dedup.clone();
        tokio::spawn(async move {
            dedup
                .execute("list_nodes", &params, "ada", move || async move {
                    let _ = hold_rx.await;
                    Ok(json!([]))
                })
                .await
        })
    };
    while dedup.in_flight() == 0 {
        tokio::task::yield_now().await;
    }

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(dedup.sweep_stale(), 1);
    assert_eq!(dedup.in_flight(), 0);
    stuck.abort();
}

#[tokio::test]
async fn dispatcher_collapses_concurrent_tool_calls() {
    let h = harness();
    h.upstream.set_delay(Duration::from_millis(50));
    let transport = TransportContext {
        bearer_token: Some(API_KEY.to_string()),
        ..TransportContext::default()
    };
    let line = tool_call(1, "search_nodes", json!({"query": "test"}));

    let (a, b, c) = tokio::join!(
        h.dispatcher.handle_payload(&line, &transport),
        h.dispatcher.handle_payload(&line, &transport),
        h.dispatcher.handle_payload(&line, &transport),
    );

    assert_eq!(h.upstream.calls("search_nodes"), 1);
    for out in [a, b, c] {
        let resp = serde_json::to_value(&out[0]).unwrap();
        assert_eq!(resp["result"]["structuredContent"]["nodes"][0]["id"], "n2");
    }
}

//! HTTP and Server-Sent Events transport.
//!
//! `POST /mcp` carries newline-delimited JSON-RPC envelopes. `/sse` frames
//! the same responses as `message` events. `GET /health` is unauthenticated.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{self, StreamExt};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::credentials::TransportContext;
use crate::handlers::Dispatcher;
use crate::protocol::JsonRpcResponse;

pub const USERNAME_HEADER: &str = "x-workflowy-username";
pub const PASSWORD_HEADER: &str = "x-workflowy-password";

const EVENT_STREAM: &str = "text/event-stream";
const NDJSON: &str = "application/x-ndjson";

pub fn router(dispatcher: Dispatcher) -> Router {
    Router::new()
        .route("/mcp", post(mcp))
        .route("/sse", get(sse_connect).post(sse_message))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(dispatcher)
}

pub async fn serve(addr: SocketAddr, dispatcher: Dispatcher) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "serving MCP over HTTP");
    axum::serve(listener, router(dispatcher)).await?;
    Ok(())
}

async fn mcp(State(dispatcher): State<Dispatcher>, headers: HeaderMap, body: String) -> Response {
    let transport = transport_context(&headers);
    let mut responses = dispatcher.handle_payload(&body, &transport).await;
    match responses.len() {
        0 => StatusCode::ACCEPTED.into_response(),
        1 => Json(responses.remove(0)).into_response(),
        _ => ndjson(&responses),
    }
}

/// Long-lived stream: announces the message endpoint, then keeps alive.
async fn sse_connect(headers: HeaderMap) -> Response {
    if !accepts_event_stream(&headers) {
        return not_acceptable();
    }
    let endpoint = Event::default().event("endpoint").data("/sse");
    let events = stream::once(async move { Ok::<_, Infallible>(endpoint) }).chain(stream::pending());
    Sse::new(events).keep_alive(KeepAlive::default()).into_response()
}

async fn sse_message(State(dispatcher): State<Dispatcher>, headers: HeaderMap, body: String) -> Response {
    if !accepts_event_stream(&headers) {
        return not_acceptable();
    }
    let transport = transport_context(&headers);
    let responses = dispatcher.handle_payload(&body, &transport).await;
    let events: Vec<Result<Event, Infallible>> = responses
        .iter()
        .filter_map(|resp| match Event::default().event("message").json_data(resp) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                error!(error = %e, "failed to encode SSE event");
                None
            }
        })
        .collect();
    Sse::new(stream::iter(events)).into_response()
}

async fn health(State(dispatcher): State<Dispatcher>) -> Response {
    let report = dispatcher.health().await;
    let status = if report.is_ok() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

fn ndjson(responses: &[JsonRpcResponse]) -> Response {
    let mut body = String::new();
    for resp in responses {
        match serde_json::to_string(resp) {
            Ok(line) => {
                body.push_str(&line);
                body.push('\n');
            }
            Err(e) => error!(error = %e, "failed to encode response"),
        }
    }
    ([(header::CONTENT_TYPE, NDJSON)], body).into_response()
}

fn not_acceptable() -> Response {
    (StatusCode::NOT_ACCEPTABLE, "Accept: text/event-stream required").into_response()
}

fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.contains(EVENT_STREAM))
}

/// Caller identity hints carried by HTTP headers.
pub fn transport_context(headers: &HeaderMap) -> TransportContext {
    let bearer_token = header_value(headers, header::AUTHORIZATION.as_str()).and_then(|v| {
        let (scheme, token) = v.split_once(' ')?;
        scheme
            .eq_ignore_ascii_case("bearer")
            .then(|| token.trim().to_string())
            .filter(|t| !t.is_empty())
    });
    TransportContext {
        bearer_token,
        username: header_value(headers, USERNAME_HEADER).map(String::from),
        password: header_value(headers, PASSWORD_HEADER).map(String::from),
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

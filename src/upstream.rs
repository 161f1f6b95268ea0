//! Workflowy API access.
//!
//! Failures are classified into [`GatewayError`] kinds here, at the point
//! the HTTP status is known, so retry and dispatch never string-match.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode, Url};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::credentials::Credentials;
use crate::error::GatewayError;
use crate::protocol::{
    CreateNodeParams, DeleteNodeParams, GetNodeParams, ListNodesParams, MoveNodeParams,
    SearchNodesParams, SetCompletionParams, UpdateNodeParams,
};

pub const DEFAULT_API_URL: &str = "https://workflowy.com/api/v1";

/// Upstream outline service primitives.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn list_nodes(&self, credentials: &Credentials, params: &ListNodesParams) -> Result<Value, GatewayError>;
    async fn search_nodes(&self, credentials: &Credentials, params: &SearchNodesParams) -> Result<Value, GatewayError>;
    async fn get_node(&self, credentials: &Credentials, params: &GetNodeParams) -> Result<Value, GatewayError>;
    async fn create_node(&self, credentials: &Credentials, params: &CreateNodeParams) -> Result<Value, GatewayError>;
    async fn update_node(&self, credentials: &Credentials, params: &UpdateNodeParams) -> Result<Value, GatewayError>;
    async fn delete_node(&self, credentials: &Credentials, params: &DeleteNodeParams) -> Result<Value, GatewayError>;
    async fn move_node(&self, credentials: &Credentials, params: &MoveNodeParams) -> Result<Value, GatewayError>;
    async fn set_completion(&self, credentials: &Credentials, params: &SetCompletionParams) -> Result<Value, GatewayError>;

    /// Reachability probe for `/health`. Unauthenticated.
    async fn ping(&self) -> Result<(), GatewayError>;
}

/// `reqwest` client for the Workflowy REST API, authenticating with
/// HTTP basic auth per call.
#[derive(Debug, Clone)]
pub struct HttpUpstreamClient {
    http: reqwest::Client,
    base_url: Url,
}

impl HttpUpstreamClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| GatewayError::internal(format!("invalid upstream URL {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(GatewayError::internal(format!("upstream URL {base_url} cannot be a base")));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("mcp-workflowy-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::internal(format!("build HTTP client: {e}")))?;
        Ok(Self { http, base_url })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn send(
        &self,
        credentials: &Credentials,
        method: Method,
        url: Url,
        query: &[(&str, String)],
        body: Option<Value>,
    ) -> Result<Value, GatewayError> {
        let (Some(username), Some(password)) =
            (credentials.username.as_deref(), credentials.password.as_deref())
        else {
            return Err(GatewayError::auth("missing Workflowy credentials"));
        };

        debug!(%method, path = url.path(), "upstream request");
        let mut request = self
            .http
            .request(method, url)
            .basic_auth(username, Some(password));
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        if status.is_success() {
            let text = response.text().await.map_err(classify_transport)?;
            if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
                return Ok(json!({ "ok": true }));
            }
            return serde_json::from_str(&text)
                .map_err(|e| GatewayError::internal(format!("invalid upstream JSON: {e}")));
        }

        let retry_after = parse_retry_after(response.headers());
        let detail = response.text().await.unwrap_or_default();
        let mut err = GatewayError::from_status(status.as_u16(), status_message(status, &detail));
        if let Some(retry_after) = retry_after {
            err = err.with_retry_after(retry_after);
        }
        Err(err)
    }
}

fn to_body<T: Serialize>(value: &T) -> Result<Value, GatewayError> {
    serde_json::to_value(value)
        .map_err(|e| GatewayError::internal(format!("serialize request body: {e}")))
}

#[derive(Serialize)]
struct NodeUpdate<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<&'a str>,
}

#[async_trait]
impl UpstreamClient for HttpUpstreamClient {
    async fn list_nodes(&self, credentials: &Credentials, params: &ListNodesParams) -> Result<Value, GatewayError> {
        let mut query = Vec::new();
        if let Some(parent_id) = &params.parent_id {
            query.push(("parent_id", parent_id.clone()));
        }
        if let Some(limit) = params.limit {
            query.push(("limit", limit.to_string()));
        }
        self.send(credentials, Method::GET, self.url(&["nodes"]), &query, None)
            .await
    }

    async fn search_nodes(&self, credentials: &Credentials, params: &SearchNodesParams) -> Result<Value, GatewayError> {
        let mut query = vec![("q", params.query.clone())];
        if let Some(limit) = params.limit {
            query.push(("limit", limit.to_string()));
        }
        self.send(credentials, Method::GET, self.url(&["nodes", "search"]), &query, None)
            .await
    }

    async fn get_node(&self, credentials: &Credentials, params: &GetNodeParams) -> Result<Value, GatewayError> {
        self.send(credentials, Method::GET, self.url(&["nodes", &params.id]), &[], None)
            .await
    }

    async fn create_node(&self, credentials: &Credentials, params: &CreateNodeParams) -> Result<Value, GatewayError> {
        self.send(credentials, Method::POST, self.url(&["nodes"]), &[], Some(to_body(params)?))
            .await
    }

    async fn update_node(&self, credentials: &Credentials, params: &UpdateNodeParams) -> Result<Value, GatewayError> {
        let update = NodeUpdate {
            name: params.name.as_deref(),
            note: params.note.as_deref(),
        };
        self.send(credentials, Method::PATCH, self.url(&["nodes", &params.id]), &[], Some(to_body(&update)?))
            .await
    }

    async fn delete_node(&self, credentials: &Credentials, params: &DeleteNodeParams) -> Result<Value, GatewayError> {
        self.send(credentials, Method::DELETE, self.url(&["nodes", &params.id]), &[], None)
            .await
    }

    async fn move_node(&self, credentials: &Credentials, params: &MoveNodeParams) -> Result<Value, GatewayError> {
        let body = json!({ "parent_id": params.parent_id, "position": params.position });
        self.send(credentials, Method::POST, self.url(&["nodes", &params.id, "move"]), &[], Some(body))
            .await
    }

    async fn set_completion(&self, credentials: &Credentials, params: &SetCompletionParams) -> Result<Value, GatewayError> {
        let action = if params.completed { "complete" } else { "uncomplete" };
        self.send(credentials, Method::POST, self.url(&["nodes", &params.id, action]), &[], None)
            .await
    }

    async fn ping(&self) -> Result<(), GatewayError> {
        let response = self
            .http
            .get(self.base_url.clone())
            .send()
            .await
            .map_err(classify_transport)?;
        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::from_status(status.as_u16(), status_message(status, "")));
        }
        Ok(())
    }
}

fn classify_transport(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::network(format!("upstream request timed out: {e}"))
    } else if e.is_connect() || e.is_request() {
        GatewayError::network(format!("upstream connection failed: {e}"))
    } else if e.is_decode() {
        GatewayError::internal(format!("failed to read upstream response: {e}"))
    } else {
        GatewayError::network(e.to_string())
    }
}

/// `Retry-After` in delta-seconds form.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn status_message(status: StatusCode, detail: &str) -> String {
    let reason = status.canonical_reason().unwrap_or("unexpected status");
    let detail = detail.trim();
    if detail.is_empty() {
        format!("upstream returned {} {reason}", status.as_u16())
    } else {
        let detail: String = detail.chars().take(200).collect();
        format!("upstream returned {} {reason}: {detail}", status.as_u16())
    }
}

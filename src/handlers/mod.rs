pub mod health;
pub mod nodes;
pub mod tools;

use std::sync::Arc;

use futures_util::future::join_all;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::cache::ResponseCache;
use crate::credentials::{strip_credential_fields, CredentialResolver, TransportContext};
use crate::dedup::RequestDeduplicator;
use crate::error::GatewayError;
use crate::protocol::{
    InitializeParams, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ToolCallParams, ToolResult,
    PROTOCOL_VERSION,
};
use crate::retry::RetryEngine;
use crate::upstream::UpstreamClient;

use self::health::HealthReport;
use self::tools::{ToolContext, ToolRegistry};

pub const SERVER_NAME: &str = "mcp-workflowy-gateway";

#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchOptions {
    /// Reject `tools/call` unless a valid token proves identity.
    pub require_auth: bool,
    /// Attach error debug detail to JSON-RPC errors (non-production).
    pub include_detail: bool,
}

/// JSON-RPC state machine shared by every transport.
///
/// Stateless across messages; all shared state lives in the injected
/// cache and deduplicator.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    resolver: Arc<CredentialResolver>,
    upstream: Arc<dyn UpstreamClient>,
    dedup: Arc<RequestDeduplicator>,
    cache: Option<Arc<ResponseCache>>,
    retry: RetryEngine,
    options: DispatchOptions,
}

impl Dispatcher {
    pub fn new(
        registry: ToolRegistry,
        resolver: CredentialResolver,
        upstream: Arc<dyn UpstreamClient>,
        dedup: Arc<RequestDeduplicator>,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            resolver: Arc::new(resolver),
            upstream,
            dedup,
            cache: None,
            retry: RetryEngine::default(),
            options: DispatchOptions::default(),
        }
    }

    pub fn with_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    pub fn with_retry(mut self, retry: RetryEngine) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> DispatchOptions {
        self.options
    }

    pub fn dedup(&self) -> &Arc<RequestDeduplicator> {
        &self.dedup
    }

    pub fn resolver(&self) -> &CredentialResolver {
        &self.resolver
    }

    pub async fn health(&self) -> HealthReport {
        health::report(self.upstream.as_ref()).await
    }

    /// Handle a physical payload of newline-delimited envelopes.
    ///
    /// Responses come back in request order; a failing envelope never
    /// affects its neighbours. Notifications contribute nothing. A payload
    /// with no envelope at all is a parse error.
    pub async fn handle_payload(&self, raw: &str, transport: &TransportContext) -> Vec<JsonRpcResponse> {
        let lines: Vec<&str> = raw.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if lines.is_empty() {
            debug!("empty payload");
            return vec![JsonRpcResponse::error(None, JsonRpcError::parse_error())];
        }
        join_all(lines.into_iter().map(|line| self.handle_line(line, transport)))
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Handle one serialized envelope.
    pub async fn handle_line(&self, line: &str, transport: &TransportContext) -> Option<JsonRpcResponse> {
        let req: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(r) => r,
            Err(e) => {
                debug!(error = %e, "unparseable envelope");
                return Some(JsonRpcResponse::error(None, JsonRpcError::parse_error()));
            }
        };
        self.dispatch(&req, transport).await
    }

    /// Dispatch a JSON-RPC request to the appropriate handler.
    ///
    /// Returns `None` for notifications (no response required). An id-less
    /// request outside `notifications/*` still runs; its outcome is dropped.
    pub async fn dispatch(&self, req: &JsonRpcRequest, transport: &TransportContext) -> Option<JsonRpcResponse> {
        if req.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(req.id.clone(), JsonRpcError::invalid_request()));
        }
        if req.is_notification() {
            debug!(method = %req.method, "notification");
            if !req.method.starts_with("notifications/") {
                self.respond(req, transport).await;
            }
            return None;
        }
        Some(self.respond(req, transport).await)
    }

    async fn respond(&self, req: &JsonRpcRequest, transport: &TransportContext) -> JsonRpcResponse {
        match req.method.as_str() {
            "initialize" => JsonRpcResponse::success(req.id.clone(), self.initialize(req)),

            "ping" => JsonRpcResponse::success(req.id.clone(), json!({})),

            "tools/list" => {
                let tools: Vec<Value> = self.registry.iter().map(|t| t.catalogue_entry()).collect();
                JsonRpcResponse::success(req.id.clone(), json!({ "tools": tools }))
            }

            "tools/call" => match self.call_tool(req.params.as_ref(), transport).await {
                Ok(result) => JsonRpcResponse::success(req.id.clone(), result),
                Err(error) => JsonRpcResponse::error(req.id.clone(), error),
            },

            _ => JsonRpcResponse::error(req.id.clone(), JsonRpcError::method_not_found(&req.method)),
        }
    }

    fn initialize(&self, req: &JsonRpcRequest) -> Value {
        let params: InitializeParams = req
            .params
            .clone()
            .and_then(|p| serde_json::from_value(p).ok())
            .unwrap_or_default();
        if let Some(client) = &params.client_info {
            debug!(
                client = client.name.as_deref().unwrap_or("unknown"),
                version = client.version.as_deref().unwrap_or("unknown"),
                requested = params.protocol_version.as_deref().unwrap_or(PROTOCOL_VERSION),
                "initialize"
            );
        }
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            }
        })
    }

    async fn call_tool(&self, params: Option<&Value>, transport: &TransportContext) -> Result<Value, JsonRpcError> {
        let params: ToolCallParams = match params {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| JsonRpcError::invalid_params(format!("Invalid tools/call params: {e}")))?,
            None => return Err(JsonRpcError::invalid_params("Missing params for tools/call")),
        };
        let arguments = match params.arguments {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(self.rpc_error(&GatewayError::validation("arguments must be an object")));
            }
        };

        let resolution = self.resolver.resolve(&arguments, transport).await;
        if self.options.require_auth && resolution.authenticated_by.is_none() {
            warn!(tool = %params.name, "rejected unauthenticated tool call");
            return Err(self.rpc_error(&GatewayError::auth(
                "a valid bearer token or authorization_token is required",
            )));
        }

        let Some(tool) = self.registry.get(&params.name) else {
            return Err(self.rpc_error(&GatewayError::validation(format!(
                "unknown tool: {}",
                params.name
            ))));
        };

        let mut arguments = Value::Object(arguments);
        tool.validate(&arguments).map_err(|e| self.rpc_error(&e))?;
        if let Some(map) = arguments.as_object_mut() {
            strip_credential_fields(map);
        }

        let credentials = resolution.credentials;
        let identity = credentials.cache_identity();
        let name = tool.name();
        debug!(
            tool = name,
            user = credentials.identity(),
            kind = ?tool.kind(),
            preset = tool.preset().name(),
            "tool call"
        );

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(name, &arguments, &identity).await {
                return tool_result(hit);
            }
        }

        let ctx = ToolContext {
            upstream: Arc::clone(&self.upstream),
            retry: self.retry,
            retry_config: tool.preset().config(),
            credentials,
            arguments: arguments.clone(),
        };
        let data = self
            .dedup
            .execute(name, &arguments, &identity, || tool.invoke(ctx))
            .await
            .map_err(|e| {
                warn!(tool = name, error = %e, "tool call failed");
                self.rpc_error(&e)
            })?;

        if let Some(cache) = &self.cache {
            cache.set(name, &arguments, &data, None, &identity).await;
        }
        tool_result(data)
    }

    fn rpc_error(&self, err: &GatewayError) -> JsonRpcError {
        JsonRpcError::from_gateway(err, self.options.include_detail)
    }
}

fn tool_result(data: Value) -> Result<Value, JsonRpcError> {
    serde_json::to_value(ToolResult::json(data))
        .map_err(|e| JsonRpcError::internal_error(format!("Internal error: {e}")))
}

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::tools::{ToolContext, ToolFuture};
use crate::credentials::Credentials;
use crate::error::GatewayError;
use crate::protocol::{
    CreateNodeParams, DeleteNodeParams, GetNodeParams, ListNodesParams, MoveNodeParams,
    SearchNodesParams, SetCompletionParams, UpdateNodeParams,
};
use crate::upstream::UpstreamClient;

/// Decode arguments into `P` and run `op` through the retry engine.
async fn call<P, F>(ctx: ToolContext, op: F) -> Result<Value, GatewayError>
where
    P: DeserializeOwned + Send + Sync,
    F: for<'a> Fn(&'a dyn UpstreamClient, &'a Credentials, &'a P) -> BoxFuture<'a, Result<Value, GatewayError>>
        + Send
        + Sync,
{
    let params: P = serde_json::from_value(ctx.arguments)
        .map_err(|e| GatewayError::validation(e.to_string()))?;
    let upstream = ctx.upstream.as_ref();
    let credentials = &ctx.credentials;
    ctx.retry
        .run(&ctx.retry_config, || op(upstream, credentials, &params))
        .await
}

pub fn list_nodes(ctx: ToolContext) -> ToolFuture {
    Box::pin(call(ctx, |up, creds, p: &ListNodesParams| up.list_nodes(creds, p)))
}

pub fn search_nodes(ctx: ToolContext) -> ToolFuture {
    Box::pin(call(ctx, |up, creds, p: &SearchNodesParams| up.search_nodes(creds, p)))
}

pub fn get_node(ctx: ToolContext) -> ToolFuture {
    Box::pin(call(ctx, |up, creds, p: &GetNodeParams| up.get_node(creds, p)))
}

pub fn create_node(ctx: ToolContext) -> ToolFuture {
    Box::pin(call(ctx, |up, creds, p: &CreateNodeParams| up.create_node(creds, p)))
}

pub fn update_node(ctx: ToolContext) -> ToolFuture {
    Box::pin(call(ctx, |up, creds, p: &UpdateNodeParams| up.update_node(creds, p)))
}

pub fn delete_node(ctx: ToolContext) -> ToolFuture {
    Box::pin(call(ctx, |up, creds, p: &DeleteNodeParams| up.delete_node(creds, p)))
}

pub fn move_node(ctx: ToolContext) -> ToolFuture {
    Box::pin(call(ctx, |up, creds, p: &MoveNodeParams| up.move_node(creds, p)))
}

pub fn set_completion(ctx: ToolContext) -> ToolFuture {
    Box::pin(call(ctx, |up, creds, p: &SetCompletionParams| up.set_completion(creds, p)))
}

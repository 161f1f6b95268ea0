//! MCP gateway for the Workflowy outline service.
//!
//! Exposes node tools (`list_nodes`, `search_nodes`, `get_node`,
//! `create_node`, `update_node`, `delete_node`, `move_node`,
//! `set_completion`) over JSON-RPC 2.0, on stdio or HTTP/SSE. Upstream
//! calls go through retry with backoff, concurrent identical reads are
//! deduplicated and read results are cached with per-tool TTLs.

pub mod cache;
pub mod config;
pub mod credentials;
pub mod dedup;
pub mod error;
pub mod handlers;
pub mod http;
pub mod keys;
pub mod protocol;
pub mod retry;
pub mod server;
pub mod upstream;

pub mod schema;

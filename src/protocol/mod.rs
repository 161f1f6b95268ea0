pub mod request;
pub mod response;

pub use request::{
    ClientInfo, CreateNodeParams, DeleteNodeParams, GetNodeParams, InitializeParams,
    JsonRpcRequest, ListNodesParams, MoveNodeParams, Position, RpcId, SearchNodesParams,
    SetCompletionParams, ToolCallParams, UpdateNodeParams,
};
pub use response::{JsonRpcError, JsonRpcResponse, ToolResult, ToolResultContent, AUTH_METHODS};

/// MCP protocol revision advertised by `initialize` and `/health`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

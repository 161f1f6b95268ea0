use std::sync::Arc;

use futures_util::future::BoxFuture;
use jsonschema::Validator;
use serde_json::{json, Value};

use super::nodes;
use crate::credentials::{Credentials, AUTHORIZATION_TOKEN_FIELD, PASSWORD_FIELD, USERNAME_FIELD};
use crate::error::GatewayError;
use crate::retry::{RetryConfig, RetryEngine, RetryPreset};
use crate::schema::{self, SchemaValidationError};
use crate::upstream::UpstreamClient;

pub type ToolFuture = BoxFuture<'static, Result<Value, GatewayError>>;

/// Entry point of a tool. Receives arguments with credential fields stripped.
pub type ToolHandler = fn(ToolContext) -> ToolFuture;

/// Everything a handler needs for one invocation.
pub struct ToolContext {
    pub upstream: Arc<dyn UpstreamClient>,
    pub retry: RetryEngine,
    pub retry_config: RetryConfig,
    pub credentials: Credentials,
    pub arguments: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Read,
    Write,
}

/// Registration input. Every field is mandatory.
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
    pub kind: ToolKind,
    pub preset: RetryPreset,
    pub handler: ToolHandler,
}

pub struct ToolDescriptor {
    name: String,
    description: String,
    input_schema: Value,
    kind: ToolKind,
    preset: RetryPreset,
    handler: ToolHandler,
    validator: Validator,
}

impl ToolDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ToolKind {
        self.kind
    }

    pub fn preset(&self) -> RetryPreset {
        self.preset
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    pub fn validate(&self, arguments: &Value) -> Result<(), GatewayError> {
        schema::validate(&self.validator, arguments).map_err(|e| {
            GatewayError::validation(format!("invalid arguments for {}: {e}", self.name))
        })
    }

    pub fn invoke(&self, ctx: ToolContext) -> ToolFuture {
        (self.handler)(ctx)
    }

    /// `tools/list` entry.
    pub fn catalogue_entry(&self) -> Value {
        json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input_schema,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool {0} registered twice")]
    Duplicate(String),
    #[error("tool {name}: {source}")]
    Schema {
        name: String,
        #[source]
        source: SchemaValidationError,
    },
}

/// Closed set of tools, in registration order.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDescriptor>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, compiling its schema up front.
    ///
    /// Credential fields are appended to the schema's properties so they
    /// pass validation on every tool.
    pub fn register(&mut self, spec: ToolSpec) -> Result<(), RegistryError> {
        if self.get(spec.name).is_some() {
            return Err(RegistryError::Duplicate(spec.name.to_string()));
        }
        let input_schema = with_credential_fields(spec.input_schema);
        let validator = schema::compile(&input_schema).map_err(|source| RegistryError::Schema {
            name: spec.name.to_string(),
            source,
        })?;
        self.tools.push(ToolDescriptor {
            name: spec.name.to_string(),
            description: spec.description.to_string(),
            input_schema,
            kind: spec.kind,
            preset: spec.preset,
            handler: spec.handler,
            validator,
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The Workflowy node tools.
    pub fn workflowy() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for spec in workflowy_specs() {
            registry.register(spec)?;
        }
        Ok(registry)
    }
}

fn with_credential_fields(mut schema: Value) -> Value {
    if let Some(obj) = schema.as_object_mut() {
        let properties = obj
            .entry("properties")
            .or_insert_with(|| json!({}));
        if let Some(props) = properties.as_object_mut() {
            props.insert(
                AUTHORIZATION_TOKEN_FIELD.into(),
                json!({"type": "string", "description": "Bearer token (API key, connector token or OAuth access token)"}),
            );
            props.insert(
                USERNAME_FIELD.into(),
                json!({"type": "string", "description": "Workflowy username"}),
            );
            props.insert(
                PASSWORD_FIELD.into(),
                json!({"type": "string", "description": "Workflowy password"}),
            );
        }
    }
    schema
}

fn position_schema() -> Value {
    json!({"type": "string", "enum": ["top", "bottom"], "description": "Placement among siblings"})
}

fn workflowy_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "list_nodes",
            description: "List the children of a node, or the top-level nodes when no parent is given",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "parent_id": {"type": "string", "description": "Parent node id"},
                    "limit": {"type": "integer", "minimum": 1}
                }
            }),
            kind: ToolKind::Read,
            preset: RetryPreset::Standard,
            handler: nodes::list_nodes,
        },
        ToolSpec {
            name: "search_nodes",
            description: "Search nodes by text",
            input_schema: json!({
                "type": "object",
                "required": ["query"],
                "properties": {
                    "query": {"type": "string", "minLength": 1},
                    "limit": {"type": "integer", "minimum": 1}
                }
            }),
            kind: ToolKind::Read,
            preset: RetryPreset::Standard,
            handler: nodes::search_nodes,
        },
        ToolSpec {
            name: "get_node",
            description: "Fetch a single node by id",
            input_schema: json!({
                "type": "object",
                "required": ["id"],
                "properties": {"id": {"type": "string", "minLength": 1}}
            }),
            kind: ToolKind::Read,
            preset: RetryPreset::Quick,
            handler: nodes::get_node,
        },
        ToolSpec {
            name: "create_node",
            description: "Create a node",
            input_schema: json!({
                "type": "object",
                "required": ["name"],
                "properties": {
                    "name": {"type": "string"},
                    "parent_id": {"type": "string"},
                    "note": {"type": "string"},
                    "position": position_schema()
                }
            }),
            kind: ToolKind::Write,
            preset: RetryPreset::Write,
            handler: nodes::create_node,
        },
        ToolSpec {
            name: "update_node",
            description: "Update a node's name or note",
            input_schema: json!({
                "type": "object",
                "required": ["id"],
                "properties": {
                    "id": {"type": "string", "minLength": 1},
                    "name": {"type": "string"},
                    "note": {"type": "string"}
                }
            }),
            kind: ToolKind::Write,
            preset: RetryPreset::Write,
            handler: nodes::update_node,
        },
        ToolSpec {
            name: "delete_node",
            description: "Delete a node and its children",
            input_schema: json!({
                "type": "object",
                "required": ["id"],
                "properties": {"id": {"type": "string", "minLength": 1}}
            }),
            kind: ToolKind::Write,
            preset: RetryPreset::Write,
            handler: nodes::delete_node,
        },
        ToolSpec {
            name: "move_node",
            description: "Move a node under a new parent",
            input_schema: json!({
                "type": "object",
                "required": ["id", "parent_id"],
                "properties": {
                    "id": {"type": "string", "minLength": 1},
                    "parent_id": {"type": "string", "minLength": 1},
                    "position": position_schema()
                }
            }),
            kind: ToolKind::Write,
            preset: RetryPreset::Write,
            handler: nodes::move_node,
        },
        ToolSpec {
            name: "set_completion",
            description: "Mark a node complete or not complete",
            input_schema: json!({
                "type": "object",
                "required": ["id", "completed"],
                "properties": {
                    "id": {"type": "string", "minLength": 1},
                    "completed": {"type": "boolean"}
                }
            }),
            kind: ToolKind::Write,
            preset: RetryPreset::Write,
            handler: nodes::set_completion,
        },
    ]
}

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::credentials::Credentials;
use crate::handlers::DispatchOptions;
use crate::upstream::DEFAULT_API_URL;

/// Default upstream request timeout (30 seconds).
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;

const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8787";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Stdio,
    Http,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMode {
    Memory,
    File,
    Off,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub required: bool,
    pub api_keys: Vec<String>,
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub transport: Transport,
    pub http_addr: SocketAddr,
    pub environment: Environment,
    pub auth: AuthConfig,
    pub default_credentials: Credentials,
    pub upstream_url: String,
    pub upstream_timeout: Duration,
    pub cache: CacheMode,
    pub cache_dir: PathBuf,
}

impl ServerConfig {
    /// Load configuration from the process environment.
    ///
    /// - `WORKFLOWY_MCP_TRANSPORT` (`stdio` | `http`, default `stdio`)
    /// - `WORKFLOWY_MCP_ADDR` (default `127.0.0.1:8787`)
    /// - `WORKFLOWY_MCP_ENV` (`production` | `development`, default `production`)
    /// - `WORKFLOWY_MCP_API_KEYS` comma-separated allow-list
    /// - `WORKFLOWY_MCP_REQUIRE_AUTH` (default: true for http, false for stdio)
    /// - `WORKFLOWY_USERNAME` / `WORKFLOWY_PASSWORD` fallback credentials
    /// - `WORKFLOWY_API_URL`, `WORKFLOWY_UPSTREAM_TIMEOUT_SECS` (default 30)
    /// - `WORKFLOWY_MCP_CACHE` (`memory` | `file` | `off`, default `memory`)
    /// - `WORKFLOWY_MCP_CACHE_DIR` for the file cache
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let transport = match get("WORKFLOWY_MCP_TRANSPORT").as_deref() {
            None | Some("stdio") => Transport::Stdio,
            Some("http") => Transport::Http,
            Some(other) => {
                return Err(format!("WORKFLOWY_MCP_TRANSPORT must be stdio or http, got {other:?}"));
            }
        };

        let http_addr = get("WORKFLOWY_MCP_ADDR")
            .unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string())
            .parse::<SocketAddr>()
            .map_err(|_| "WORKFLOWY_MCP_ADDR must be a socket address such as 127.0.0.1:8787".to_string())?;

        let environment = match get("WORKFLOWY_MCP_ENV").as_deref() {
            None | Some("production") => Environment::Production,
            Some("development") => Environment::Development,
            Some(other) => {
                return Err(format!("WORKFLOWY_MCP_ENV must be production or development, got {other:?}"));
            }
        };

        let api_keys = get("WORKFLOWY_MCP_API_KEYS")
            .map(|keys| {
                keys.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let required = match get("WORKFLOWY_MCP_REQUIRE_AUTH") {
            None => transport == Transport::Http,
            Some(v) => parse_bool(&v)
                .ok_or_else(|| "WORKFLOWY_MCP_REQUIRE_AUTH must be true or false".to_string())?,
        };
        if required && transport == Transport::Stdio {
            return Err("authentication is not supported on the stdio transport".to_string());
        }

        let upstream_timeout_secs = match get("WORKFLOWY_UPSTREAM_TIMEOUT_SECS") {
            Some(val) => val
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or_else(|| "WORKFLOWY_UPSTREAM_TIMEOUT_SECS must be a positive integer".to_string())?,
            None => DEFAULT_UPSTREAM_TIMEOUT_SECS,
        };

        let cache = match get("WORKFLOWY_MCP_CACHE").as_deref() {
            None | Some("memory") => CacheMode::Memory,
            Some("file") => CacheMode::File,
            Some("off") => CacheMode::Off,
            Some(other) => {
                return Err(format!("WORKFLOWY_MCP_CACHE must be memory, file or off, got {other:?}"));
            }
        };

        let cache_dir = get("WORKFLOWY_MCP_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("mcp-workflowy-gateway"));

        Ok(Self {
            transport,
            http_addr,
            environment,
            auth: AuthConfig { required, api_keys },
            default_credentials: Credentials {
                username: get("WORKFLOWY_USERNAME"),
                password: get("WORKFLOWY_PASSWORD"),
            },
            upstream_url: get("WORKFLOWY_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            upstream_timeout: Duration::from_secs(upstream_timeout_secs),
            cache,
            cache_dir,
        })
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            require_auth: self.auth.required,
            include_detail: self.environment != Environment::Production,
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

/// Prefix identifying OAuth access tokens issued by this server.
pub const OAUTH_ACCESS_PREFIX: &str = "oauth_access_";

/// Workflowy credentials bound to an issued OAuth access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredToken {
    pub username: String,
    pub password: String,
    pub expires_at_ms: i64,
}

/// Server-side store of OAuth access tokens.
///
/// Populated by the authorization-code exchange; read by the resolver.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn get(&self, token: &str) -> Option<StoredToken>;
    async fn insert(&self, token: String, stored: StoredToken);
    async fn remove(&self, token: &str);
}

#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: RwLock<HashMap<String, StoredToken>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, token: &str) -> Option<StoredToken> {
        self.tokens.read().await.get(token).cloned()
    }

    async fn insert(&self, token: String, stored: StoredToken) {
        self.tokens.write().await.insert(token, stored);
    }

    async fn remove(&self, token: &str) {
        self.tokens.write().await.remove(token);
    }
}

//! Per-call credential resolution.
//!
//! Precedence, highest first:
//! 1. `authorization_token` argument (OAuth access token or connector token)
//! 2. `Authorization: Bearer` token from the transport
//! 3. `workflowy_username` / `workflowy_password` arguments
//! 4. transport credential headers
//! 5. process environment defaults
//!
//! An allow-listed API key authenticates the call but carries no
//! credentials, so resolution continues down the list.

pub mod store;
pub mod token;

use std::sync::Arc;

use mockable::Clock;
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::keys::{sha256_hex, ANONYMOUS};

pub use store::{MemoryTokenStore, StoredToken, TokenStore, OAUTH_ACCESS_PREFIX};
pub use token::{ConnectorClaims, ConnectorTokenCodec, TokenCodec, CONNECTOR_TOKEN_TTL};

pub const AUTHORIZATION_TOKEN_FIELD: &str = "authorization_token";
pub const USERNAME_FIELD: &str = "workflowy_username";
pub const PASSWORD_FIELD: &str = "workflowy_password";

/// Argument fields consumed by resolution and never forwarded to tools.
pub const CREDENTIAL_FIELDS: [&str; 3] = [AUTHORIZATION_TOKEN_FIELD, USERNAME_FIELD, PASSWORD_FIELD];

#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    /// Display identity for logs: the username, or `anonymous`.
    pub fn identity(&self) -> &str {
        self.username.as_deref().unwrap_or(ANONYMOUS)
    }

    /// Salt for dedup and cache keys.
    ///
    /// Covers the password as well as the username, so a caller naming
    /// someone else's account with the wrong password never shares their
    /// entries. The password only enters as a digest.
    pub fn cache_identity(&self) -> String {
        match (&self.username, &self.password) {
            (Some(user), Some(password)) => format!("{user}:{}", sha256_hex(password)),
            (Some(user), None) => user.clone(),
            (None, _) => ANONYMOUS.to_string(),
        }
    }
}

/// What the transport knows about the caller.
#[derive(Debug, Clone, Default)]
pub struct TransportContext {
    pub bearer_token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    ApiKey,
    ConnectorToken,
    OAuthToken,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub credentials: Credentials,
    /// Set when a valid token proved the caller's identity.
    pub authenticated_by: Option<AuthMethod>,
}

struct TokenGrant {
    method: AuthMethod,
    credentials: Option<Credentials>,
}

pub struct CredentialResolver {
    api_keys: Vec<String>,
    defaults: Credentials,
    codec: Arc<dyn TokenCodec>,
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl CredentialResolver {
    pub fn new(
        api_keys: Vec<String>,
        defaults: Credentials,
        codec: Arc<dyn TokenCodec>,
        store: Arc<dyn TokenStore>,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> Self {
        Self {
            api_keys,
            defaults,
            codec,
            store,
            clock,
        }
    }

    fn now_ms(&self) -> i64 {
        self.clock.utc().timestamp_millis()
    }

    /// Mint a connector token for `credentials`, valid for 30 days.
    pub fn issue_connector_token(&self, username: &str, password: &str) -> String {
        self.codec.encode(&ConnectorClaims {
            username: username.to_string(),
            password: password.to_string(),
            issued_at_ms: self.now_ms(),
        })
    }

    pub async fn resolve(&self, args: &Map<String, Value>, transport: &TransportContext) -> Resolution {
        let param_token = string_field(args, AUTHORIZATION_TOKEN_FIELD);
        let header_token = transport.bearer_token.as_deref().filter(|t| !t.is_empty());

        let mut authenticated_by = None;
        let mut token_credentials = None;
        for token in [param_token, header_token].into_iter().flatten() {
            let Some(grant) = self.check_token(token).await else {
                continue;
            };
            authenticated_by.get_or_insert(grant.method);
            if grant.credentials.is_some() {
                token_credentials = grant.credentials;
                break;
            }
        }

        let credentials = match token_credentials {
            Some(credentials) => credentials,
            None => Credentials {
                username: first_of(
                    string_field(args, USERNAME_FIELD),
                    transport.username.as_deref(),
                    self.defaults.username.as_deref(),
                ),
                password: first_of(
                    string_field(args, PASSWORD_FIELD),
                    transport.password.as_deref(),
                    self.defaults.password.as_deref(),
                ),
            },
        };

        Resolution {
            credentials,
            authenticated_by,
        }
    }

    async fn check_token(&self, token: &str) -> Option<TokenGrant> {
        if token.starts_with(OAUTH_ACCESS_PREFIX) {
            let stored = self.store.get(token).await?;
            if stored.expires_at_ms <= self.now_ms() {
                debug!("oauth access token expired; removing");
                self.store.remove(token).await;
                return None;
            }
            return Some(TokenGrant {
                method: AuthMethod::OAuthToken,
                credentials: Some(Credentials::new(stored.username, stored.password)),
            });
        }

        let presented = token.as_bytes();
        if self
            .api_keys
            .iter()
            .any(|key| bool::from(key.as_bytes().ct_eq(presented)))
        {
            return Some(TokenGrant {
                method: AuthMethod::ApiKey,
                credentials: None,
            });
        }

        let claims = self.codec.decode(token)?;
        if self.codec.is_expired(&claims, self.now_ms()) {
            debug!("connector token expired");
            return None;
        }
        Some(TokenGrant {
            method: AuthMethod::ConnectorToken,
            credentials: Some(Credentials::new(claims.username, claims.password)),
        })
    }
}

/// Remove credential fields so they never reach tool handlers or cache keys.
pub fn strip_credential_fields(args: &mut Map<String, Value>) {
    for field in CREDENTIAL_FIELDS {
        args.remove(field);
    }
}

fn string_field<'a>(args: &'a Map<String, Value>, field: &str) -> Option<&'a str> {
    args.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn first_of(a: Option<&str>, b: Option<&str>, c: Option<&str>) -> Option<String> {
    a.or(b).or(c).map(str::to_string)
}

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

/// Connector tokens expire this long after issuance.
pub const CONNECTOR_TOKEN_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Payload carried by a self-issued connector token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorClaims {
    pub username: String,
    pub password: String,
    pub issued_at_ms: i64,
}

/// Encoding of credential bundles into bearer tokens.
pub trait TokenCodec: Send + Sync {
    fn encode(&self, claims: &ConnectorClaims) -> String;

    /// `None` if `token` is not in this codec's format.
    fn decode(&self, token: &str) -> Option<ConnectorClaims>;

    fn is_expired(&self, claims: &ConnectorClaims, now_ms: i64) -> bool;
}

/// `base64(username:password:issuedAtMs)`.
///
/// The username may not contain `:`; the password may.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectorTokenCodec;

impl TokenCodec for ConnectorTokenCodec {
    fn encode(&self, claims: &ConnectorClaims) -> String {
        STANDARD.encode(format!(
            "{}:{}:{}",
            claims.username, claims.password, claims.issued_at_ms
        ))
    }

    fn decode(&self, token: &str) -> Option<ConnectorClaims> {
        let bytes = STANDARD.decode(token.trim()).ok()?;
        let raw = String::from_utf8(bytes).ok()?;

        let (rest, issued) = raw.rsplit_once(':')?;
        let issued_at_ms = issued.parse::<i64>().ok()?;
        let (username, password) = rest.split_once(':')?;
        if username.is_empty() || password.is_empty() {
            return None;
        }

        Some(ConnectorClaims {
            username: username.to_string(),
            password: password.to_string(),
            issued_at_ms,
        })
    }

    fn is_expired(&self, claims: &ConnectorClaims, now_ms: i64) -> bool {
        let ttl_ms = CONNECTOR_TOKEN_TTL.as_millis() as i64;
        now_ms.saturating_sub(claims.issued_at_ms) > ttl_ms || claims.issued_at_ms > now_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(password: &str) -> ConnectorClaims {
        ConnectorClaims {
            username: "ada@example.com".into(),
            password: password.into(),
            issued_at_ms: 1_700_000_000_000,
        }
    }

    #[test]
    fn password_may_contain_separator() {
        let codec = ConnectorTokenCodec;
        let c = claims("pa:ss:word");
        assert_eq!(codec.decode(&codec.encode(&c)), Some(c));
    }

    #[test]
    fn rejects_foreign_tokens() {
        let codec = ConnectorTokenCodec;
        assert_eq!(codec.decode("oauth_access_abc"), None);
        assert_eq!(codec.decode(&STANDARD.encode("user:pass:notanumber")), None);
        assert_eq!(codec.decode(&STANDARD.encode("nocolons")), None);
    }

    #[test]
    fn expires_after_thirty_days() {
        let codec = ConnectorTokenCodec;
        let c = claims("secret");
        let day_ms = 24 * 60 * 60 * 1000;
        assert!(!codec.is_expired(&c, c.issued_at_ms + 29 * day_ms));
        assert!(codec.is_expired(&c, c.issued_at_ms + 31 * day_ms));
    }
}

use std::time::Instant;

use serde::Serialize;
use tracing::warn;

use super::SERVER_NAME;
use crate::protocol::PROTOCOL_VERSION;
use crate::upstream::UpstreamClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServerIdentity {
    pub name: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamHealth {
    pub reachable: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub server: ServerIdentity,
    pub protocol_version: &'static str,
    pub upstream: UpstreamHealth,
}

impl HealthReport {
    pub fn is_ok(&self) -> bool {
        self.status == HealthStatus::Ok
    }
}

/// Probe the upstream once and report.
pub async fn report(upstream: &dyn UpstreamClient) -> HealthReport {
    let started = Instant::now();
    let probe = upstream.ping().await;
    let latency_ms = started.elapsed().as_millis() as u64;

    let (status, error) = match probe {
        Ok(()) => (HealthStatus::Ok, None),
        Err(e) => {
            warn!(error = %e, "upstream health probe failed");
            (HealthStatus::Degraded, Some(e.public_message()))
        }
    };

    HealthReport {
        status,
        server: ServerIdentity {
            name: SERVER_NAME,
            version: env!("CARGO_PKG_VERSION"),
        },
        protocol_version: PROTOCOL_VERSION,
        upstream: UpstreamHealth {
            reachable: status == HealthStatus::Ok,
            latency_ms,
            error,
        },
    }
}

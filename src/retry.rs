use std::collections::BTreeSet;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::GatewayError;

/// Minimum base delay once upstream signals rate limiting.
pub const RATE_LIMIT_FLOOR_MS: u64 = 5_000;

/// Default jitter ratio (±25%).
pub const DEFAULT_JITTER: f64 = 0.25;

const RETRYABLE_PATTERNS: &[&str] = &[
    "NetworkError",
    "OverloadError",
    "timed out",
    "connection reset",
    "rate limit",
    "too many requests",
    "temporarily unavailable",
];

const WRITE_NON_RETRYABLE_PATTERNS: &[&str] = &[
    "AuthenticationError",
    "ValidationError",
    "NotFoundError",
    "duplicate",
    "unauthorized",
    "forbidden",
    "not found",
    "invalid",
];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RetryConfigError {
    #[error("max_attempts must be at least 1")]
    NoAttempts,
    #[error("max_delay_ms ({max}) must be >= base_delay_ms ({base})")]
    DelayBounds { base: u64, max: u64 },
    #[error("backoff_multiplier must be > 1, got {0}")]
    Multiplier(f64),
}

/// Immutable retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    backoff_multiplier: f64,
    retryable_patterns: BTreeSet<String>,
    non_retryable_patterns: BTreeSet<String>,
}

impl RetryConfig {
    pub fn new(
        max_attempts: u32,
        base_delay_ms: u64,
        max_delay_ms: u64,
        backoff_multiplier: f64,
    ) -> Result<Self, RetryConfigError> {
        if max_attempts == 0 {
            return Err(RetryConfigError::NoAttempts);
        }
        if max_delay_ms < base_delay_ms {
            return Err(RetryConfigError::DelayBounds {
                base: base_delay_ms,
                max: max_delay_ms,
            });
        }
        if !backoff_multiplier.is_finite() || backoff_multiplier <= 1.0 {
            return Err(RetryConfigError::Multiplier(backoff_multiplier));
        }
        Ok(Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            backoff_multiplier,
            retryable_patterns: BTreeSet::new(),
            non_retryable_patterns: BTreeSet::new(),
        })
    }

    pub fn with_retryable<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.retryable_patterns
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    pub fn with_non_retryable<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.non_retryable_patterns
            .extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Per-call override of the attempt budget (e.g. fail-fast callers).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    pub fn backoff_multiplier(&self) -> f64 {
        self.backoff_multiplier
    }

    /// Decide whether `err` is worth another attempt.
    ///
    /// Order: explicit flag, non-retryable patterns, retryable patterns,
    /// HTTP status, then assume transient.
    pub fn is_retryable(&self, err: &GatewayError) -> bool {
        if let Some(flag) = err.retryable {
            return flag;
        }
        if matches_any(&self.non_retryable_patterns, err) {
            return false;
        }
        if matches_any(&self.retryable_patterns, err) {
            return true;
        }
        if let Some(status) = err.http_status {
            return status >= 500 || matches!(status, 408 | 409 | 429);
        }
        true
    }

    /// Delay before the attempt following `attempt`, before jitter.
    pub fn backoff_delay(&self, attempt: u32, err: Option<&GatewayError>) -> Duration {
        if let Some(retry_after) = err.and_then(|e| e.retry_after) {
            return retry_after.min(Duration::from_millis(self.max_delay_ms));
        }

        let rate_limited =
            err.is_some_and(|e| e.overloaded || e.http_status == Some(429));
        let base = if rate_limited {
            self.base_delay_ms.max(RATE_LIMIT_FLOOR_MS)
        } else {
            self.base_delay_ms
        };

        let exp = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay = (base as f64) * self.backoff_multiplier.powi(exp);
        let capped = if delay.is_finite() {
            delay.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };
        Duration::from_millis(capped as u64)
    }
}

fn matches_any(patterns: &BTreeSet<String>, err: &GatewayError) -> bool {
    let name = err.kind.name();
    let message = err.message.to_ascii_lowercase();
    patterns
        .iter()
        .any(|p| p == name || message.contains(&p.to_ascii_lowercase()))
}

/// Named retry policies, tuned per operation class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryPreset {
    Quick,
    Standard,
    Write,
    Long,
    Batch,
    RateLimitPersistent,
}

impl RetryPreset {
    pub const ALL: [RetryPreset; 6] = [
        Self::Quick,
        Self::Standard,
        Self::Write,
        Self::Long,
        Self::Batch,
        Self::RateLimitPersistent,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Quick => "QUICK",
            Self::Standard => "STANDARD",
            Self::Write => "WRITE",
            Self::Long => "LONG",
            Self::Batch => "BATCH",
            Self::RateLimitPersistent => "RATE_LIMIT_PERSISTENT",
        }
    }

    pub fn config(&self) -> RetryConfig {
        let (attempts, base, max, multiplier) = match self {
            Self::Quick => (15, 1_000, 120_000, 1.5),
            Self::Standard => (15, 2_000, 180_000, 1.6),
            Self::Write => (20, 2_000, 180_000, 1.6),
            Self::Long => (20, 3_000, 300_000, 1.8),
            Self::Batch => (25, 2_500, 240_000, 1.7),
            Self::RateLimitPersistent => (50, 5_000, 300_000, 1.5),
        };
        let config = RetryConfig {
            max_attempts: attempts,
            base_delay_ms: base,
            max_delay_ms: max,
            backoff_multiplier: multiplier,
            retryable_patterns: BTreeSet::new(),
            non_retryable_patterns: BTreeSet::new(),
        }
        .with_retryable(RETRYABLE_PATTERNS.iter().copied());

        match self {
            Self::Write => config.with_non_retryable(WRITE_NON_RETRYABLE_PATTERNS.iter().copied()),
            _ => config,
        }
    }
}

impl FromStr for RetryPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| format!("unknown retry preset: {s}"))
    }
}

/// Runs async operations with exponential backoff and jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryEngine {
    jitter: f64,
}

impl Default for RetryEngine {
    fn default() -> Self {
        Self {
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryEngine {
    pub fn new(jitter: f64) -> Self {
        Self {
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Engine with deterministic delays.
    pub fn without_jitter() -> Self {
        Self { jitter: 0.0 }
    }

    /// Delay actually slept after a failed `attempt`, jitter applied and
    /// clamped to `[0, max_delay_ms]`.
    pub fn delay_for(&self, config: &RetryConfig, attempt: u32, err: &GatewayError) -> Duration {
        let base = config.backoff_delay(attempt, Some(err));
        if self.jitter == 0.0 || err.retry_after.is_some() {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        let jittered = (base.as_millis() as f64 * factor)
            .max(0.0)
            .min(config.max_delay_ms() as f64);
        Duration::from_millis(jittered as u64)
    }

    /// Execute `operation` until it succeeds, fails with a non-retryable
    /// error, or the attempt budget runs out.
    ///
    /// The returned error carries `attempt`/`total_attempts`.
    pub async fn run<T, F, Fut>(&self, config: &RetryConfig, mut operation: F) -> Result<T, GatewayError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let total = config.max_attempts();
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(mut err) => {
                    err.attempt = attempt;
                    err.total_attempts = total;

                    if !config.is_retryable(&err) {
                        debug!(attempt, error = %err, "non-retryable failure");
                        return Err(err);
                    }
                    if attempt >= total {
                        warn!(attempts = total, error = %err, "retry budget exhausted");
                        return Err(err);
                    }

                    let delay = self.delay_for(config, attempt, &err);
                    warn!(
                        attempt,
                        total,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_parse_by_name() {
        assert_eq!("rate_limit_persistent".parse::<RetryPreset>(), Ok(RetryPreset::RateLimitPersistent));
        assert_eq!(" QUICK ".parse::<RetryPreset>(), Ok(RetryPreset::Quick));
        assert!("EVENTUALLY".parse::<RetryPreset>().is_err());
    }

    #[test]
    fn presets_are_well_formed() {
        for preset in RetryPreset::ALL {
            let c = preset.config();
            assert!(c.max_delay_ms() >= c.base_delay_ms(), "{}", preset.name());
            assert!(c.backoff_multiplier() > 1.0, "{}", preset.name());
        }
    }

    #[test]
    fn constructor_rejects_bad_bounds() {
        assert_eq!(
            RetryConfig::new(3, 500, 100, 2.0),
            Err(RetryConfigError::DelayBounds { base: 500, max: 100 })
        );
        assert!(RetryConfig::new(3, 100, 500, 1.0).is_err());
        assert!(RetryConfig::new(0, 100, 500, 2.0).is_err());
    }
}

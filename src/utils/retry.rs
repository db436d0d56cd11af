//! Backoff computation and retryable-error classification.
//!
//! This module provides:
//! - [`compute_backoff`] — exponential-backoff delay calculator with optional jitter.
//! - [`reconnect_backoff`] — the WebSocket reconnect variant of the same formula.
//! - [`is_retryable`] — classifies an [`IndexerError`] as retryable or not.
//!
//! The retry loop itself lives in [`crate::core::rpc::FailoverRpcClient`];
//! the reconnect loop in [`crate::streams::SubscriptionManager`].

use std::time::Duration;

use crate::config::{ReconnectConfig, RetryConfig};
use crate::utils::error::IndexerError;

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Computes the delay before the next retry.
///
/// `attempt` is 1-indexed: `attempt = 1` is the delay before the first retry,
/// `attempt = 2` before the second, etc.
///
/// Formula: `delay = initial_backoff_ms * backoff_multiplier^(attempt - 1)`,
/// capped at `max_backoff_ms`, then ±25 % jitter if enabled.
#[must_use]
pub fn compute_backoff(cfg: &RetryConfig, attempt: u32) -> Duration {
    let base = cfg.initial_backoff_ms as f64
        * cfg
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
    let capped = base.min(cfg.max_backoff_ms as f64);

    let ms = if cfg.jitter {
        // Simple pseudo-random jitter: scale by a fraction derived from the
        // current nanosecond count (no external rand dep needed).
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        // jitter factor in [0.75, 1.25]
        let factor = 0.75 + (nanos % 1_000_000) as f64 / 1_000_000.0 * 0.5;
        capped * factor
    } else {
        capped
    };

    Duration::from_millis(ms as u64)
}

/// Computes the delay before the next WebSocket reconnect attempt.
///
/// Same growth formula as [`compute_backoff`] but driven by the reconnect
/// configuration (base 1s, factor 2, cap 30s by default) and never jittered,
/// so reconnect timing stays predictable in tests.
#[must_use]
pub fn reconnect_backoff(cfg: &ReconnectConfig, attempt: u32) -> Duration {
    let base = cfg.base_delay_ms as f64 * cfg.factor.powi(attempt.saturating_sub(1) as i32);
    Duration::from_millis(base.min(cfg.max_delay_ms as f64) as u64)
}

// ─────────────────────────────────────────────────────────────────────────────
// Error classification
// ─────────────────────────────────────────────────────────────────────────────

/// Message fragments that mark an RPC failure as retryable.
///
/// The JSON-RPC transport surfaces timeouts, connection failures, and
/// HTTP-level throttling as stringified client errors, so classification
/// matches on the rendered message.
const RETRYABLE_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "connect",
    "unreachable",
    "reset",
    "broken pipe",
    "error sending request",
    "429",
    "too many requests",
    "rate limit",
    "503",
    "service unavailable",
    "504",
    "gateway timeout",
];

/// Returns `true` if `err` represents a transient failure that is safe to retry.
///
/// Transient errors are typically caused by network instability, rate-limiting,
/// or RPC node overload. Permanent errors (bad data, configuration mistakes,
/// malformed requests) are **not** retried.
///
/// | Error variant            | Retried | Reason                                     |
/// |--------------------------|---------|--------------------------------------------|
/// | `RpcError`               | ⚖️      | Only when the message matches a retryable class (timeout, 429/503/504, network) |
/// | `RpcClientError`         | ⚖️      | Same classification on the rendered `ClientError` |
/// | `ConnectionError`        | ✅      | WebSocket/transport drop                   |
/// | `DecodingError`          | ❌      | Bad data will not self-heal                |
/// | `NormalizeError`         | ❌      | Bad data will not self-heal                |
/// | `ConfigError`            | ❌      | Programmer error                           |
/// | `RpcExhausted`           | ❌      | Already exhausted                          |
#[must_use]
pub fn is_retryable(err: &IndexerError) -> bool {
    match err {
        IndexerError::RpcError(msg) => is_retryable_message(msg),
        IndexerError::RpcClientError(e) => is_retryable_message(&e.to_string()),
        IndexerError::ConnectionError(_) => true,
        _ => false,
    }
}

/// Case-insensitive match of `msg` against the retryable message classes.
#[must_use]
pub fn is_retryable_message(msg: &str) -> bool {
    let lowered = msg.to_lowercase();
    RETRYABLE_PATTERNS.iter().any(|p| lowered.contains(p))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter_cfg() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 1_000,
            backoff_multiplier: 2.0,
            max_backoff_ms: 10_000,
            jitter: false,
        }
    }

    // ── backoff ───────────────────────────────────────────────────────────────

    #[test]
    fn test_compute_backoff_doubles() {
        let cfg = no_jitter_cfg();
        assert_eq!(compute_backoff(&cfg, 1), Duration::from_millis(1_000));
        assert_eq!(compute_backoff(&cfg, 2), Duration::from_millis(2_000));
        assert_eq!(compute_backoff(&cfg, 3), Duration::from_millis(4_000));
    }

    #[test]
    fn test_compute_backoff_capped() {
        let cfg = no_jitter_cfg();
        // attempt 6 → 1000 * 2^5 = 32_000 ms → capped at 10_000
        assert_eq!(compute_backoff(&cfg, 6), Duration::from_millis(10_000));
    }

    #[test]
    fn test_reconnect_backoff_growth_and_cap() {
        let cfg = ReconnectConfig::default();
        assert_eq!(reconnect_backoff(&cfg, 1), Duration::from_millis(1_000));
        assert_eq!(reconnect_backoff(&cfg, 2), Duration::from_millis(2_000));
        assert_eq!(reconnect_backoff(&cfg, 5), Duration::from_millis(16_000));
        // attempt 7 → 64s → capped at 30s
        assert_eq!(reconnect_backoff(&cfg, 7), Duration::from_millis(30_000));
    }

    // ── classification ────────────────────────────────────────────────────────

    #[test]
    fn test_is_retryable_timeout() {
        assert!(is_retryable(&IndexerError::RpcError(
            "error sending request: operation timed out".into()
        )));
    }

    #[test]
    fn test_is_retryable_http_codes() {
        assert!(is_retryable(&IndexerError::RpcError(
            "HTTP status server error (503 Service Unavailable)".into()
        )));
        assert!(is_retryable(&IndexerError::RpcError(
            "HTTP status client error (429 Too Many Requests)".into()
        )));
        assert!(is_retryable(&IndexerError::RpcError(
            "HTTP status server error (504 Gateway Timeout)".into()
        )));
    }

    #[test]
    fn test_is_retryable_connection_error() {
        assert!(is_retryable(&IndexerError::ConnectionError(
            "websocket dropped".into()
        )));
    }

    #[test]
    fn test_malformed_request_not_retryable() {
        assert!(!is_retryable(&IndexerError::RpcError(
            "invalid params: wrong size".into()
        )));
    }

    #[test]
    fn test_exhausted_not_retryable() {
        assert!(!is_retryable(&IndexerError::RpcExhausted {
            attempts: 4,
            last_error: "timeout".into()
        }));
    }

    #[test]
    fn test_normalize_not_retryable() {
        assert!(!is_retryable(&IndexerError::NormalizeError(
            "unknown state code 9".into()
        )));
    }
}

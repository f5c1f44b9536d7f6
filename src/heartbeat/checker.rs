//! The pluggable per-provider health check interface and quota parsing.

use crate::domain_types::ProviderStatus;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// A single provider's health-check capability, implemented once per
/// provider backend (Ollama, Anthropic, `OpenAI`, ...).
#[async_trait]
pub trait ProviderHealthChecker: Send + Sync {
    /// The provider name this checker reports under.
    fn name(&self) -> &str;

    /// Overrides the monitor's global interval for this provider, if the
    /// backend has its own recommended polling cadence.
    fn preferred_interval(&self) -> Option<Duration> {
        None
    }

    /// Whether this checker's responses carry quota headers worth parsing.
    fn supports_quota(&self) -> bool {
        false
    }

    /// Whether this checker can enumerate the models currently available.
    fn supports_auto_discovery(&self) -> bool {
        false
    }

    /// Performs one health check attempt.
    async fn check(&self) -> Result<CheckOutcome, super::HeartbeatError>;
}

/// The result of a single successful (from the transport's point of view)
/// check attempt.
#[derive(Debug, Clone, Default)]
pub struct CheckOutcome {
    /// The health classification the checker observed.
    pub status: ProviderStatus,
    /// How long the check took to complete.
    pub response_time: Duration,
    /// Raw response headers, for quota extraction.
    pub headers: HashMap<String, String>,
    /// Models discovered during this check, if auto-discovery is supported
    /// and ran.
    pub discovered_models: Option<Vec<String>>,
}

/// A provider's quota usage as derived from response headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaInfo {
    /// Units consumed.
    pub used: u64,
    /// Units allotted.
    pub limit: u64,
}

impl QuotaInfo {
    /// The fraction of quota consumed, in `[0, 1]` for a well-formed limit.
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.limit == 0 {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            let ratio = self.used as f64 / self.limit as f64;
            ratio
        }
    }
}

/// Header name pairs for the quota dialects this crate understands,
/// expressed as `(remaining, limit)`.
const REMAINING_LIMIT_DIALECTS: &[(&str, &str)] = &[
    ("x-ratelimit-remaining", "x-ratelimit-limit"),
    (
        "anthropic-ratelimit-requests-remaining",
        "anthropic-ratelimit-requests-limit",
    ),
    (
        "anthropic-ratelimit-tokens-remaining",
        "anthropic-ratelimit-tokens-limit",
    ),
];

/// Header name pairs expressed directly as `(used, limit)`.
const USED_LIMIT_DIALECTS: &[(&str, &str)] = &[("x-ratelimit-used", "x-ratelimit-limit")];

/// Parses quota usage out of a response header map, trying each known
/// provider dialect in turn. Returns `None` when neither side of a dialect
/// is present or parseable; a provider reporting no quota data at all is
/// not an error.
#[must_use]
#[allow(clippy::implicit_hasher)]
pub fn extract_quota(headers: &HashMap<String, String>) -> Option<QuotaInfo> {
    let lookup = |key: &str| headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(key)).map(|(_, v)| v.as_str());

    for (remaining_key, limit_key) in REMAINING_LIMIT_DIALECTS {
        if let (Some(remaining), Some(limit)) = (lookup(remaining_key), lookup(limit_key))
            && let (Ok(remaining), Ok(limit)) = (remaining.parse::<u64>(), limit.parse::<u64>())
        {
            return Some(QuotaInfo {
                used: limit.saturating_sub(remaining),
                limit,
            });
        }
    }
    for (used_key, limit_key) in USED_LIMIT_DIALECTS {
        if let (Some(used), Some(limit)) = (lookup(used_key), lookup(limit_key))
            && let (Ok(used), Ok(limit)) = (used.parse::<u64>(), limit.parse::<u64>())
        {
            return Some(QuotaInfo { used, limit });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_x_ratelimit_dialect_from_remaining_and_limit() {
        let mut headers = HashMap::new();
        headers.insert("x-ratelimit-remaining".to_string(), "10".to_string());
        headers.insert("x-ratelimit-limit".to_string(), "100".to_string());
        let quota = extract_quota(&headers).unwrap();
        assert_eq!(quota.used, 90);
        assert_eq!(quota.limit, 100);
    }

    #[test]
    fn extracts_anthropic_requests_dialect() {
        let mut headers = HashMap::new();
        headers.insert(
            "anthropic-ratelimit-requests-remaining".to_string(),
            "40".to_string(),
        );
        headers.insert(
            "anthropic-ratelimit-requests-limit".to_string(),
            "50".to_string(),
        );
        let quota = extract_quota(&headers).unwrap();
        assert_eq!(quota.used, 10);
        assert_eq!(quota.limit, 50);
    }

    #[test]
    fn missing_headers_yield_none() {
        assert!(extract_quota(&HashMap::new()).is_none());
    }

    #[test]
    fn ratio_of_zero_limit_is_zero_not_nan() {
        let quota = QuotaInfo { used: 5, limit: 0 };
        assert!((quota.ratio() - 0.0).abs() < f64::EPSILON);
    }
}

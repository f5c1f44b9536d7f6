//! Domain types for the routing memory core.
//!
//! These newtypes prevent primitive obsession: every field in [`crate::memory`]
//! that carries a data-model invariant from the routing memory specification
//! (hash format, canonical model shape, confidence/bias/quality ranges,
//! latency and size bounds) is constructed through a validating `nutype`
//! wrapper rather than accepted as a bare `String`/`f64`/`u64`.

use nutype::nutype;
use serde::{Deserialize, Serialize};

fn is_hex_lower(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// A hashed user identifier, always `sha256:` followed by 64 lowercase hex characters.
///
/// This is the only form in which user identifiers are persisted anywhere in
/// the routing memory core.
#[nutype(
    validate(predicate = |s: &str| {
        s.strip_prefix("sha256:").is_some_and(|hex| hex.len() == 64 && is_hex_lower(hex))
    }),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, AsRef)
)]
pub struct UserHash(String);

impl UserHash {
    /// Returns the 64-hex suffix with the `sha256:` prefix stripped, used as
    /// the on-disk filename for per-user preference blobs.
    #[must_use]
    pub fn hex_suffix(&self) -> &str {
        self.as_ref().strip_prefix("sha256:").unwrap_or(self.as_ref())
    }
}

fn is_model_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'.' || b == b'+'
}

/// A selected model in canonical `provider:model` form.
///
/// Invariant: matches `<alnum_-+>:<alnum_.-_>+` with exactly one `:` separator.
#[nutype(
    validate(predicate = |s: &str| {
        let Some((provider, model)) = s.split_once(':') else { return false };
        !provider.is_empty()
            && !model.is_empty()
            && provider.bytes().all(|b| is_model_char(b) && b != b'.')
            && model.bytes().all(is_model_char)
    }),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, AsRef)
)]
pub struct CanonicalModel(String);

impl CanonicalModel {
    /// The provider prefix of this model (the part before the `:`).
    #[must_use]
    pub fn provider(&self) -> &str {
        self.as_ref().split_once(':').map_or(self.as_ref(), |(p, _)| p)
    }
}

/// A short classification tag describing a request's purpose (e.g. "coding").
#[nutype(
    validate(len_char_min = 1, len_char_max = 128),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, AsRef)
)]
pub struct IntentTag(String);

/// Name of an upstream provider, derived from a canonical model's prefix or
/// supplied directly by a health checker.
#[nutype(
    validate(len_char_min = 1, len_char_max = 128),
    derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, TryFrom, AsRef)
)]
pub struct ProviderName(String);

/// A probability-like score in `[0, 1]`: decision confidence or quality score.
#[nutype(
    validate(greater_or_equal = 0.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, Display, TryFrom, Into)
)]
pub struct UnitScore(f64);

/// A per-provider preference bias in `[-1, 1]`.
#[nutype(
    validate(greater_or_equal = -1.0, less_or_equal = 1.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize, Display, Default, TryFrom, Into),
    default = 0.0
)]
pub struct Bias(f64);

impl Bias {
    /// Adds `delta` to this bias, clamping the result to `[-1, 1]`.
    #[must_use]
    pub fn adjust(self, delta: f64) -> Self {
        Self::try_new((self.into_inner() + delta).clamp(-1.0, 1.0))
            .unwrap_or_else(|_| Self::default())
    }
}

/// Routing decision latency in milliseconds, bounded at 60 seconds.
#[nutype(
    validate(less_or_equal = 60_000),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, Default, TryFrom, Into),
    default = 0
)]
pub struct DecisionLatencyMs(u64);

/// End-to-end outcome response time in milliseconds, bounded at 300 seconds.
#[nutype(
    validate(less_or_equal = 300_000),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, Default, TryFrom, Into),
    default = 0
)]
pub struct OutcomeLatencyMs(u64);

/// Request content length in bytes, bounded at 10 MiB.
#[nutype(
    validate(less_or_equal = 10_485_760),
    derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display, Default, TryFrom, Into),
    default = 0
)]
pub struct ContentLength(u64);

/// An error string on an outcome, capped at 1000 characters with newlines stripped.
#[nutype(
    sanitize(with = |s: String| s.replace(['\n', '\r'], " ")),
    validate(len_char_max = 1000),
    derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display, TryFrom, AsRef)
)]
pub struct ErrorText(String);

/// The routing strategy bucket that produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Fast path, no model reasoning involved in the routing choice itself.
    Reflex,
    /// Embedding/semantic-similarity based routing.
    Semantic,
    /// LLM-assisted routing decision.
    Cognitive,
    /// Routing driven by previously learned user preferences.
    Learned,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Reflex => "reflex",
            Self::Semantic => "semantic",
            Self::Cognitive => "cognitive",
            Self::Learned => "learned",
        };
        f.write_str(s)
    }
}

/// Severity of a documented provider quirk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Cosmetic or rarely encountered.
    Low,
    /// Noticeable but workaround-able in the common path.
    Medium,
    /// Frequently encountered, degrades quality materially.
    High,
    /// Breaks correctness or availability outright.
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Severity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(()),
        }
    }
}

/// Current health classification of a provider.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    /// Fully operational.
    Healthy,
    /// Operational but showing signs of trouble (elevated latency, quota pressure).
    Degraded,
    /// Not usable; checks are failing outright, or never yet checked.
    #[default]
    Unavailable,
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

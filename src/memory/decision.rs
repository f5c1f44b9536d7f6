//! The atomic fact recorded per request: a [`RoutingDecision`].

use crate::domain_types::{
    CanonicalModel, ContentLength, DecisionLatencyMs, ErrorText, IntentTag, OutcomeLatencyMs,
    Tier, UnitScore, UserHash,
};
use serde::{Deserialize, Serialize};

/// The request-side facts captured for a routing decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestInfo {
    /// Model name as originally requested by the caller, before routing.
    pub model: String,
    /// Classified intent tag (e.g. "coding", "reasoning").
    pub intent: IntentTag,
    /// Hash of the request content, for dedup/debugging without storing payloads.
    pub content_hash: String,
    /// Length of the request content in bytes.
    pub content_length: ContentLength,
}

/// The routing-side facts captured for a routing decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingInfo {
    /// Which routing strategy bucket produced this decision.
    pub tier: Tier,
    /// The model ultimately selected, in canonical `provider:model` form.
    pub selected_model: CanonicalModel,
    /// Confidence the router had in this decision, in `[0, 1]`.
    pub confidence: UnitScore,
    /// How long the routing decision itself took to compute.
    #[serde(rename = "latency_ms")]
    pub decision_latency_ms: DecisionLatencyMs,
}

/// The outcome-side facts captured once a request completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeInfo {
    /// Whether the request ultimately succeeded.
    pub success: bool,
    /// End-to-end response time in milliseconds.
    pub response_time_ms: OutcomeLatencyMs,
    /// Error text, if any, already newline-stripped and length-capped.
    pub error: Option<ErrorText>,
    /// Quality score assigned to the response, in `[0, 1]`.
    pub quality_score: UnitScore,
}

/// A single routing decision and its outcome, as recorded in the routing
/// history journal.
///
/// Created once by the request pipeline upon response, appended once to the
/// journal, and never mutated afterward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// When this decision was recorded.
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Hashed identifier of the user who made the request.
    #[serde(rename = "api_key_hash")]
    pub user_hash: UserHash,
    /// Request-side facts.
    pub request: RequestInfo,
    /// Routing-side facts.
    pub routing: RoutingInfo,
    /// Outcome-side facts.
    pub outcome: OutcomeInfo,
}

impl RoutingDecision {
    /// The provider prefix of the selected model, e.g. `"ollama"` for
    /// `"ollama:llama3.1"`.
    #[must_use]
    pub fn provider(&self) -> &str {
        self.routing.selected_model.provider()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::sample_decision;

    #[test]
    fn provider_extracts_prefix_from_selected_model() {
        let hash = format!("sha256:{}", "0".repeat(64));
        let d = sample_decision(&hash, "coding", "prov:m1", true);
        assert_eq!(d.provider(), "prov");
    }

    #[test]
    fn serializes_and_round_trips_through_json() {
        let hash = format!("sha256:{}", "0".repeat(64));
        let d = sample_decision(&hash, "coding", "prov:m1", true);
        let json = serde_json::to_string(&d).unwrap();
        let back: super::RoutingDecision = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}

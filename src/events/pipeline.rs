//! Emits request-pipeline activity onto the event bus.

use super::{EventBus, EventBusError, HookEvent};
use crate::memory::RoutingDecision;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;

/// Publishes `routing_decision`, `request_received`, and `request_failed`
/// events for the request pipeline, always asynchronously.
pub struct PipelineIntegrator {
    bus: Arc<EventBus>,
}

impl PipelineIntegrator {
    /// Builds an integrator publishing onto the given bus.
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    /// Emits a `request_received` event for an inbound request, before
    /// routing has happened.
    ///
    /// # Errors
    ///
    /// Propagates [`EventBusError`] from the underlying bus.
    pub fn emit_request_received(&self, user_hash: &str, requested_model: &str) -> Result<(), EventBusError> {
        let mut data = HashMap::new();
        data.insert("user_hash".to_string(), user_hash.to_string());
        data.insert("requested_model".to_string(), requested_model.to_string());
        self.bus.publish_async(HookEvent {
            topic: "request_received".to_string(),
            timestamp: Utc::now(),
            provider: None,
            data,
        })
    }

    /// Emits a `routing_decision` event with the fields most likely to be
    /// useful to an external consumer: tier, selected model, confidence,
    /// and outcome.
    ///
    /// # Errors
    ///
    /// Propagates [`EventBusError`] from the underlying bus.
    pub fn emit_routing_decision(&self, decision: &RoutingDecision) -> Result<(), EventBusError> {
        let mut data = HashMap::new();
        data.insert("user_hash".to_string(), decision.user_hash.to_string());
        data.insert("tier".to_string(), decision.routing.tier.to_string());
        data.insert("selected_model".to_string(), decision.routing.selected_model.to_string());
        data.insert("confidence".to_string(), decision.routing.confidence.to_string());
        data.insert("success".to_string(), decision.outcome.success.to_string());
        data.insert("response_time_ms".to_string(), decision.outcome.response_time_ms.to_string());
        self.bus.publish_async(HookEvent {
            topic: "routing_decision".to_string(),
            timestamp: decision.timestamp,
            provider: Some(decision.provider().to_string()),
            data,
        })
    }

    /// Emits a `request_failed` event for a request that never reached a
    /// recorded routing decision (e.g. validation rejected it outright).
    ///
    /// # Errors
    ///
    /// Propagates [`EventBusError`] from the underlying bus.
    pub fn emit_request_failed(&self, user_hash: &str, error: &str) -> Result<(), EventBusError> {
        let mut data = HashMap::new();
        data.insert("user_hash".to_string(), user_hash.to_string());
        data.insert("error".to_string(), error.to_string());
        self.bus.publish_async(HookEvent {
            topic: "request_failed".to_string(),
            timestamp: Utc::now(),
            provider: None,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::decision::fixtures::sample_decision;
    use std::time::Duration;

    #[tokio::test]
    async fn routing_decision_carries_tier_and_model_fields() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe("routing_decision");
        let integrator = PipelineIntegrator::new(bus);

        let hash = format!("sha256:{}", "0".repeat(64));
        let decision = sample_decision(&hash, "coding", "ollama:llama3.1", true);
        integrator.emit_routing_decision(&decision).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
        assert_eq!(event.provider.as_deref(), Some("ollama"));
        assert_eq!(event.data.get("selected_model").unwrap(), "ollama:llama3.1");
        assert_eq!(event.data.get("success").unwrap(), "true");
    }

    #[tokio::test]
    async fn request_received_and_failed_publish_on_their_own_topics() {
        let bus = EventBus::new();
        let mut received = bus.subscribe("request_received");
        let mut failed = bus.subscribe("request_failed");
        let integrator = PipelineIntegrator::new(bus);

        integrator.emit_request_received("sha256:abc", "ollama:llama3.1").unwrap();
        integrator.emit_request_failed("sha256:abc", "validation error").unwrap();

        let r = tokio::time::timeout(Duration::from_secs(1), received.recv()).await.unwrap().unwrap();
        assert_eq!(r.topic, "request_received");
        let f = tokio::time::timeout(Duration::from_secs(1), failed.recv()).await.unwrap().unwrap();
        assert_eq!(f.data.get("error").unwrap(), "validation error");
    }
}

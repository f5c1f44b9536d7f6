//! Translates heartbeat monitor events into hook events on the event bus.

use super::{EventBus, HookEvent};
use crate::heartbeat::{HeartbeatEvent, HeartbeatEventData, HeartbeatEventHandler};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Bridges [`HeartbeatEventHandler`] deliveries onto an [`EventBus`],
/// translating the subset of heartbeat events that have hook-side meaning.
///
/// `provider_healthy`, `provider_degraded`, `heartbeat_started`, and
/// `heartbeat_stopped` are intentionally not forwarded: they describe
/// monitor-internal state, not something external consumers act on.
pub struct HeartbeatHookBridge {
    bus: Arc<EventBus>,
}

impl HeartbeatHookBridge {
    /// Builds a bridge publishing onto the given bus.
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    fn hook_topic(event: &HeartbeatEvent) -> Option<&'static str> {
        match event {
            HeartbeatEvent::ProviderUnavailable(_) => Some("provider_unavailable"),
            HeartbeatEvent::HealthCheckFailed(_) => Some("health_check_failed"),
            HeartbeatEvent::QuotaWarning(_) => Some("quota_warning"),
            HeartbeatEvent::QuotaCritical(_) => Some("quota_exceeded"),
            HeartbeatEvent::ModelDiscovered(_) => Some("model_discovered"),
            HeartbeatEvent::ProviderHealthy(_)
            | HeartbeatEvent::ProviderDegraded(_)
            | HeartbeatEvent::HeartbeatStarted { .. }
            | HeartbeatEvent::HeartbeatStopped { .. } => None,
        }
    }

    fn translate(topic: &'static str, data: &HeartbeatEventData) -> HookEvent {
        let mut fields = data.data.clone();
        if let Some(status) = data.status {
            fields.insert("status".to_string(), status.to_string());
        }
        if let Some(previous) = data.previous_status {
            fields.insert("previous_status".to_string(), previous.to_string());
        }
        if let Some(last_check) = data.last_check {
            fields.insert("last_check".to_string(), last_check.to_rfc3339());
        }
        if let Some(response_time) = data.response_time {
            fields.insert("response_time".to_string(), response_time.as_millis().to_string());
        }
        if let Some(models_count) = data.models_count {
            fields.insert("models_count".to_string(), models_count.to_string());
        }
        if let Some(quota_used) = data.quota_used {
            fields.insert("quota_used".to_string(), quota_used.to_string());
        }
        if let Some(quota_limit) = data.quota_limit {
            fields.insert("quota_limit".to_string(), quota_limit.to_string());
        }
        if let Some(error) = &data.error {
            fields.insert("error".to_string(), error.clone());
        }
        HookEvent {
            topic: topic.to_string(),
            timestamp: data.timestamp,
            provider: Some(data.provider.clone()),
            data: fields,
        }
    }
}

#[async_trait]
impl HeartbeatEventHandler for HeartbeatHookBridge {
    async fn handle(&self, event: HeartbeatEvent) {
        let Some(topic) = Self::hook_topic(&event) else {
            return;
        };
        let data = match &event {
            HeartbeatEvent::ProviderUnavailable(d)
            | HeartbeatEvent::HealthCheckFailed(d)
            | HeartbeatEvent::QuotaWarning(d)
            | HeartbeatEvent::QuotaCritical(d)
            | HeartbeatEvent::ModelDiscovered(d) => d,
            HeartbeatEvent::ProviderHealthy(_)
            | HeartbeatEvent::ProviderDegraded(_)
            | HeartbeatEvent::HeartbeatStarted { .. }
            | HeartbeatEvent::HeartbeatStopped { .. } => return,
        };
        let hook_event = Self::translate(topic, data);
        if let Err(e) = self.bus.publish_async(hook_event) {
            debug!(error = %e, "failed to publish bridged hook event");
        }
    }
}

//! Wires the heartbeat monitor, recovery manager, and event bus bridge
//! together the way a host process would: a failing checker drives the
//! monitor, the monitor's events drive the recovery manager and are
//! simultaneously bridged onto the event bus for external subscribers.

use async_trait::async_trait;
use routing_memory::domain_types::ProviderStatus;
use routing_memory::events::{EventBus, HeartbeatHookBridge};
use routing_memory::heartbeat::{
    CheckOutcome, HeartbeatError, HeartbeatEvent, HeartbeatEventData, HeartbeatEventHandler,
    HeartbeatMonitor, ProviderHealthChecker,
};
use routing_memory::time_provider::test_time_provider;
use routing_memory::{HeartbeatConfig, RecoveryConfig, RecoveryManager};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use test_log::test;

struct AlwaysUnavailable;

#[async_trait]
impl ProviderHealthChecker for AlwaysUnavailable {
    fn name(&self) -> &'static str {
        "shaky-prov"
    }

    async fn check(&self) -> Result<CheckOutcome, HeartbeatError> {
        Err(HeartbeatError::CheckFailed("upstream rejected request".to_string()))
    }
}

struct QuotaExhausted;

#[async_trait]
impl ProviderHealthChecker for QuotaExhausted {
    fn name(&self) -> &'static str {
        "quota-prov"
    }

    fn supports_quota(&self) -> bool {
        true
    }

    async fn check(&self) -> Result<CheckOutcome, HeartbeatError> {
        let mut headers = HashMap::new();
        headers.insert("x-ratelimit-remaining".to_string(), "2".to_string());
        headers.insert("x-ratelimit-limit".to_string(), "100".to_string());
        Ok(CheckOutcome {
            status: ProviderStatus::Healthy,
            response_time: Duration::from_millis(5),
            headers,
            discovered_models: None,
        })
    }
}

/// A real checker run through the monitor produces exactly one
/// `provider_unavailable` transition (status only changes once, from
/// absent to unavailable); a flapping upstream that keeps failing across
/// many check cycles delivers the event repeatedly instead, which is what
/// this drives directly against the recovery manager's handler interface.
#[test(tokio::test)]
async fn repeated_unavailable_events_drive_recovery_to_auto_disable() {
    let monitor = HeartbeatMonitor::new(
        HeartbeatConfig { retry_attempts: 0, ..Default::default() },
        test_time_provider(),
    );
    monitor.register_checker(Arc::new(AlwaysUnavailable));
    let first_status = monitor.check_provider("shaky-prov").await.unwrap();
    assert_eq!(first_status, ProviderStatus::Unavailable);

    let recovery = Arc::new(RecoveryManager::new(
        RecoveryConfig {
            max_recovery_attempts: 3,
            recovery_backoff: Duration::ZERO,
            auto_disable_threshold: 3,
            ..Default::default()
        },
        test_time_provider(),
    ));

    for _ in 0..3 {
        recovery
            .handle(HeartbeatEvent::ProviderUnavailable(HeartbeatEventData {
                provider: "shaky-prov".to_string(),
                timestamp: chrono::Utc::now(),
                status: Some(ProviderStatus::Unavailable),
                ..Default::default()
            }))
            .await;
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let state = recovery.provider_state("shaky-prov").unwrap();
    assert!(state.disabled, "provider should be auto-disabled after the threshold is reached");

    let actions = recovery.action_log().await;
    assert!(actions.iter().any(|a| matches!(
        a.action,
        routing_memory::recovery::RecoveryActionKind::Disable
    )));
}

#[test(tokio::test)]
async fn quota_critical_event_reaches_a_bus_subscriber_through_the_bridge() {
    let monitor = HeartbeatMonitor::new(
        HeartbeatConfig { quota_critical_threshold: 0.9, quota_warning_threshold: 0.7, ..Default::default() },
        test_time_provider(),
    );

    monitor.register_checker(Arc::new(QuotaExhausted));

    let bus = EventBus::new();
    let mut rx = bus.subscribe("quota_exceeded");
    let bridge = Arc::new(HeartbeatHookBridge::new(Arc::clone(&bus)));
    monitor.register_handler(bridge).await;

    monitor.check_provider("quota-prov").await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
    assert_eq!(event.topic, "quota_exceeded");
    assert_eq!(event.provider.as_deref(), Some("quota-prov"));
}

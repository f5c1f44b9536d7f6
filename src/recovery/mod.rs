//! Recovery manager: reacts to heartbeat transitions by tracking recovery
//! attempts per provider, enabling fallback routing, and auto-disabling a
//! provider that will not stay healthy.

use crate::config::RecoveryConfig;
use crate::error::{ErrorClass, ErrorKind};
use crate::heartbeat::{HeartbeatEvent, HeartbeatEventHandler};
use crate::time_provider::SharedTimeProvider;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::SystemTime;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

/// Errors surfaced by a direct recovery-transition request. Heartbeat event
/// delivery through [`HeartbeatEventHandler::handle`] never surfaces these;
/// it logs and swallows them instead, since handlers cannot fail.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// A recovery attempt was rejected because the provider's backoff
    /// window has not elapsed since the last attempt.
    #[error("recovery backoff still active for {provider}")]
    Backoff {
        /// The provider the rejected attempt was for.
        provider: String,
    },
    /// The provider has exhausted its recovery attempt budget.
    #[error("recovery attempts exhausted for {provider}")]
    Exhausted {
        /// The provider the rejected attempt was for.
        provider: String,
    },
}

impl ErrorClass for RecoveryError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Backoff { .. } => ErrorKind::Backoff,
            Self::Exhausted { .. } => ErrorKind::Exhausted,
        }
    }
}

/// The kind of action the recovery manager took for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryActionKind {
    /// A disabled provider was re-enabled after its auto-enable delay.
    Enable,
    /// Fallback routing was turned on for a provider in trouble.
    FallbackEnable,
    /// A provider was auto-disabled after exceeding its attempt budget.
    Disable,
    /// A degraded-but-not-unavailable provider was noted.
    MarkDegraded,
    /// Fallback routing was turned back off after the provider recovered.
    FallbackDisable,
}

/// One recorded recovery action, for introspection and statistics.
#[derive(Debug, Clone)]
pub struct RecoveryActionRecord {
    /// When the action was taken.
    pub timestamp: DateTime<Utc>,
    /// The provider the action concerned.
    pub provider: String,
    /// What the manager did.
    pub action: RecoveryActionKind,
}

/// Per-provider recovery bookkeeping.
#[derive(Debug, Clone, Default)]
struct RecoveryState {
    recovery_attempts: u32,
    last_attempt_time: Option<SystemTime>,
    disabled: bool,
    disabled_since: Option<SystemTime>,
    fallback_enabled: bool,
}

/// A read-only view of a provider's current recovery state.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryStateView {
    /// Consecutive recovery attempts recorded since the last full recovery.
    pub recovery_attempts: u32,
    /// Whether the provider is currently auto-disabled.
    pub disabled: bool,
    /// Whether fallback routing is currently enabled for this provider.
    pub fallback_enabled: bool,
}

/// Aggregate counters exposed by [`RecoveryManager::stats`].
#[derive(Debug, Clone, Default)]
pub struct RecoveryStats {
    /// Total recovery actions recorded.
    pub total_actions: u64,
    /// Actions that were recorded (the manager has no "failed recording"
    /// concept, so this currently always equals `total_actions`).
    pub successful_actions: u64,
    /// Action counts grouped by kind.
    pub actions_by_type: HashMap<RecoveryActionKind, u64>,
    /// Action counts grouped by provider.
    pub actions_by_provider: HashMap<String, u64>,
}

/// Listens to heartbeat events and drives fallback-routing and
/// auto-disable/enable decisions per provider.
pub struct RecoveryManager {
    config: RecoveryConfig,
    time_provider: SharedTimeProvider,
    state: DashMap<String, RecoveryState>,
    actions: RwLock<Vec<RecoveryActionRecord>>,
}

impl RecoveryManager {
    /// Builds a recovery manager with no per-provider state yet.
    #[must_use]
    pub fn new(config: RecoveryConfig, time_provider: SharedTimeProvider) -> Self {
        Self {
            config,
            time_provider,
            state: DashMap::new(),
            actions: RwLock::new(Vec::new()),
        }
    }

    /// The current recovery state for a provider, if it has ever been seen.
    #[must_use]
    pub fn provider_state(&self, provider: &str) -> Option<RecoveryStateView> {
        self.state.get(provider).map(|s| RecoveryStateView {
            recovery_attempts: s.recovery_attempts,
            disabled: s.disabled,
            fallback_enabled: s.fallback_enabled,
        })
    }

    /// A snapshot of the action log, oldest first.
    pub async fn action_log(&self) -> Vec<RecoveryActionRecord> {
        self.actions.read().await.clone()
    }

    /// Aggregate statistics over every recorded action.
    pub async fn stats(&self) -> RecoveryStats {
        let actions = self.actions.read().await;
        let mut by_type = HashMap::new();
        let mut by_provider = HashMap::new();
        for record in actions.iter() {
            *by_type.entry(record.action).or_insert(0) += 1;
            *by_provider.entry(record.provider.clone()).or_insert(0) += 1;
        }
        let total = u64::try_from(actions.len()).unwrap_or(u64::MAX);
        RecoveryStats {
            total_actions: total,
            successful_actions: total,
            actions_by_type: by_type,
            actions_by_provider: by_provider,
        }
    }

    async fn record(&self, provider: &str, action: RecoveryActionKind) {
        self.actions.write().await.push(RecoveryActionRecord {
            timestamp: Utc::now(),
            provider: provider.to_string(),
            action,
        });
    }

    /// Handles a `provider_unavailable` transition per the recovery
    /// backoff/exhaustion/auto-disable state machine.
    ///
    /// # Errors
    ///
    /// Returns [`RecoveryError::Backoff`] when the backoff window since the
    /// last attempt has not yet elapsed, or [`RecoveryError::Exhausted`]
    /// when the attempt budget is spent.
    #[instrument(skip(self))]
    pub async fn handle_unavailable(&self, provider: &str) -> Result<RecoveryActionKind, RecoveryError> {
        let now = self.time_provider.now();
        let mut entry = self.state.entry(provider.to_string()).or_default();

        if let Some(last) = entry.last_attempt_time
            && now.duration_since(last).unwrap_or_default() < self.config.recovery_backoff
        {
            return Err(RecoveryError::Backoff { provider: provider.to_string() });
        }

        if entry.disabled {
            let since = entry.disabled_since.unwrap_or(now);
            if now.duration_since(since).unwrap_or_default() >= self.config.auto_enable_delay {
                entry.disabled = false;
                entry.disabled_since = None;
                drop(entry);
                self.record(provider, RecoveryActionKind::Enable).await;
                info!(provider, "auto-enabled provider after recovery delay");
                return Ok(RecoveryActionKind::Enable);
            }
        }

        if entry.recovery_attempts >= self.config.max_recovery_attempts {
            return Err(RecoveryError::Exhausted { provider: provider.to_string() });
        }

        if self.config.enable_fallback_routing {
            entry.fallback_enabled = true;
        }
        entry.recovery_attempts += 1;
        entry.last_attempt_time = Some(now);
        let attempts = entry.recovery_attempts;
        drop(entry);
        self.record(provider, RecoveryActionKind::FallbackEnable).await;
        warn!(provider, attempts, "recovery attempt recorded, fallback routing engaged");

        if attempts >= self.config.auto_disable_threshold {
            let mut entry = self.state.entry(provider.to_string()).or_default();
            entry.disabled = true;
            entry.disabled_since = Some(now);
            drop(entry);
            self.record(provider, RecoveryActionKind::Disable).await;
            warn!(provider, "provider auto-disabled after exceeding recovery attempts");
        }

        Ok(RecoveryActionKind::FallbackEnable)
    }

    /// Handles a `provider_degraded` transition: notes the degradation and
    /// turns fallback routing on, without touching the attempt counter.
    pub async fn handle_degraded(&self, provider: &str) {
        if self.config.enable_fallback_routing {
            let mut entry = self.state.entry(provider.to_string()).or_default();
            entry.fallback_enabled = true;
        }
        self.record(provider, RecoveryActionKind::MarkDegraded).await;
    }

    /// Handles a `provider_healthy` transition: clears recovery state.
    pub async fn handle_healthy(&self, provider: &str) {
        {
            let mut entry = self.state.entry(provider.to_string()).or_default();
            entry.recovery_attempts = 0;
            entry.fallback_enabled = false;
        }
        self.record(provider, RecoveryActionKind::FallbackDisable).await;
        info!(provider, "provider recovered, recovery state reset");
    }
}

#[async_trait]
impl HeartbeatEventHandler for RecoveryManager {
    async fn handle(&self, event: HeartbeatEvent) {
        if !self.config.enabled {
            return;
        }
        match event {
            HeartbeatEvent::ProviderUnavailable(data) => {
                if let Err(e) = self.handle_unavailable(&data.provider).await {
                    info!(provider = %data.provider, error = %e, "recovery attempt rejected");
                }
            }
            HeartbeatEvent::ProviderDegraded(data) => self.handle_degraded(&data.provider).await,
            HeartbeatEvent::ProviderHealthy(data) => self.handle_healthy(&data.provider).await,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::HeartbeatEventData;
    use crate::time_provider::test_time_provider;
    use std::time::Duration;

    fn data(provider: &str) -> HeartbeatEventData {
        HeartbeatEventData {
            provider: provider.to_string(),
            timestamp: Utc::now(),
            ..Default::default()
        }
    }

    fn manager(config: RecoveryConfig) -> RecoveryManager {
        RecoveryManager::new(config, test_time_provider())
    }

    #[tokio::test]
    async fn first_unavailable_event_enables_fallback_and_records_action() {
        let mgr = manager(RecoveryConfig { recovery_backoff: Duration::ZERO, ..Default::default() });
        let action = mgr.handle_unavailable("prov").await.unwrap();
        assert_eq!(action, RecoveryActionKind::FallbackEnable);
        let state = mgr.provider_state("prov").unwrap();
        assert_eq!(state.recovery_attempts, 1);
        assert!(state.fallback_enabled);
    }

    #[tokio::test]
    async fn rapid_repeated_unavailable_events_hit_backoff() {
        let mgr = manager(RecoveryConfig { recovery_backoff: Duration::from_mins(1), ..Default::default() });
        mgr.handle_unavailable("prov").await.unwrap();
        let err = mgr.handle_unavailable("prov").await.unwrap_err();
        assert!(matches!(err, RecoveryError::Backoff { .. }));
        assert_eq!(mgr.provider_state("prov").unwrap().recovery_attempts, 1);
    }

    #[tokio::test]
    async fn attempts_exceeding_budget_return_exhausted() {
        let mgr = manager(RecoveryConfig {
            recovery_backoff: Duration::ZERO,
            max_recovery_attempts: 1,
            auto_disable_threshold: 100,
            ..Default::default()
        });
        mgr.handle_unavailable("prov").await.unwrap();
        let err = mgr.handle_unavailable("prov").await.unwrap_err();
        assert!(matches!(err, RecoveryError::Exhausted { .. }));
    }

    #[tokio::test]
    async fn attempts_reaching_auto_disable_threshold_disables_provider() {
        let mgr = manager(RecoveryConfig {
            recovery_backoff: Duration::ZERO,
            max_recovery_attempts: 10,
            auto_disable_threshold: 2,
            ..Default::default()
        });
        mgr.handle_unavailable("prov").await.unwrap();
        mgr.handle_unavailable("prov").await.unwrap();
        assert!(mgr.provider_state("prov").unwrap().disabled);
        let stats = mgr.stats().await;
        assert_eq!(*stats.actions_by_type.get(&RecoveryActionKind::Disable).unwrap(), 1);
    }

    #[tokio::test]
    async fn disabled_provider_auto_enables_after_delay_elapses() {
        let mgr = manager(RecoveryConfig {
            recovery_backoff: Duration::ZERO,
            max_recovery_attempts: 1,
            auto_disable_threshold: 1,
            auto_enable_delay: Duration::ZERO,
            ..Default::default()
        });
        mgr.handle_unavailable("prov").await.unwrap();
        assert!(mgr.provider_state("prov").unwrap().disabled);

        let action = mgr.handle_unavailable("prov").await.unwrap();
        assert_eq!(action, RecoveryActionKind::Enable);
        assert!(!mgr.provider_state("prov").unwrap().disabled);
    }

    #[tokio::test]
    async fn healthy_event_resets_attempts_and_fallback() {
        let mgr = manager(RecoveryConfig { recovery_backoff: Duration::ZERO, ..Default::default() });
        mgr.handle_unavailable("prov").await.unwrap();
        mgr.handle_healthy("prov").await;
        let state = mgr.provider_state("prov").unwrap();
        assert_eq!(state.recovery_attempts, 0);
        assert!(!state.fallback_enabled);
    }

    #[tokio::test]
    async fn degraded_event_enables_fallback_without_touching_attempts() {
        let mgr = manager(RecoveryConfig::default());
        mgr.handle_degraded("prov").await;
        let state = mgr.provider_state("prov").unwrap();
        assert_eq!(state.recovery_attempts, 0);
        assert!(state.fallback_enabled);
    }

    #[tokio::test]
    async fn disabled_manager_is_a_no_op_event_handler() {
        let mgr = manager(RecoveryConfig { enabled: false, ..Default::default() });
        mgr.handle(HeartbeatEvent::ProviderUnavailable(data("prov"))).await;
        assert!(mgr.provider_state("prov").is_none());
        assert_eq!(mgr.stats().await.total_actions, 0);
    }

    #[tokio::test]
    async fn event_handler_impl_dispatches_by_kind() {
        let mgr = manager(RecoveryConfig { recovery_backoff: Duration::ZERO, ..Default::default() });
        mgr.handle(HeartbeatEvent::ProviderUnavailable(data("prov"))).await;
        mgr.handle(HeartbeatEvent::ProviderHealthy(data("prov"))).await;
        let state = mgr.provider_state("prov").unwrap();
        assert_eq!(state.recovery_attempts, 0);
    }
}

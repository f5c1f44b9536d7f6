//! Routing memory: the persistent journal, per-user learner, quirks
//! catalog, daily event log, and analytics engine, unified behind a single
//! [`MemoryManager`] facade.

pub mod analytics;
pub mod daily_logs;
pub mod decision;
pub mod history_store;
pub mod preferences_store;
pub mod quirks_store;

pub use analytics::AnalyticsSummary;
pub use daily_logs::{DailyLogEntry, DailyLogStats, DailyLogsManager};
pub use decision::{OutcomeInfo, RequestInfo, RoutingDecision, RoutingInfo};
pub use history_store::HistoryStore;
pub use preferences_store::{CustomRule, PreferencesStore, UserPreferences};
pub use quirks_store::{Quirk, QuirksStore};

use crate::config::MemoryConfig;
use crate::domain_types::{ProviderName, Severity, UserHash};
use crate::error::{ErrorClass, ErrorKind};
use crate::time_provider::SharedTimeProvider;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{info, instrument, warn};

/// Errors surfaced by the memory manager facade, wrapping the error of
/// whichever store produced the failure.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// A routing history journal fault.
    #[error(transparent)]
    History(#[from] history_store::HistoryStoreError),
    /// A preferences store fault.
    #[error(transparent)]
    Preferences(#[from] preferences_store::PreferencesStoreError),
    /// A quirks catalog fault.
    #[error(transparent)]
    Quirks(#[from] quirks_store::QuirksStoreError),
    /// A daily log fault.
    #[error(transparent)]
    DailyLog(#[from] daily_logs::DailyLogError),
    /// An analytics persistence fault.
    #[error(transparent)]
    Analytics(#[from] analytics::AnalyticsError),
}

impl ErrorClass for MemoryError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::History(e) => e.kind(),
            Self::Preferences(e) => e.kind(),
            Self::Quirks(e) => e.kind(),
            Self::DailyLog(e) => e.kind(),
            Self::Analytics(e) => e.kind(),
        }
    }
}

/// Combined stats across every store, returned by [`MemoryManager::get_stats`].
#[derive(Debug, Clone, serde::Serialize)]
pub struct MemoryStats {
    /// Whether memory is enabled by configuration.
    pub enabled: bool,
    /// Number of entries in the routing history journal.
    pub history_count: u64,
    /// Number of users with persisted preferences.
    pub preferences_user_count: usize,
    /// Number of documented provider quirks.
    pub quirks_count: usize,
    /// Daily-log directory stats, `None` when memory is disabled.
    pub daily_logs: Option<DailyLogStats>,
    /// When analytics were last computed, if ever.
    pub analytics_last_computed: Option<DateTime<Utc>>,
}

struct BackgroundTask {
    handle: tokio::task::JoinHandle<()>,
    shutdown: oneshot::Sender<()>,
}

/// Facade over the routing memory subsystem. Owns the history journal, the
/// preferences store, the quirks catalog, the daily-log manager, and the
/// analytics engine, and initializes their shared directory tree.
pub struct MemoryManager {
    config: MemoryConfig,
    stores: Option<Stores>,
    rotation_task: Option<BackgroundTask>,
    cleanup_task: Option<BackgroundTask>,
}

struct Stores {
    history: HistoryStore,
    preferences: PreferencesStore,
    quirks: QuirksStore,
    daily_logs: Arc<DailyLogsManager>,
    analytics: analytics::AnalyticsStore,
}

const CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_hours(24);

impl MemoryManager {
    /// Initializes the directory tree under `config.base_dir` and opens (or
    /// creates) every store. When `config.enabled` is `false`, no directories
    /// are created and the manager operates in no-op mode.
    ///
    /// # Errors
    ///
    /// Returns an error if any store fails to open.
    #[instrument(skip(config, time_provider))]
    pub async fn new(config: MemoryConfig, time_provider: SharedTimeProvider) -> Result<Self, MemoryError> {
        if !config.enabled {
            info!("routing memory disabled by configuration");
            return Ok(Self { config, stores: None, rotation_task: None, cleanup_task: None });
        }

        tokio::fs::create_dir_all(&config.base_dir)
            .await
            .map_err(|e| history_store::HistoryStoreError::Io(e.to_string()))?;

        let history_path = config.base_dir.join("history.jsonl");
        let preferences_dir = config.base_dir.join("preferences");
        let quirks_path = config.base_dir.join("quirks.md");
        let daily_dir = config.base_dir.join("daily");
        let analytics_dir = config.base_dir.join("analytics");

        let history = HistoryStore::open(history_path, time_provider.clone()).await?;
        let preferences = PreferencesStore::new(preferences_dir, time_provider.clone());
        let quirks = QuirksStore::load(quirks_path).await?;
        let daily_logs = Arc::new(DailyLogsManager::new(daily_dir, config.compression, time_provider.clone()).await?);
        let analytics = analytics::AnalyticsStore::new(analytics_dir).await?;

        let rotation_task = {
            let (handle, shutdown) =
                daily_logs::spawn_rotation_task(daily_logs.clone(), config.retention_days, time_provider.clone());
            BackgroundTask { handle, shutdown }
        };

        let stores = Stores { history, preferences, quirks, daily_logs, analytics };
        let mut manager = Self { config, stores: Some(stores), rotation_task: Some(rotation_task), cleanup_task: None };
        manager.spawn_cleanup_task(&time_provider);
        Ok(manager)
    }

    fn spawn_cleanup_task(&mut self, time_provider: &SharedTimeProvider) {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let retention_days = self.config.retention_days;
        let Some(stores) = &self.stores else { return };
        let daily_logs = stores.daily_logs.clone();
        let tp = time_provider.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = tp.sleep(CLEANUP_INTERVAL) => {}
                    _ = &mut shutdown_rx => return,
                }
                if let Err(e) = daily_logs.cleanup_old_logs(retention_days).await {
                    warn!(error = %e, "scheduled daily log cleanup failed");
                }
            }
        });
        self.cleanup_task = Some(BackgroundTask { handle, shutdown: shutdown_tx });
    }

    fn stores(&self) -> Option<&Stores> {
        self.stores.as_ref()
    }

    /// Records a routing decision to the journal and mirrors it into today's
    /// daily log under type `"routing"`. A no-op when memory is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error from the history store or daily log writer.
    pub async fn record_routing(&self, decision: &RoutingDecision) -> Result<(), MemoryError> {
        let Some(stores) = self.stores() else { return Ok(()) };
        stores.history.record_routing(decision.clone()).await?;
        let payload = serde_json::to_value(decision).unwrap_or(serde_json::Value::Null);
        stores.daily_logs.write_entry("routing", payload).await?;
        Ok(())
    }

    /// Updates per-user preferences from a completed decision's outcome and
    /// mirrors the event into today's daily log under type
    /// `"preference_update"`. A no-op when memory is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error from the preferences store or daily log writer.
    pub async fn learn_from_outcome(&self, decision: &RoutingDecision) -> Result<(), MemoryError> {
        let Some(stores) = self.stores() else { return Ok(()) };
        stores.preferences.learn_from_outcome(decision).await?;
        let payload = serde_json::json!({
            "user_hash": decision.user_hash,
            "intent": decision.request.intent,
            "provider": decision.provider(),
            "success": decision.outcome.success,
        });
        stores.daily_logs.write_entry("preference_update", payload).await?;
        Ok(())
    }

    /// Returns up to `limit` (default 100 when `None`) of a user's most
    /// recent decisions, newest first. Empty when memory is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error from the history store.
    pub async fn get_history(&self, user_hash: &UserHash, limit: Option<usize>) -> Result<Vec<RoutingDecision>, MemoryError> {
        let Some(stores) = self.stores() else { return Ok(Vec::new()) };
        Ok(stores.history.get_history(user_hash, limit).await?)
    }

    /// Returns up to `limit` (default 100 when `None`) of the most recent
    /// decisions across all users, newest first. Empty when memory is
    /// disabled.
    ///
    /// # Errors
    ///
    /// Returns an error from the history store.
    pub async fn get_all_history(&self, limit: Option<usize>) -> Result<Vec<RoutingDecision>, MemoryError> {
        let Some(stores) = self.stores() else { return Ok(Vec::new()) };
        Ok(stores.history.get_all_history(limit).await?)
    }

    /// Returns the given user's preferences, a freshly initialized default
    /// when absent, or a default when memory is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error from the preferences store.
    pub async fn get_user_preferences(&self, user_hash: &UserHash) -> Result<UserPreferences, MemoryError> {
        let Some(stores) = self.stores() else { return Ok(UserPreferences::default()) };
        Ok(stores.preferences.get_user_preferences(user_hash).await?)
    }

    /// Replaces a user's preferences wholesale. A no-op when memory is
    /// disabled.
    ///
    /// # Errors
    ///
    /// Returns an error from the preferences store.
    pub async fn update_user_preferences(&self, user_hash: &UserHash, prefs: UserPreferences) -> Result<(), MemoryError> {
        let Some(stores) = self.stores() else { return Ok(()) };
        stores.preferences.update_preferences(user_hash, prefs).await?;
        Ok(())
    }

    /// Deletes a user's stored preferences and evicts them from cache. A
    /// no-op when memory is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error from the preferences store.
    pub async fn delete_user_preferences(&self, user_hash: &UserHash) -> Result<(), MemoryError> {
        let Some(stores) = self.stores() else { return Ok(()) };
        stores.preferences.delete_user_preferences(user_hash).await?;
        Ok(())
    }

    /// Records or updates a provider quirk, mirroring the event into today's
    /// daily log under type `"quirk"`. A no-op when memory is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error from the quirks store or daily log writer.
    pub async fn add_quirk(&self, quirk: Quirk) -> Result<(), MemoryError> {
        let Some(stores) = self.stores() else { return Ok(()) };
        stores.quirks.add_quirk(quirk.clone()).await?;
        let payload = serde_json::json!({
            "provider": quirk.provider,
            "issue": quirk.issue,
            "severity": quirk.severity,
        });
        stores.daily_logs.write_entry("quirk", payload).await?;
        Ok(())
    }

    /// Returns the quirks documented for `provider`. Empty when memory is
    /// disabled.
    pub async fn get_provider_quirks(&self, provider: &ProviderName) -> Vec<Quirk> {
        let Some(stores) = self.stores() else { return Vec::new() };
        stores.quirks.get_provider_quirks(provider).await
    }

    /// Returns every documented quirk. Empty when memory is disabled.
    pub async fn get_all_quirks(&self) -> Vec<Quirk> {
        let Some(stores) = self.stores() else { return Vec::new() };
        stores.quirks.get_all_quirks().await
    }

    /// Returns quirks at or above `severity`. Empty when memory is disabled.
    pub async fn get_quirks_by_severity(&self, severity: Severity) -> Vec<Quirk> {
        let Some(stores) = self.stores() else { return Vec::new() };
        stores.quirks.get_quirks_by_severity(severity).await
    }

    /// Returns the last computed analytics summary, if any, without
    /// recomputing. `None` when memory is disabled or nothing has been
    /// computed yet.
    pub async fn get_analytics(&self) -> Option<AnalyticsSummary> {
        let stores = self.stores()?;
        stores.analytics.cached().await
    }

    /// Recomputes analytics from the full routing history journal,
    /// persisting and caching the result.
    ///
    /// # Errors
    ///
    /// Returns an error from the history store or analytics persistence layer.
    pub async fn compute_analytics(&self) -> Result<Option<AnalyticsSummary>, MemoryError> {
        let Some(stores) = self.stores() else { return Ok(None) };
        let decisions = stores.history.get_all_history(Some(usize::MAX)).await?;
        Ok(Some(stores.analytics.recompute(&decisions).await?))
    }

    /// Returns combined stats across every store. Reflects disabled state
    /// with `enabled: false` and zeroed counters.
    ///
    /// # Errors
    ///
    /// Returns an error from the history or daily-log store.
    pub async fn get_stats(&self) -> Result<MemoryStats, MemoryError> {
        let Some(stores) = self.stores() else {
            return Ok(MemoryStats {
                enabled: false,
                history_count: 0,
                preferences_user_count: 0,
                quirks_count: 0,
                daily_logs: None,
                analytics_last_computed: None,
            });
        };
        Ok(MemoryStats {
            enabled: true,
            history_count: u64::try_from(stores.history.count().await?).unwrap_or(u64::MAX),
            preferences_user_count: stores.preferences.list_users().await?.len(),
            quirks_count: stores.quirks.get_all_quirks().await.len(),
            daily_logs: Some(stores.daily_logs.get_stats(self.config.retention_days).await?),
            analytics_last_computed: stores.analytics.cached().await.map(|s| s.computed_at),
        })
    }

    /// Runs retention cleanup (daily-log deletion of expired files) and
    /// recomputes analytics. A no-op when memory is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error from the daily-log store or analytics layer.
    pub async fn cleanup(&self) -> Result<(), MemoryError> {
        let Some(stores) = self.stores() else { return Ok(()) };
        stores.daily_logs.cleanup_old_logs(self.config.retention_days).await?;
        let decisions = stores.history.get_all_history(Some(usize::MAX)).await?;
        stores.analytics.recompute(&decisions).await?;
        Ok(())
    }

    /// Shuts down background tasks and the history store's writer, fsyncing
    /// and closing its file. A no-op when memory is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error from the history store.
    pub async fn close(&mut self) -> Result<(), MemoryError> {
        if let Some(task) = self.rotation_task.take() {
            let _ = task.shutdown.send(());
            let _ = task.handle.await;
        }
        if let Some(task) = self.cleanup_task.take() {
            let _ = task.shutdown.send(());
            let _ = task.handle.await;
        }
        if let Some(stores) = self.stores.as_mut() {
            stores.history.close().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::decision::fixtures::sample_decision;
    use crate::time_provider::test_time_provider;

    async fn manager_in(dir: &std::path::Path) -> MemoryManager {
        let config = MemoryConfig { enabled: true, base_dir: dir.to_path_buf(), ..MemoryConfig::default() };
        MemoryManager::new(config, test_time_provider()).await.unwrap()
    }

    #[tokio::test]
    async fn record_routing_and_learn_mirror_into_daily_log_and_stores() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path()).await;
        let hash = format!("sha256:{}", "a".repeat(64));
        let decision = sample_decision(&hash, "coding", "ollama:llama3.1", true);

        manager.record_routing(&decision).await.unwrap();
        manager.learn_from_outcome(&decision).await.unwrap();

        let history = manager.get_history(&decision.user_hash, None).await.unwrap();
        assert_eq!(history.len(), 1);

        let prefs = manager.get_user_preferences(&decision.user_hash).await.unwrap();
        assert_eq!(prefs.model_preferences.get("coding").map(std::string::ToString::to_string), Some("ollama:llama3.1".to_string()));

        let stats = manager.get_stats().await.unwrap();
        assert_eq!(stats.history_count, 1);
        assert_eq!(stats.preferences_user_count, 1);
        let daily = stats.daily_logs.unwrap();
        assert_eq!(daily.approx_entry_count, 2);
    }

    #[tokio::test]
    async fn disabled_manager_is_a_well_formed_no_op() {
        let config = MemoryConfig { enabled: false, ..MemoryConfig::default() };
        let mut manager = MemoryManager::new(config, test_time_provider()).await.unwrap();
        let hash = format!("sha256:{}", "b".repeat(64));
        let decision = sample_decision(&hash, "coding", "ollama:llama3.1", true);

        manager.record_routing(&decision).await.unwrap();
        let history = manager.get_history(&decision.user_hash, None).await.unwrap();
        assert!(history.is_empty());

        let prefs = manager.get_user_preferences(&decision.user_hash).await.unwrap();
        assert!(prefs.model_preferences.is_empty());
        assert!(prefs.custom_rules.is_empty());

        let stats = manager.get_stats().await.unwrap();
        assert!(!stats.enabled);
        assert_eq!(stats.history_count, 0);

        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn compute_analytics_aggregates_recorded_decisions() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_in(dir.path()).await;
        let hash = format!("sha256:{}", "c".repeat(64));
        manager.record_routing(&sample_decision(&hash, "coding", "ollama:llama3.1", true)).await.unwrap();
        manager.record_routing(&sample_decision(&hash, "coding", "ollama:llama3.1", false)).await.unwrap();

        let summary = manager.compute_analytics().await.unwrap().unwrap();
        assert_eq!(summary.provider_stats["ollama"].total_requests, 2);

        let cached = manager.get_analytics().await.unwrap();
        assert_eq!(cached.computed_at, summary.computed_at);
    }

    #[tokio::test]
    async fn close_is_safe_to_call_and_stops_background_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager_in(dir.path()).await;
        manager.close().await.unwrap();
    }
}

//! Periodic provider health checking: a registry of pluggable
//! [`ProviderHealthChecker`]s, polled on an interval, emitting transition
//! and quota events to registered [`HeartbeatEventHandler`]s.

mod checker;
mod event;

pub use checker::{CheckOutcome, ProviderHealthChecker, QuotaInfo, extract_quota};
pub use event::{HeartbeatEvent, HeartbeatEventData, HeartbeatEventHandler};

use crate::config::HeartbeatConfig;
use crate::domain_types::ProviderStatus;
use crate::error::{ErrorClass, ErrorKind};
use crate::time_provider::SharedTimeProvider;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

/// Errors surfaced by the heartbeat monitor.
#[derive(Debug, thiserror::Error)]
pub enum HeartbeatError {
    /// No checker is registered under that provider name.
    #[error("provider not registered: {0}")]
    NotFound(String),
    /// A check attempt did not complete within its timeout.
    #[error("check timed out after {0:?}")]
    Timeout(Duration),
    /// `start` was called while the monitor was already running.
    #[error("heartbeat monitor is already running")]
    AlreadyRunning,
    /// `start` was called while `enabled = false`.
    #[error("heartbeat monitor is disabled")]
    Disabled,
    /// The checker itself reported a failure.
    #[error("check failed: {0}")]
    CheckFailed(String),
}

impl ErrorClass for HeartbeatError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::AlreadyRunning => ErrorKind::Conflict,
            Self::Disabled => ErrorKind::Validation,
            Self::CheckFailed(_) => ErrorKind::Io,
        }
    }
}

/// A point-in-time snapshot of one provider's last observed health.
#[derive(Debug, Clone)]
struct ProviderSnapshot {
    status: ProviderStatus,
    last_check: DateTime<Utc>,
    response_time: Duration,
    quota: Option<QuotaInfo>,
}

impl ProviderSnapshot {
    fn view(&self) -> ProviderSnapshotView {
        ProviderSnapshotView {
            status: self.status,
            last_check: self.last_check,
            response_time: self.response_time,
            quota: self.quota,
        }
    }
}

/// A read-only view of [`HeartbeatMonitor::provider_snapshot`]'s result.
#[derive(Debug, Clone, Copy)]
pub struct ProviderSnapshotView {
    /// The provider's last observed status.
    pub status: ProviderStatus,
    /// When it was last checked.
    pub last_check: DateTime<Utc>,
    /// How long that check took.
    pub response_time: Duration,
    /// Its last observed quota usage, if the checker reports quota.
    pub quota: Option<QuotaInfo>,
}

/// Aggregate counters exposed by [`HeartbeatMonitor::stats`].
#[derive(Debug, Clone, Default)]
pub struct HeartbeatStats {
    /// When the monitor was last started, if ever.
    pub start_time: Option<DateTime<Utc>>,
    /// When the last check cycle completed.
    pub last_cycle_time: Option<DateTime<Utc>>,
    /// Number of completed `CheckAll` cycles.
    pub total_cycles: u64,
    /// Number of individual check attempts, across all providers and retries.
    pub total_checks: u64,
    /// Number of check attempts that returned successfully.
    pub successful_checks: u64,
    /// Number of check attempts that failed or timed out.
    pub failed_checks: u64,
    /// Number of providers currently registered.
    pub providers_monitored: usize,
    /// Current status counts across registered providers.
    pub status_counts: HashMap<ProviderStatus, usize>,
}

#[derive(Debug, Default)]
struct StatsInner {
    start_time: Option<DateTime<Utc>>,
    last_cycle_time: Option<DateTime<Utc>>,
    total_cycles: u64,
    total_checks: u64,
    successful_checks: u64,
    failed_checks: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
}

struct RunHandle {
    state: RunState,
    cancel: Option<watch::Sender<bool>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl Default for RunHandle {
    fn default() -> Self {
        Self {
            state: RunState::Idle,
            cancel: None,
            task: None,
        }
    }
}

/// Polls registered providers on an interval and fans out health
/// transitions and quota alerts to registered handlers.
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    time_provider: SharedTimeProvider,
    checkers: DashMap<String, Arc<dyn ProviderHealthChecker>>,
    snapshots: DashMap<String, ProviderSnapshot>,
    handlers: RwLock<Vec<Arc<dyn HeartbeatEventHandler>>>,
    semaphore: Arc<tokio::sync::Semaphore>,
    stats: RwLock<StatsInner>,
    run: Mutex<RunHandle>,
}

impl HeartbeatMonitor {
    /// Builds a monitor with no checkers or handlers registered yet.
    #[must_use]
    pub fn new(config: HeartbeatConfig, time_provider: SharedTimeProvider) -> Arc<Self> {
        let max_concurrent = config.max_concurrent_checks.max(1);
        Arc::new(Self {
            config,
            time_provider,
            checkers: DashMap::new(),
            snapshots: DashMap::new(),
            handlers: RwLock::new(Vec::new()),
            semaphore: Arc::new(tokio::sync::Semaphore::new(max_concurrent)),
            stats: RwLock::new(StatsInner::default()),
            run: Mutex::new(RunHandle::default()),
        })
    }

    /// Registers a checker under its own reported name, replacing any
    /// checker previously registered under that name.
    pub fn register_checker(&self, checker: Arc<dyn ProviderHealthChecker>) {
        self.checkers.insert(checker.name().to_string(), checker);
    }

    /// Registers an event handler. Handlers cannot be unregistered; the
    /// monitor is expected to be built once with its full handler set.
    pub async fn register_handler(&self, handler: Arc<dyn HeartbeatEventHandler>) {
        self.handlers.write().await.push(handler);
    }

    /// Whether the monitor's check loop is currently running.
    pub async fn is_running(&self) -> bool {
        self.run.lock().await.state == RunState::Running
    }

    /// Starts the periodic check loop. Refuses when the monitor is
    /// configured disabled, or when already running.
    ///
    /// # Errors
    ///
    /// Returns [`HeartbeatError::Disabled`] when `config.enabled` is false,
    /// or [`HeartbeatError::AlreadyRunning`] when the loop is already
    /// active.
    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) -> Result<(), HeartbeatError> {
        if !self.config.enabled {
            return Err(HeartbeatError::Disabled);
        }
        let mut guard = self.run.lock().await;
        if guard.state == RunState::Running {
            return Err(HeartbeatError::AlreadyRunning);
        }

        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let this = Arc::clone(self);
        let interval = self.config.interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = this.time_provider.sleep(interval) => {
                        this.check_all().await;
                    }
                    _ = cancel_rx.changed() => {
                        break;
                    }
                }
            }
        });

        guard.state = RunState::Running;
        guard.cancel = Some(cancel_tx);
        guard.task = Some(handle);
        drop(guard);

        self.stats.write().await.start_time = Some(Utc::now());
        info!("heartbeat monitor started");
        self.emit(HeartbeatEvent::HeartbeatStarted { timestamp: Utc::now() }).await;
        Ok(())
    }

    /// Stops the periodic check loop. Idempotent: stopping an already-idle
    /// monitor is a no-op.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let mut guard = self.run.lock().await;
        if guard.state != RunState::Running {
            return;
        }
        if let Some(tx) = guard.cancel.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = guard.task.take() {
            let _ = task.await;
        }
        guard.state = RunState::Idle;
        drop(guard);
        info!("heartbeat monitor stopped");
        self.emit(HeartbeatEvent::HeartbeatStopped { timestamp: Utc::now() }).await;
    }

    /// Runs a single check cycle across every registered provider, bounded
    /// by `max_concurrent_checks`.
    ///
    /// # Panics
    ///
    /// Never panics: the concurrency semaphore is never closed, so
    /// `acquire_owned` always succeeds.
    #[instrument(skip(self))]
    pub async fn check_all(self: &Arc<Self>) {
        let names: Vec<String> = self.checkers.iter().map(|e| e.key().clone()).collect();
        let mut set = JoinSet::new();
        for name in names {
            let this = Arc::clone(self);
            let semaphore = Arc::clone(&this.semaphore);
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                this.run_checks_for(&name).await;
            });
        }
        while set.join_next().await.is_some() {}

        let mut stats = self.stats.write().await;
        stats.total_cycles += 1;
        stats.last_cycle_time = Some(Utc::now());
    }

    /// Directly checks one provider, bypassing the concurrency gate. Exposed
    /// for tests and callers that need an on-demand check.
    ///
    /// # Errors
    ///
    /// Returns [`HeartbeatError::NotFound`] when no checker is registered
    /// under that name.
    pub async fn check_provider(&self, name: &str) -> Result<ProviderStatus, HeartbeatError> {
        if !self.checkers.contains_key(name) {
            return Err(HeartbeatError::NotFound(name.to_string()));
        }
        Ok(self.run_checks_for(name).await)
    }

    /// Runs the retry loop for one provider and returns its settled status.
    async fn run_checks_for(&self, name: &str) -> ProviderStatus {
        let Some(checker) = self.checkers.get(name).map(|e| Arc::clone(e.value())) else {
            return ProviderStatus::Unavailable;
        };

        let (outcome, last_error) = self.retry_until_settled(checker.as_ref()).await;

        let status = outcome.as_ref().map_or(ProviderStatus::Unavailable, |o| o.status);
        let response_time = outcome.as_ref().map_or(Duration::ZERO, |o| o.response_time);
        let quota = outcome
            .as_ref()
            .filter(|_| checker.supports_quota())
            .and_then(|o| extract_quota(&o.headers));

        let previous = self.snapshots.get(name).map(|s| s.status);
        self.snapshots.insert(
            name.to_string(),
            ProviderSnapshot {
                status,
                last_check: Utc::now(),
                response_time,
                quota,
            },
        );

        self.emit_check_events(
            name,
            checker.as_ref(),
            outcome.as_ref(),
            last_error.as_deref(),
            previous,
            status,
            response_time,
            quota,
        )
        .await;

        status
    }

    /// Runs one provider's retry loop, returning its final outcome (if any
    /// attempt succeeded) and the last error text (if every attempt failed).
    async fn retry_until_settled(
        &self,
        checker: &dyn ProviderHealthChecker,
    ) -> (Option<CheckOutcome>, Option<String>) {
        let attempts_total = 1 + self.config.retry_attempts;
        let mut outcome: Option<CheckOutcome> = None;
        let mut last_error: Option<String> = None;

        for attempt in 0..attempts_total {
            let result = self.checked_attempt(checker).await;
            {
                let mut stats = self.stats.write().await;
                stats.total_checks += 1;
                if result.is_ok() {
                    stats.successful_checks += 1;
                } else {
                    stats.failed_checks += 1;
                }
            }
            match result {
                Ok(o) => {
                    outcome = Some(o);
                    last_error = None;
                    break;
                }
                Err(e) => last_error = Some(e.to_string()),
            }
            if attempt + 1 < attempts_total {
                self.time_provider.sleep(self.config.retry_delay).await;
            }
        }

        (outcome, last_error)
    }

    /// Emits every event implied by one provider's settled check result:
    /// failure, status transition, quota threshold, and model discovery.
    #[allow(clippy::too_many_arguments)]
    async fn emit_check_events(
        &self,
        name: &str,
        checker: &dyn ProviderHealthChecker,
        outcome: Option<&CheckOutcome>,
        last_error: Option<&str>,
        previous: Option<ProviderStatus>,
        status: ProviderStatus,
        response_time: Duration,
        quota: Option<QuotaInfo>,
    ) {
        if let Some(error) = last_error {
            warn!(provider = name, error, "health check failed after all retries");
            self.emit(HeartbeatEvent::HealthCheckFailed(HeartbeatEventData {
                provider: name.to_string(),
                timestamp: Utc::now(),
                status: Some(status),
                previous_status: previous,
                last_check: Some(Utc::now()),
                response_time: Some(response_time),
                error: Some(error.to_string()),
                ..Default::default()
            }))
            .await;
        }

        if previous != Some(status) {
            let data = HeartbeatEventData {
                provider: name.to_string(),
                timestamp: Utc::now(),
                status: Some(status),
                previous_status: previous,
                last_check: Some(Utc::now()),
                response_time: Some(response_time),
                models_count: outcome.as_ref().and_then(|o| o.discovered_models.as_ref()).map(Vec::len),
                quota_used: quota.map(|q| q.used),
                quota_limit: quota.map(|q| q.limit),
                ..Default::default()
            };
            let event = match status {
                ProviderStatus::Healthy => HeartbeatEvent::ProviderHealthy(data),
                ProviderStatus::Degraded => HeartbeatEvent::ProviderDegraded(data),
                ProviderStatus::Unavailable => HeartbeatEvent::ProviderUnavailable(data),
            };
            self.emit(event).await;
        }

        if let Some(quota) = quota {
            let ratio = quota.ratio();
            let base = HeartbeatEventData {
                provider: name.to_string(),
                timestamp: Utc::now(),
                status: Some(status),
                quota_used: Some(quota.used),
                quota_limit: Some(quota.limit),
                last_check: Some(Utc::now()),
                ..Default::default()
            };
            if ratio >= self.config.quota_critical_threshold {
                self.emit(HeartbeatEvent::QuotaCritical(base)).await;
            } else if ratio >= self.config.quota_warning_threshold {
                self.emit(HeartbeatEvent::QuotaWarning(base)).await;
            }
        }

        if self.config.auto_discovery
            && checker.supports_auto_discovery()
            && let Some(models) = outcome.as_ref().and_then(|o| o.discovered_models.clone())
        {
            self.emit(HeartbeatEvent::ModelDiscovered(HeartbeatEventData {
                provider: name.to_string(),
                timestamp: Utc::now(),
                status: Some(status),
                models_count: Some(models.len()),
                data: HashMap::from([("models".to_string(), models.join(","))]),
                ..Default::default()
            }))
            .await;
        }
    }

    /// Runs one timed attempt, racing the checker's future against the
    /// configured per-check timeout.
    async fn checked_attempt(&self, checker: &dyn ProviderHealthChecker) -> Result<CheckOutcome, HeartbeatError> {
        tokio::select! {
            result = checker.check() => result,
            () = self.time_provider.sleep(self.config.timeout) => Err(HeartbeatError::Timeout(self.config.timeout)),
        }
    }

    async fn emit(&self, event: HeartbeatEvent) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(event.clone()).await;
        }
    }

    /// Returns the last observed snapshot for a provider, if it has been
    /// checked at least once.
    #[must_use]
    pub fn provider_snapshot(&self, name: &str) -> Option<ProviderSnapshotView> {
        self.snapshots.get(name).map(|s| s.view())
    }

    /// Returns a snapshot of the monitor's current statistics.
    pub async fn stats(&self) -> HeartbeatStats {
        let inner = self.stats.read().await;
        let mut status_counts: HashMap<ProviderStatus, usize> = HashMap::new();
        for entry in &self.snapshots {
            *status_counts.entry(entry.value().status).or_insert(0) += 1;
        }
        HeartbeatStats {
            start_time: inner.start_time,
            last_cycle_time: inner.last_cycle_time,
            total_cycles: inner.total_cycles,
            total_checks: inner.total_checks,
            successful_checks: inner.successful_checks,
            failed_checks: inner.failed_checks,
            providers_monitored: self.checkers.len(),
            status_counts,
        }
    }
}

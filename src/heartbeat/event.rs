//! Events emitted by the heartbeat monitor and the handler interface that
//! consumes them.

use crate::domain_types::ProviderStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// The fields carried by every per-provider heartbeat event. Not every
/// field is populated by every event kind; bridges pick whichever fields
/// are relevant to the event they are translating.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatEventData {
    /// The provider this event is about.
    pub provider: String,
    /// When the monitor observed this.
    pub timestamp: DateTime<Utc>,
    /// The status this event reports, if any.
    pub status: Option<ProviderStatus>,
    /// The status stored for this provider before this event.
    pub previous_status: Option<ProviderStatus>,
    /// When this provider was last checked.
    pub last_check: Option<DateTime<Utc>>,
    /// How long the triggering check took.
    pub response_time: Option<Duration>,
    /// Number of models discovered, if auto-discovery ran.
    pub models_count: Option<usize>,
    /// Quota units consumed, if quota extraction succeeded.
    pub quota_used: Option<u64>,
    /// Quota units allotted, if quota extraction succeeded.
    pub quota_limit: Option<u64>,
    /// The error text, for failure-flavored events.
    pub error: Option<String>,
    /// Free-form extra data a bridge may want to forward verbatim.
    pub data: HashMap<String, String>,
}

/// Everything the heartbeat monitor can emit to its registered handlers.
#[derive(Debug, Clone)]
pub enum HeartbeatEvent {
    /// A provider's status settled on [`ProviderStatus::Healthy`] after
    /// previously being something else.
    ProviderHealthy(HeartbeatEventData),
    /// A provider's status settled on [`ProviderStatus::Degraded`] after
    /// previously being something else.
    ProviderDegraded(HeartbeatEventData),
    /// A provider's status settled on [`ProviderStatus::Unavailable`] after
    /// previously being something else.
    ProviderUnavailable(HeartbeatEventData),
    /// A single check attempt failed (distinct from the status settling on
    /// unavailable, which only fires on a state *change*).
    HealthCheckFailed(HeartbeatEventData),
    /// Quota usage crossed the warning threshold.
    QuotaWarning(HeartbeatEventData),
    /// Quota usage crossed the critical threshold.
    QuotaCritical(HeartbeatEventData),
    /// Auto-discovery found the provider's available models.
    ModelDiscovered(HeartbeatEventData),
    /// The monitor transitioned `idle -> running`.
    HeartbeatStarted {
        /// When the monitor started.
        timestamp: DateTime<Utc>,
    },
    /// The monitor transitioned `running -> idle`.
    HeartbeatStopped {
        /// When the monitor stopped.
        timestamp: DateTime<Utc>,
    },
}

impl HeartbeatEvent {
    /// The event kind as the lowercase, snake-case name used in the spec's
    /// event-mapping tables and in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ProviderHealthy(_) => "provider_healthy",
            Self::ProviderDegraded(_) => "provider_degraded",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::HealthCheckFailed(_) => "health_check_failed",
            Self::QuotaWarning(_) => "quota_warning",
            Self::QuotaCritical(_) => "quota_critical",
            Self::ModelDiscovered(_) => "model_discovered",
            Self::HeartbeatStarted { .. } => "heartbeat_started",
            Self::HeartbeatStopped { .. } => "heartbeat_stopped",
        }
    }

    /// The provider this event concerns, if any (the two lifecycle events
    /// are monitor-wide, not per-provider).
    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::ProviderHealthy(d)
            | Self::ProviderDegraded(d)
            | Self::ProviderUnavailable(d)
            | Self::HealthCheckFailed(d)
            | Self::QuotaWarning(d)
            | Self::QuotaCritical(d)
            | Self::ModelDiscovered(d) => Some(d.provider.as_str()),
            Self::HeartbeatStarted { .. } | Self::HeartbeatStopped { .. } => None,
        }
    }

    /// When the monitor observed whatever this event reports.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::ProviderHealthy(d)
            | Self::ProviderDegraded(d)
            | Self::ProviderUnavailable(d)
            | Self::HealthCheckFailed(d)
            | Self::QuotaWarning(d)
            | Self::QuotaCritical(d)
            | Self::ModelDiscovered(d) => d.timestamp,
            Self::HeartbeatStarted { timestamp } | Self::HeartbeatStopped { timestamp } => *timestamp,
        }
    }
}

/// Implemented by anything that wants to react to heartbeat events: the
/// recovery manager, the event-bus bridge, or a test harness.
#[async_trait]
pub trait HeartbeatEventHandler: Send + Sync {
    /// Handles one event. Handlers must not block indefinitely; the monitor
    /// awaits each handler in turn for a single provider's events, so a slow
    /// handler delays delivery to itself but not to other subscribers.
    async fn handle(&self, event: HeartbeatEvent);
}

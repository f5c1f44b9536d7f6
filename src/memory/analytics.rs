//! Pure aggregation over routing decisions, with a thin persistence shell
//! that serializes results to the analytics directory and caches them.

use crate::domain_types::Tier;
use crate::error::{ErrorClass, ErrorKind};
use crate::memory::decision::RoutingDecision;
use chrono::{DateTime, NaiveDate, Timelike, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::instrument;

/// Local-inference provider name prefixes, which are costed at zero.
const LOCAL_PROVIDER_PREFIXES: [&str; 3] = ["ollama", "lmstudio", "localai"];

/// Flat per-request base cost the provider multiplier table scales.
const BASE_COST_PER_REQUEST: &str = "0.002";

/// Multiplier used for a local decision's hypothetical non-local cost when
/// this batch contains no non-local decisions to average from.
const ASSUMED_NON_LOCAL_MULTIPLIER: &str = "4.0";

fn provider_multiplier(provider: &str) -> Decimal {
    match provider {
        "anthropic" | "claudecli" => Decimal::from_str("5.0").unwrap(),
        "openai" => Decimal::from_str("4.0").unwrap(),
        "google" | "vertexai" => Decimal::from_str("3.0").unwrap(),
        "azure" => Decimal::from_str("3.5").unwrap(),
        p if LOCAL_PROVIDER_PREFIXES.contains(&p) => Decimal::ZERO,
        _ => Decimal::from_str("1.0").unwrap(),
    }
}

fn is_local_provider(provider: &str) -> bool {
    LOCAL_PROVIDER_PREFIXES.contains(&provider)
}

fn estimated_cost(provider: &str) -> Decimal {
    if is_local_provider(provider) {
        return Decimal::ZERO;
    }
    Decimal::from_str(BASE_COST_PER_REQUEST).unwrap() * provider_multiplier(provider)
}

/// Aggregate stats for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderStats {
    /// Total requests routed to this provider.
    pub total_requests: u64,
    /// Fraction of requests that succeeded.
    pub success_rate: f64,
    /// Mean end-to-end response time, in milliseconds.
    pub mean_response_time_ms: f64,
    /// Fraction of requests that failed.
    pub error_rate: f64,
    /// When this provider's stats were last computed.
    pub last_updated: DateTime<Utc>,
}

/// Aggregate stats for one `provider:model`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPerformance {
    /// Total requests routed to this model.
    pub total_requests: u64,
    /// Fraction of requests that succeeded.
    pub success_rate: f64,
    /// Mean quality score across requests.
    pub mean_quality_score: f64,
    /// Mean estimated cost per request.
    pub mean_estimated_cost: Decimal,
}

/// Aggregate stats for one routing tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierEffectiveness {
    /// Total requests routed through this tier.
    pub total_requests: u64,
    /// Fraction of requests that succeeded.
    pub success_rate: f64,
}

/// Cost breakdown across the analyzed decisions.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CostAnalysis {
    /// Total estimated cost across every decision.
    pub total_cost: Decimal,
    /// Estimated cost, summed per provider.
    pub by_provider: HashMap<String, Decimal>,
    /// Estimated cost, summed per `provider:model`.
    pub by_model: HashMap<String, Decimal>,
    /// Estimated cost, summed per calendar date.
    pub daily_trend: HashMap<NaiveDate, Decimal>,
    /// What non-local costs would have been, had every local request instead
    /// been routed to a non-local model.
    pub savings_from_local: Decimal,
}

/// Date-bucketed request volume, success rate, and latency series.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TrendSeries {
    /// Calendar dates covered, in ascending order.
    pub dates: Vec<NaiveDate>,
    /// Request count for each date in `dates`.
    pub request_volume: Vec<u64>,
    /// Success rate for each date in `dates`.
    pub success_rate: Vec<f64>,
    /// Mean response time, in milliseconds, for each date in `dates`.
    pub mean_latency_ms: Vec<f64>,
}

/// One entry in the top-N popular models ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelPopularity {
    /// The model in canonical `provider:model` form.
    pub model: String,
    /// Number of decisions that selected this model.
    pub count: u64,
    /// Fraction of all analyzed decisions that selected this model.
    pub share: f64,
}

/// One bucket of the 24-hour request distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HourlyBucket {
    /// Hour of day, `0..24`, in the process's local time zone.
    pub hour: u8,
    /// Number of requests observed in this hour.
    pub count: u64,
}

/// Full computed analytics summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsSummary {
    /// When this summary was computed.
    pub computed_at: DateTime<Utc>,
    /// Per-provider stats, keyed by provider name.
    pub provider_stats: HashMap<String, ProviderStats>,
    /// Per-model stats, keyed by canonical `provider:model`.
    pub model_performance: HashMap<String, ModelPerformance>,
    /// Per-tier stats.
    pub tier_effectiveness: HashMap<Tier, TierEffectiveness>,
    /// Cost breakdown across the analyzed decisions.
    pub cost: CostAnalysis,
    /// Date-bucketed trend series.
    pub trend: TrendSeries,
    /// The most popular models, most popular first.
    pub top_models: Vec<ModelPopularity>,
    /// 24-bin hourly request distribution, sorted by count descending.
    pub hourly_distribution: Vec<HourlyBucket>,
}

#[derive(Default)]
struct Accumulated {
    provider_totals: HashMap<String, (u64, u64, u64)>, // total, successes, sum_latency
    model_totals: HashMap<String, (u64, u64, f64, Decimal)>, // total, successes, sum_quality, sum_cost
    tier_totals: HashMap<Tier, (u64, u64)>,
    by_provider_cost: HashMap<String, Decimal>,
    by_model_cost: HashMap<String, Decimal>,
    by_day_cost: HashMap<NaiveDate, Decimal>,
    by_day: HashMap<NaiveDate, (u64, u64, u64)>,
    model_counts: HashMap<String, u64>,
    hourly: [u64; 24],
    total_cost: Decimal,
    local_count: u64,
    non_local_cost_sum: Decimal,
    non_local_count: u64,
}

fn accumulate(decisions: &[RoutingDecision]) -> Accumulated {
    let mut t = Accumulated::default();

    for d in decisions {
        let provider = d.provider().to_string();
        let model = d.routing.selected_model.to_string();
        let latency: u64 = d.outcome.response_time_ms.into_inner();
        let cost = estimated_cost(&provider);
        let day = d.timestamp.date_naive();
        let hour = usize::try_from(d.timestamp.hour()).unwrap_or(0);

        let p = t.provider_totals.entry(provider.clone()).or_insert((0, 0, 0));
        p.0 += 1;
        p.1 += u64::from(d.outcome.success);
        p.2 += latency;

        let m = t.model_totals.entry(model.clone()).or_insert((0, 0, 0.0, Decimal::ZERO));
        m.0 += 1;
        m.1 += u64::from(d.outcome.success);
        m.2 += d.outcome.quality_score.into_inner();
        m.3 += cost;

        let tier = t.tier_totals.entry(d.routing.tier).or_insert((0, 0));
        tier.0 += 1;
        tier.1 += u64::from(d.outcome.success);

        *t.by_provider_cost.entry(provider.clone()).or_insert(Decimal::ZERO) += cost;
        *t.by_model_cost.entry(model.clone()).or_insert(Decimal::ZERO) += cost;
        *t.by_day_cost.entry(day).or_insert(Decimal::ZERO) += cost;
        t.total_cost += cost;

        if is_local_provider(&provider) {
            t.local_count += 1;
        } else {
            t.non_local_cost_sum += cost;
            t.non_local_count += 1;
        }

        let db = t.by_day.entry(day).or_insert((0, 0, 0));
        db.0 += 1;
        db.1 += u64::from(d.outcome.success);
        db.2 += latency;

        *t.model_counts.entry(model).or_insert(0) += 1;
        t.hourly[hour] += 1;
    }

    t
}

/// Falls back to the assumed per-request cost when a batch contains no
/// non-local decisions to estimate savings from.
///
/// # Panics
///
/// Never panics: [`BASE_COST_PER_REQUEST`] and [`ASSUMED_NON_LOCAL_MULTIPLIER`]
/// are fixed valid decimal literals.
fn non_local_average_cost(non_local_cost_sum: Decimal, non_local_count: u64) -> Decimal {
    if non_local_count > 0 {
        non_local_cost_sum / Decimal::from(non_local_count)
    } else {
        Decimal::from_str(BASE_COST_PER_REQUEST).unwrap_or(Decimal::ZERO)
            * Decimal::from_str(ASSUMED_NON_LOCAL_MULTIPLIER).unwrap_or(Decimal::ONE)
    }
}

fn build_trend(by_day: &HashMap<NaiveDate, (u64, u64, u64)>) -> TrendSeries {
    let mut dates: Vec<NaiveDate> = by_day.keys().copied().collect();
    dates.sort();
    let mut trend = TrendSeries::default();
    #[allow(clippy::cast_precision_loss)]
    for date in &dates {
        let (total, successes, sum_latency) = by_day[date];
        trend.dates.push(*date);
        trend.request_volume.push(total);
        trend.success_rate.push(successes as f64 / total as f64);
        trend.mean_latency_ms.push(sum_latency as f64 / total as f64);
    }
    trend
}

fn build_top_models(model_counts: HashMap<String, u64>, total_decisions: u64, top_n: usize) -> Vec<ModelPopularity> {
    #[allow(clippy::cast_precision_loss)]
    let mut top_models: Vec<ModelPopularity> = model_counts
        .into_iter()
        .map(|(model, count)| {
            let share = if total_decisions > 0 { count as f64 / total_decisions as f64 } else { 0.0 };
            ModelPopularity { model, count, share }
        })
        .collect();
    top_models.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.model.cmp(&b.model)));
    top_models.truncate(top_n);
    top_models
}

fn build_hourly_distribution(hourly: [u64; 24]) -> Vec<HourlyBucket> {
    let mut hourly_distribution: Vec<HourlyBucket> = hourly
        .iter()
        .enumerate()
        .map(|(hour, count)| HourlyBucket { hour: u8::try_from(hour).unwrap_or(0), count: *count })
        .collect();
    hourly_distribution.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.hour.cmp(&b.hour)));
    hourly_distribution
}

/// Computes an [`AnalyticsSummary`] from a slice of routing decisions. Pure;
/// does no I/O.
#[must_use]
pub fn compute(decisions: &[RoutingDecision], top_n: usize) -> AnalyticsSummary {
    let now = Utc::now();
    let t = accumulate(decisions);

    #[allow(clippy::cast_precision_loss)]
    let provider_stats = t
        .provider_totals
        .into_iter()
        .map(|(provider, (total, successes, sum_latency))| {
            let stats = ProviderStats {
                total_requests: total,
                success_rate: successes as f64 / total as f64,
                mean_response_time_ms: sum_latency as f64 / total as f64,
                error_rate: (total - successes) as f64 / total as f64,
                last_updated: now,
            };
            (provider, stats)
        })
        .collect();

    #[allow(clippy::cast_precision_loss)]
    let model_performance = t
        .model_totals
        .into_iter()
        .map(|(model, (total, successes, sum_quality, sum_cost))| {
            let perf = ModelPerformance {
                total_requests: total,
                success_rate: successes as f64 / total as f64,
                mean_quality_score: sum_quality / total as f64,
                mean_estimated_cost: sum_cost / Decimal::from(total),
            };
            (model, perf)
        })
        .collect();

    #[allow(clippy::cast_precision_loss)]
    let tier_effectiveness = t
        .tier_totals
        .into_iter()
        .map(|(tier, (total, successes))| {
            let eff = TierEffectiveness { total_requests: total, success_rate: successes as f64 / total as f64 };
            (tier, eff)
        })
        .collect();

    let non_local_avg = non_local_average_cost(t.non_local_cost_sum, t.non_local_count);
    let savings_from_local = non_local_avg * Decimal::from(t.local_count);

    let cost = CostAnalysis {
        total_cost: t.total_cost,
        by_provider: t.by_provider_cost,
        by_model: t.by_model_cost,
        daily_trend: t.by_day_cost,
        savings_from_local,
    };

    let trend = build_trend(&t.by_day);
    let total_decisions = u64::try_from(decisions.len()).unwrap_or(u64::MAX);
    let top_models = build_top_models(t.model_counts, total_decisions, top_n);
    let hourly_distribution = build_hourly_distribution(t.hourly);

    AnalyticsSummary {
        computed_at: now,
        provider_stats,
        model_performance,
        tier_effectiveness,
        cost,
        trend,
        top_models,
        hourly_distribution,
    }
}

/// Errors from the analytics persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    /// A filesystem or serialization fault writing the analytics output files.
    #[error("analytics I/O error: {0}")]
    Io(String),
}

impl ErrorClass for AnalyticsError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Io
    }
}

/// Owns the on-disk analytics directory and an in-memory cache of the last
/// computed summary.
pub struct AnalyticsStore {
    dir: PathBuf,
    cache: RwLock<Option<AnalyticsSummary>>,
}

const TOP_N_MODELS: usize = 10;

impl AnalyticsStore {
    /// Creates a store rooted at `dir` (e.g. `<base>/memory/analytics`).
    ///
    /// # Errors
    ///
    /// Returns an error if `dir` cannot be created.
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, AnalyticsError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| AnalyticsError::Io(e.to_string()))?;
        Ok(Self { dir, cache: RwLock::new(None) })
    }

    /// Recomputes analytics from `decisions`, persists the three output
    /// files, and refreshes the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if any output file cannot be written.
    #[instrument(skip(self, decisions))]
    pub async fn recompute(&self, decisions: &[RoutingDecision]) -> Result<AnalyticsSummary, AnalyticsError> {
        let summary = compute(decisions, TOP_N_MODELS);

        let provider_json =
            serde_json::to_vec_pretty(&summary.provider_stats).map_err(|e| AnalyticsError::Io(e.to_string()))?;
        tokio::fs::write(self.dir.join("provider-stats.json"), provider_json)
            .await
            .map_err(|e| AnalyticsError::Io(e.to_string()))?;

        let model_json =
            serde_json::to_vec_pretty(&summary.model_performance).map_err(|e| AnalyticsError::Io(e.to_string()))?;
        tokio::fs::write(self.dir.join("model-performance.json"), model_json)
            .await
            .map_err(|e| AnalyticsError::Io(e.to_string()))?;

        let summary_json = serde_json::to_vec_pretty(&summary).map_err(|e| AnalyticsError::Io(e.to_string()))?;
        tokio::fs::write(self.dir.join("analytics-summary.json"), summary_json)
            .await
            .map_err(|e| AnalyticsError::Io(e.to_string()))?;

        *self.cache.write().await = Some(summary.clone());
        Ok(summary)
    }

    /// Returns the last cached summary, if `recompute` has ever run.
    pub async fn cached(&self) -> Option<AnalyticsSummary> {
        self.cache.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::decision::fixtures::sample_decision;

    fn hash(n: u8) -> String {
        format!("sha256:{}", n.to_string().repeat(64).chars().take(64).collect::<String>())
    }

    #[test]
    fn provider_stats_aggregate_success_rate_and_latency() {
        let decisions = vec![
            sample_decision(&hash(1), "coding", "ollama:llama3.1", true),
            sample_decision(&hash(1), "coding", "ollama:llama3.1", false),
        ];
        let summary = compute(&decisions, 10);
        let stats = &summary.provider_stats["ollama"];
        assert_eq!(stats.total_requests, 2);
        assert!((stats.success_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn local_provider_decisions_cost_zero() {
        let decisions = vec![sample_decision(&hash(1), "coding", "ollama:llama3.1", true)];
        let summary = compute(&decisions, 10);
        assert_eq!(summary.cost.total_cost, Decimal::ZERO);
    }

    #[test]
    fn non_local_provider_decisions_accrue_cost() {
        let decisions = vec![sample_decision(&hash(1), "coding", "anthropic:claude-3-5", true)];
        let summary = compute(&decisions, 10);
        assert!(summary.cost.total_cost > Decimal::ZERO);
        assert!(summary.cost.by_provider["anthropic"] > Decimal::ZERO);
    }

    #[test]
    fn savings_from_local_uses_assumed_multiplier_with_no_non_local_data() {
        let decisions = vec![sample_decision(&hash(1), "coding", "ollama:llama3.1", true)];
        let summary = compute(&decisions, 10);
        assert!(summary.cost.savings_from_local > Decimal::ZERO);
    }

    #[test]
    fn top_models_share_sums_reflect_total_decisions() {
        let decisions = vec![
            sample_decision(&hash(1), "coding", "prov:m1", true),
            sample_decision(&hash(1), "coding", "prov:m1", true),
            sample_decision(&hash(1), "coding", "prov:m2", true),
        ];
        let summary = compute(&decisions, 10);
        let top = &summary.top_models[0];
        assert_eq!(top.model, "prov:m1");
        assert_eq!(top.count, 2);
        assert!((top.share - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn hourly_distribution_has_24_buckets_sorted_descending() {
        let decisions = vec![sample_decision(&hash(1), "coding", "prov:m1", true)];
        let summary = compute(&decisions, 10);
        assert_eq!(summary.hourly_distribution.len(), 24);
        for w in summary.hourly_distribution.windows(2) {
            assert!(w[0].count >= w[1].count);
        }
    }

    #[tokio::test]
    async fn recompute_writes_three_files_and_populates_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = AnalyticsStore::new(dir.path()).await.unwrap();
        let decisions = vec![sample_decision(&hash(1), "coding", "ollama:llama3.1", true)];
        store.recompute(&decisions).await.unwrap();

        assert!(dir.path().join("provider-stats.json").exists());
        assert!(dir.path().join("model-performance.json").exists());
        assert!(dir.path().join("analytics-summary.json").exists());
        assert!(store.cached().await.is_some());
    }
}

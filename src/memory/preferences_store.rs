//! Per-user learned preferences, cached with a TTL and persisted as one
//! serialized blob per user.

use crate::domain_types::{Bias, CanonicalModel, IntentTag, ProviderName, UnitScore, UserHash};
use crate::error::{ErrorClass, ErrorKind};
use crate::memory::decision::RoutingDecision;
use crate::time_provider::SharedTimeProvider;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

/// How long a cached entry stays valid before the next read hits disk again.
const CACHE_TTL: Duration = Duration::from_mins(10);
/// Minimum free disk space required before a preferences write is accepted.
const MIN_FREE_DISK_BYTES: u64 = 5 * 1024;
/// Priority assigned to rules the learner induces automatically.
const INDUCED_RULE_PRIORITY: i32 = 10;

/// A user-authored or learner-induced routing rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomRule {
    /// A condition expression, e.g. `"intent == 'coding' && hour in [8, 10]"`.
    pub condition: String,
    /// The model this rule routes to when its condition matches.
    pub target_model: CanonicalModel,
    /// Higher priority rules are considered first.
    pub priority: i32,
}

/// Learned per-user routing state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    /// When this record was last updated.
    pub last_updated: chrono::DateTime<chrono::Utc>,
    /// Preferred model per intent.
    pub model_preferences: HashMap<String, CanonicalModel>,
    /// Confidence in the preferred model per intent.
    pub intent_confidence: HashMap<String, UnitScore>,
    /// Learned bias per provider, in `[-1, 1]`.
    pub provider_bias: HashMap<String, Bias>,
    /// User- or learner-authored routing rules, highest priority first once sorted.
    pub custom_rules: Vec<CustomRule>,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            last_updated: chrono::Utc::now(),
            model_preferences: HashMap::new(),
            intent_confidence: HashMap::new(),
            provider_bias: HashMap::new(),
            custom_rules: Vec::new(),
        }
    }
}

impl UserPreferences {
    /// Merges `override_prefs` onto `base`: the override wins on model
    /// preference conflicts, biases are averaged on conflict, custom rules
    /// are concatenated and stable-sorted by descending priority, and the
    /// later of the two timestamps wins.
    #[must_use]
    pub fn merge(base: &Self, override_prefs: &Self) -> Self {
        let mut model_preferences = base.model_preferences.clone();
        for (intent, model) in &override_prefs.model_preferences {
            model_preferences.insert(intent.clone(), model.clone());
        }

        let mut intent_confidence = base.intent_confidence.clone();
        for (intent, conf) in &override_prefs.intent_confidence {
            intent_confidence.insert(intent.clone(), *conf);
        }

        let mut provider_bias = base.provider_bias.clone();
        for (provider, override_bias) in &override_prefs.provider_bias {
            provider_bias
                .entry(provider.clone())
                .and_modify(|b| {
                    let avg = f64::midpoint(b.into_inner(), override_bias.into_inner());
                    *b = Bias::try_new(avg).unwrap_or(*b);
                })
                .or_insert(*override_bias);
        }

        let mut custom_rules = base.custom_rules.clone();
        custom_rules.extend(override_prefs.custom_rules.clone());
        custom_rules.sort_by_key(|r| std::cmp::Reverse(r.priority));

        let last_updated = base.last_updated.max(override_prefs.last_updated);

        Self { last_updated, model_preferences, intent_confidence, provider_bias, custom_rules }
    }
}

/// Errors from the preferences store.
#[derive(Debug, thiserror::Error)]
pub enum PreferencesStoreError {
    /// Free disk space is below the 5 KiB reserve.
    #[error("insufficient free disk space for preferences write")]
    DiskPressure,
    /// A filesystem or serialization fault.
    #[error("preferences I/O error: {0}")]
    Io(String),
}

impl ErrorClass for PreferencesStoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::DiskPressure | Self::Io(_) => ErrorKind::Io,
        }
    }
}

type StoreResult<T> = Result<T, PreferencesStoreError>;

struct CacheEntry {
    prefs: UserPreferences,
    cached_at: Instant,
}

/// Per-user preferences store with a 10-minute read cache and tmp-then-rename
/// writes (per the crate's filesystem-atomicity design note).
pub struct PreferencesStore {
    dir: PathBuf,
    cache: RwLock<HashMap<UserHash, CacheEntry>>,
    time_provider: SharedTimeProvider,
}

impl PreferencesStore {
    /// Creates a store rooted at `dir` (e.g. `<base>/memory/user-preferences`).
    pub fn new(dir: impl Into<PathBuf>, time_provider: SharedTimeProvider) -> Self {
        Self { dir: dir.into(), cache: RwLock::new(HashMap::new()), time_provider }
    }

    fn path_for(&self, user_hash: &UserHash) -> PathBuf {
        self.dir.join(format!("{}.json", user_hash.hex_suffix()))
    }

    /// Returns the preferences for `user_hash`, defaulting to an empty
    /// record if none exist yet. Served from cache within the TTL window.
    ///
    /// # Errors
    ///
    /// Returns an error on a filesystem or deserialization fault.
    #[instrument(skip(self), fields(user_hash = %user_hash))]
    pub async fn get_user_preferences(&self, user_hash: &UserHash) -> StoreResult<UserPreferences> {
        if let Some(entry) = self.cache.read().await.get(user_hash)
            && self.time_provider.instant().duration_since(entry.cached_at) < CACHE_TTL
        {
            return Ok(entry.prefs.clone());
        }

        let prefs = self.read_from_disk(user_hash).await?;
        self.cache.write().await.insert(
            user_hash.clone(),
            CacheEntry { prefs: prefs.clone(), cached_at: self.time_provider.instant() },
        );
        Ok(prefs)
    }

    async fn read_from_disk(&self, user_hash: &UserHash) -> StoreResult<UserPreferences> {
        let path = self.path_for(user_hash);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| PreferencesStoreError::Io(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(UserPreferences::default()),
            Err(e) => Err(PreferencesStoreError::Io(e.to_string())),
        }
    }

    /// Persists `prefs` for `user_hash` and updates the cache.
    ///
    /// # Errors
    ///
    /// Returns [`PreferencesStoreError::DiskPressure`] if free disk space is
    /// below the 5 KiB reserve, or `Io` for a propagated filesystem fault.
    #[instrument(skip(self, prefs), fields(user_hash = %user_hash))]
    pub async fn update_preferences(&self, user_hash: &UserHash, prefs: UserPreferences) -> StoreResult<()> {
        check_free_disk(&self.dir)?;
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| PreferencesStoreError::Io(e.to_string()))?;

        let path = self.path_for(user_hash);
        let tmp_path = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(&prefs).map_err(|e| PreferencesStoreError::Io(e.to_string()))?;
        tokio::fs::write(&tmp_path, &bytes).await.map_err(|e| PreferencesStoreError::Io(e.to_string()))?;
        set_owner_rw(&tmp_path).await;
        tokio::fs::rename(&tmp_path, &path).await.map_err(|e| PreferencesStoreError::Io(e.to_string()))?;

        self.cache.write().await.insert(
            user_hash.clone(),
            CacheEntry { prefs, cached_at: self.time_provider.instant() },
        );
        Ok(())
    }

    /// Learns from a decision's outcome: on success, sets the intent's
    /// preferred model; adjusts the provider's bias in either direction;
    /// and, on success, induces a time-window rule at most once per
    /// intent-with-hour combination.
    ///
    /// # Errors
    ///
    /// See [`Self::update_preferences`].
    #[instrument(skip(self, decision), fields(user_hash = %decision.user_hash))]
    pub async fn learn_from_outcome(&self, decision: &RoutingDecision) -> StoreResult<UserPreferences> {
        let mut prefs = self.get_user_preferences(&decision.user_hash).await?;
        let intent: &IntentTag = &decision.request.intent;
        let provider: &str = decision.provider();

        if decision.outcome.success {
            prefs.model_preferences.insert(intent.to_string(), decision.routing.selected_model.clone());
            prefs.intent_confidence.insert(intent.to_string(), decision.routing.confidence);
        }

        let mut delta = if decision.outcome.success { 0.05 } else { -0.05 };
        if decision.outcome.success && decision.outcome.quality_score.into_inner() > 0.8 {
            delta += 0.08;
        } else if !decision.outcome.success && decision.outcome.error.is_some() {
            delta -= 0.08;
        }
        let current = prefs.provider_bias.get(provider).copied().unwrap_or_default();
        prefs.provider_bias.insert(provider.to_string(), current.adjust(delta));

        if decision.outcome.success {
            induce_time_window_rule(&mut prefs, intent, &decision.routing.selected_model, &decision.timestamp);
        }

        prefs.last_updated = chrono::Utc::now();
        self.update_preferences(&decision.user_hash, prefs.clone()).await?;
        Ok(prefs)
    }

    /// Returns the preferred model for `intent`, if any has been learned.
    ///
    /// # Errors
    ///
    /// See [`Self::get_user_preferences`].
    pub async fn get_preferences_by_intent(&self, user_hash: &UserHash, intent: &IntentTag) -> StoreResult<Option<CanonicalModel>> {
        let prefs = self.get_user_preferences(user_hash).await?;
        Ok(prefs.model_preferences.get(intent.as_ref()).cloned())
    }

    /// Returns the learned bias for `provider`, defaulting to `0.0`.
    ///
    /// # Errors
    ///
    /// See [`Self::get_user_preferences`].
    pub async fn get_provider_bias(&self, user_hash: &UserHash, provider: &ProviderName) -> StoreResult<Bias> {
        let prefs = self.get_user_preferences(user_hash).await?;
        Ok(prefs.provider_bias.get(provider.as_ref()).copied().unwrap_or_default())
    }

    /// Lists the hex suffixes of all users with a persisted preferences file.
    ///
    /// # Errors
    ///
    /// Returns an error on a filesystem fault other than a missing directory.
    pub async fn list_users(&self) -> StoreResult<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PreferencesStoreError::Io(e.to_string())),
        };
        let mut users = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| PreferencesStoreError::Io(e.to_string()))? {
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                users.push(stem.to_string());
            }
        }
        Ok(users)
    }

    /// Counts persisted per-user preference files.
    ///
    /// # Errors
    ///
    /// See [`Self::list_users`].
    pub async fn count(&self) -> StoreResult<usize> {
        Ok(self.list_users().await?.len())
    }

    /// Deletes a user's persisted preferences and evicts them from cache.
    ///
    /// # Errors
    ///
    /// Returns an error on a filesystem fault other than a missing file.
    pub async fn delete_user_preferences(&self, user_hash: &UserHash) -> StoreResult<()> {
        let path = self.path_for(user_hash);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PreferencesStoreError::Io(e.to_string())),
        }
        self.cache.write().await.remove(user_hash);
        Ok(())
    }

    /// Clears one user's cache entry, or the whole cache when `user_hash` is `None`.
    pub async fn clear_cache(&self, user_hash: Option<&UserHash>) {
        match user_hash {
            Some(h) => {
                self.cache.write().await.remove(h);
            }
            None => self.cache.write().await.clear(),
        }
    }
}

fn induce_time_window_rule(
    prefs: &mut UserPreferences,
    intent: &IntentTag,
    target_model: &CanonicalModel,
    at: &chrono::DateTime<chrono::Utc>,
) {
    use chrono::Timelike;
    let hour = at.hour();
    let low = hour.saturating_sub(1);
    let high = (hour + 1).min(23);
    let marker = format!("intent == '{intent}' && hour in [");
    if prefs.custom_rules.iter().any(|r| r.condition.starts_with(&marker)) {
        return;
    }
    let condition = format!("{marker}{low}, {high}]");
    prefs.custom_rules.push(CustomRule { condition, target_model: target_model.clone(), priority: INDUCED_RULE_PRIORITY });
    debug!(%intent, "induced time-window routing rule");
}

fn check_free_disk(dir: &Path) -> StoreResult<()> {
    let probe = if dir.as_os_str().is_empty() { Path::new(".") } else { dir };
    match fs2::available_space(probe) {
        Ok(free) if free < MIN_FREE_DISK_BYTES => Err(PreferencesStoreError::DiskPressure),
        Ok(_) | Err(_) => Ok(()),
    }
}

#[cfg(unix)]
async fn set_owner_rw(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = tokio::fs::metadata(path).await {
        let mut perms = meta.permissions();
        perms.set_mode(0o600);
        if let Err(e) = tokio::fs::set_permissions(path, perms).await {
            warn!(error = %e, "failed to set owner-only permissions on preferences file");
        }
    }
}

#[cfg(not(unix))]
async fn set_owner_rw(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::decision::fixtures::sample_decision;
    use crate::time_provider::test_time_provider;

    fn hash() -> UserHash {
        UserHash::try_new(format!("sha256:{}", "0".repeat(64))).unwrap()
    }

    #[tokio::test]
    async fn missing_user_yields_default_preferences() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferencesStore::new(dir.path(), test_time_provider());
        let prefs = store.get_user_preferences(&hash()).await.unwrap();
        assert!(prefs.model_preferences.is_empty());
    }

    #[tokio::test]
    async fn learn_from_success_sets_preferred_model_and_increases_bias() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferencesStore::new(dir.path(), test_time_provider());
        let decision = sample_decision(hash().as_ref(), "coding", "prov:m1", true);

        let prefs = store.learn_from_outcome(&decision).await.unwrap();
        assert_eq!(prefs.model_preferences.get("coding").unwrap().as_ref(), "prov:m1");
        assert!(prefs.provider_bias.get("prov").unwrap().into_inner() > 0.0);
    }

    #[tokio::test]
    async fn learn_from_failure_decreases_bias() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferencesStore::new(dir.path(), test_time_provider());
        let decision = sample_decision(hash().as_ref(), "coding", "prov:m1", false);

        let prefs = store.learn_from_outcome(&decision).await.unwrap();
        assert!(prefs.provider_bias.get("prov").unwrap().into_inner() < 0.0);
    }

    #[tokio::test]
    async fn update_then_get_round_trips_and_persists_across_cache_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferencesStore::new(dir.path(), test_time_provider());
        let mut prefs = UserPreferences::default();
        prefs.model_preferences.insert("coding".into(), CanonicalModel::try_new("prov:m1").unwrap());
        store.update_preferences(&hash(), prefs.clone()).await.unwrap();

        store.clear_cache(None).await;
        let reloaded = store.get_user_preferences(&hash()).await.unwrap();
        assert_eq!(reloaded.model_preferences, prefs.model_preferences);
    }

    #[tokio::test]
    async fn delete_removes_file_and_cache_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferencesStore::new(dir.path(), test_time_provider());
        store.update_preferences(&hash(), UserPreferences::default()).await.unwrap();
        store.delete_user_preferences(&hash()).await.unwrap();
        let prefs = store.get_user_preferences(&hash()).await.unwrap();
        assert!(prefs.model_preferences.is_empty());
    }

    #[test]
    fn merge_prefers_override_models_and_averages_bias() {
        let mut base = UserPreferences::default();
        base.model_preferences.insert("coding".into(), CanonicalModel::try_new("prov:m1").unwrap());
        base.provider_bias.insert("prov".into(), Bias::try_new(0.2).unwrap());

        let mut over = UserPreferences::default();
        over.model_preferences.insert("coding".into(), CanonicalModel::try_new("prov:m2").unwrap());
        over.provider_bias.insert("prov".into(), Bias::try_new(0.6).unwrap());

        let merged = UserPreferences::merge(&base, &over);
        assert_eq!(merged.model_preferences.get("coding").unwrap().as_ref(), "prov:m2");
        assert!((merged.provider_bias.get("prov").unwrap().into_inner() - 0.4).abs() < 1e-9);
    }

    #[test]
    fn merge_concatenates_and_sorts_rules_descending_by_priority() {
        let mut base = UserPreferences::default();
        base.custom_rules.push(CustomRule { condition: "a".into(), target_model: CanonicalModel::try_new("p:m").unwrap(), priority: 5 });
        let mut over = UserPreferences::default();
        over.custom_rules.push(CustomRule { condition: "b".into(), target_model: CanonicalModel::try_new("p:m").unwrap(), priority: 10 });

        let merged = UserPreferences::merge(&base, &over);
        assert_eq!(merged.custom_rules[0].condition, "b");
        assert_eq!(merged.custom_rules[1].condition, "a");
    }

    #[tokio::test]
    async fn induced_rule_is_added_once_per_intent_hour() {
        let dir = tempfile::tempdir().unwrap();
        let store = PreferencesStore::new(dir.path(), test_time_provider());
        let decision = sample_decision(hash().as_ref(), "coding", "prov:m1", true);

        store.learn_from_outcome(&decision).await.unwrap();
        let prefs = store.learn_from_outcome(&decision).await.unwrap();
        let rule_count = prefs.custom_rules.iter().filter(|r| r.condition.contains("coding")).count();
        assert_eq!(rule_count, 1);
    }
}

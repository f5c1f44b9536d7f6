//! End-to-end scenarios across the memory manager facade: a decision
//! recorded through the public API is retrievable and feeds the learner,
//! exactly as a request pipeline would drive it.

use routing_memory::MemoryConfig;
use routing_memory::domain_types::{
    CanonicalModel, ContentLength, DecisionLatencyMs, IntentTag, OutcomeLatencyMs, Tier,
    UnitScore, UserHash,
};
use routing_memory::memory::{MemoryManager, OutcomeInfo, RequestInfo, RoutingDecision, RoutingInfo};
use routing_memory::time_provider::test_time_provider;
use test_log::test;

fn decision(user_hash: &UserHash, intent: &str, model: &str, success: bool) -> RoutingDecision {
    RoutingDecision {
        timestamp: chrono::Utc::now(),
        user_hash: user_hash.clone(),
        request: RequestInfo {
            model: "requested-model".to_string(),
            intent: IntentTag::try_new(intent).unwrap(),
            content_hash: "deadbeef".to_string(),
            content_length: ContentLength::try_new(128).unwrap(),
        },
        routing: RoutingInfo {
            tier: Tier::Semantic,
            selected_model: CanonicalModel::try_new(model).unwrap(),
            confidence: UnitScore::try_new(0.9).unwrap(),
            decision_latency_ms: DecisionLatencyMs::try_new(12).unwrap(),
        },
        outcome: OutcomeInfo {
            success,
            response_time_ms: OutcomeLatencyMs::try_new(250).unwrap(),
            error: None,
            quality_score: UnitScore::try_new(0.9).unwrap(),
        },
    }
}

#[test(tokio::test)]
async fn record_retrieve_and_learn_round_trips_through_the_facade() {
    let dir = tempfile::tempdir().unwrap();
    let config = MemoryConfig {
        enabled: true,
        base_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let mut manager = MemoryManager::new(config, test_time_provider()).await.unwrap();

    let hash = UserHash::try_new(format!("sha256:{}", "0".repeat(64))).unwrap();
    let recorded = decision(&hash, "coding", "prov:m1", true);
    manager.record_routing(&recorded).await.unwrap();

    let history = manager.get_history(&hash, Some(1)).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0], recorded);

    manager.learn_from_outcome(&recorded).await.unwrap();
    let prefs = manager.get_user_preferences(&hash).await.unwrap();
    assert_eq!(
        prefs.model_preferences.get("coding").map(std::string::ToString::to_string),
        Some("prov:m1".to_string())
    );
    assert!(prefs.provider_bias.get("prov").copied().unwrap_or_default().into_inner() > 0.0);

    manager.close().await.unwrap();
}

#[test(tokio::test)]
async fn disabled_manager_never_blocks_the_request_path() {
    let dir = tempfile::tempdir().unwrap();
    let config = MemoryConfig {
        enabled: false,
        base_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    let mut manager = MemoryManager::new(config, test_time_provider()).await.unwrap();

    let hash = UserHash::try_new(format!("sha256:{}", "1".repeat(64))).unwrap();
    let recorded = decision(&hash, "reasoning", "prov:m2", true);

    manager.record_routing(&recorded).await.unwrap();
    let history = manager.get_history(&hash, Some(10)).await.unwrap();
    assert!(history.is_empty());

    let prefs = manager.get_user_preferences(&hash).await.unwrap();
    assert!(prefs.model_preferences.is_empty());

    manager.close().await.unwrap();
}

//! End-to-end scenario for daily-log rotation and retention: an old entry
//! written under yesterday-minus-retention's date is gone after cleanup,
//! while today's entry survives.

use routing_memory::memory::DailyLogsManager;
use routing_memory::time_provider::test_time_provider;
use test_log::test;

#[test(tokio::test)]
async fn cleanup_drops_only_files_older_than_the_retention_window() {
    let dir = tempfile::tempdir().unwrap();
    let manager = DailyLogsManager::new(dir.path(), false, test_time_provider()).await.unwrap();

    let today = chrono::Local::now().date_naive();
    let retention_days = 30;
    let expired_date = today - chrono::Duration::days(i64::from(retention_days) + 1);
    let expired_path = dir.path().join(format!("{}.jsonl", expired_date.format("%Y-%m-%d")));
    tokio::fs::write(&expired_path, b"{}\n").await.unwrap();

    manager.write_entry("routing", serde_json::json!({"ok": true})).await.unwrap();
    manager.cleanup_old_logs(retention_days).await.unwrap();

    assert!(!expired_path.exists(), "file older than the retention window should be removed");
    let today_name = format!("{}.jsonl", today.format("%Y-%m-%d"));
    let today_path = dir.path().join(&today_name);
    assert!(today_path.exists(), "today's log should survive cleanup");

    let entries = manager.read_log_file(&today_name, 0).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry_type, "routing");
}

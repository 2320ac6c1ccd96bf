mod common;

use std::sync::Arc;

use common::{MemoryStore, Reply, ScriptClient, association};
use modelmux_core::feedback::FeedbackEngine;
use modelmux_core::health::HealthChecker;
use modelmux_storage::GatewaySettings;

fn checker(store: Arc<MemoryStore>, client: Arc<ScriptClient>) -> Arc<HealthChecker> {
    let feedback = Arc::new(FeedbackEngine::new(store.clone()));
    Arc::new(HealthChecker::new(store, client, feedback))
}

fn seed(store: &MemoryStore) {
    store.add_provider(1, "up-a", "openai", None);
    store.add_model(1, "gpt-4o", 3, 30);
    store.add_association(association(1, 1, 1, "m-1"));
}

#[tokio::test]
async fn three_consecutive_failures_disable_the_association() {
    let store = Arc::new(MemoryStore::default());
    seed(&store);
    store.set_settings(GatewaySettings {
        health_check_failure_threshold: 3,
        health_check_failure_disable_enabled: true,
        ..GatewaySettings::default()
    });

    let client = Arc::new(ScriptClient::new(vec![Reply::Status(500, "down")]));
    let checker = checker(store.clone(), client);

    checker.run_pass(None).await;
    checker.run_pass(None).await;
    assert!(store.association(1).unwrap().status, "two failures keep it on");

    checker.run_pass(None).await;
    assert!(!store.association(1).unwrap().status, "third failure disables");

    let logs = store.health_logs.lock().unwrap();
    assert_eq!(logs.len(), 3);
    assert!(logs.iter().all(|log| log.status == "error"));
}

#[tokio::test]
async fn success_after_disable_reenables_when_configured() {
    let store = Arc::new(MemoryStore::default());
    seed(&store);
    store.set_settings(GatewaySettings {
        health_check_failure_threshold: 3,
        health_check_failure_disable_enabled: true,
        health_check_auto_enable: true,
        ..GatewaySettings::default()
    });

    let client = Arc::new(ScriptClient::new(vec![
        Reply::Status(500, "down"),
        Reply::Status(500, "down"),
        Reply::Status(500, "down"),
        Reply::Json("{\"ok\":true}".to_string()),
    ]));
    let checker = checker(store.clone(), client);

    for _ in 0..3 {
        checker.run_pass(None).await;
    }
    assert!(!store.association(1).unwrap().status);

    checker.run_pass(None).await;
    assert!(store.association(1).unwrap().status, "success re-enables");
}

#[tokio::test]
async fn interrupted_failure_streak_does_not_disable() {
    let store = Arc::new(MemoryStore::default());
    seed(&store);
    store.set_settings(GatewaySettings {
        health_check_failure_threshold: 3,
        health_check_failure_disable_enabled: true,
        ..GatewaySettings::default()
    });

    let client = Arc::new(ScriptClient::new(vec![
        Reply::Status(500, "down"),
        Reply::Status(500, "down"),
        Reply::Json("{\"ok\":true}".to_string()),
        Reply::Status(500, "down"),
        Reply::Status(500, "down"),
    ]));
    let checker = checker(store.clone(), client);

    for _ in 0..5 {
        checker.run_pass(None).await;
    }
    // The success in the middle reset the streak: only two contiguous
    // failures at the tail.
    assert!(store.association(1).unwrap().status);
}

#[tokio::test]
async fn check_all_stamps_batch_and_reports_progress() {
    let store = Arc::new(MemoryStore::default());
    store.add_provider(1, "up-a", "openai", None);
    store.add_model(1, "gpt-4o", 3, 30);
    store.add_association(association(1, 1, 1, "m-1"));
    store.add_association(association(2, 1, 1, "m-2"));

    let client = Arc::new(ScriptClient::new(vec![
        Reply::Json("{\"ok\":true}".to_string()),
        Reply::Status(500, "down"),
    ]));
    let checker = checker(store.clone(), client);

    checker.run_pass(Some("batch-7")).await;

    let progress = checker.batch_progress("batch-7").await;
    assert_eq!(progress.total, 2);
    assert_eq!(progress.success, 1);
    assert_eq!(progress.failed, 1);
    assert_eq!(progress.pending, 0);
    assert!(progress.completed);

    let logs = store.health_logs.lock().unwrap();
    assert!(logs.iter().all(|log| log.batch_id.as_deref() == Some("batch-7")));
}

#[tokio::test]
async fn probe_failures_feed_the_weight_decay_when_enabled() {
    let store = Arc::new(MemoryStore::default());
    seed(&store);
    store.set_settings(GatewaySettings {
        health_check_count_as_failure: true,
        auto_weight_decay: true,
        auto_weight_decay_step: 2,
        ..GatewaySettings::default()
    });

    let client = Arc::new(ScriptClient::new(vec![Reply::Status(500, "down")]));
    let checker = checker(store.clone(), client);

    checker.run_pass(None).await;
    assert_eq!(store.association(1).unwrap().weight, 3);

    checker.run_pass(None).await;
    assert_eq!(store.association(1).unwrap().weight, 1);
}

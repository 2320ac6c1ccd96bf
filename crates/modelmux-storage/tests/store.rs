use modelmux_storage::{NewAssociation, NewChatLog, NewHealthCheckLog, SeaOrmStore, Store};
use serde_json::json;

async fn fresh_store() -> SeaOrmStore {
    let store = SeaOrmStore::connect("sqlite::memory:").await.unwrap();
    store.sync().await.unwrap();
    store
}

async fn seed_route(store: &SeaOrmStore) -> (i64, i64, i64) {
    let provider_id = store
        .upsert_provider(
            "openai-main",
            "openai",
            &json!({ "base_url": "https://api.openai.com/v1", "api_key": "sk-x" }),
            None,
            None,
        )
        .await
        .unwrap();
    let model_id = store
        .upsert_model("gpt-4o", 3, 300, false, None)
        .await
        .unwrap();
    let assoc_id = store
        .upsert_association(NewAssociation {
            model_id,
            provider_id,
            provider_model: "gpt-4o-2024-08-06".to_string(),
            ..NewAssociation::default()
        })
        .await
        .unwrap();
    (provider_id, model_id, assoc_id)
}

#[tokio::test]
async fn routing_rows_round_trip() {
    let store = fresh_store().await;
    let (provider_id, model_id, assoc_id) = seed_route(&store).await;

    let model = store.model_by_name("gpt-4o").await.unwrap().unwrap();
    assert_eq!(model.id, model_id);
    assert_eq!(model.max_retry, 3);

    let provider = store.provider_by_id(provider_id).await.unwrap().unwrap();
    assert_eq!(provider.ptype, "openai");
    assert_eq!(provider.config["api_key"], "sk-x");

    let associations = store
        .enabled_associations_for_model(model_id)
        .await
        .unwrap();
    assert_eq!(associations.len(), 1);
    assert_eq!(associations[0].id, assoc_id);
    assert_eq!(associations[0].weight, 5);
    assert_eq!(associations[0].priority, 10);

    let found = store
        .find_association_by_target("openai-main", "gpt-4o-2024-08-06")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, assoc_id);
}

#[tokio::test]
async fn upsert_association_is_keyed_by_triple() {
    let store = fresh_store().await;
    let (provider_id, model_id, assoc_id) = seed_route(&store).await;

    // Same triple: updates in place.
    let again = store
        .upsert_association(NewAssociation {
            model_id,
            provider_id,
            provider_model: "gpt-4o-2024-08-06".to_string(),
            weight: 9,
            ..NewAssociation::default()
        })
        .await
        .unwrap();
    assert_eq!(again, assoc_id);
    let rows = store.list_associations().await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].weight, 9);

    // Different provider_model: a second candidate route.
    let second = store
        .upsert_association(NewAssociation {
            model_id,
            provider_id,
            provider_model: "gpt-4o-mini".to_string(),
            ..NewAssociation::default()
        })
        .await
        .unwrap();
    assert_ne!(second, assoc_id);
    assert_eq!(store.list_associations().await.unwrap().len(), 2);
}

#[tokio::test]
async fn disabled_associations_leave_the_selection_pool() {
    let store = fresh_store().await;
    let (_, model_id, assoc_id) = seed_route(&store).await;

    store.set_association_status(assoc_id, false).await.unwrap();
    assert!(store
        .enabled_associations_for_model(model_id)
        .await
        .unwrap()
        .is_empty());

    // Routing updates persist last-write-wins.
    store
        .update_association_routing(assoc_id, 7, 4)
        .await
        .unwrap();
    let row = store.association_by_id(assoc_id).await.unwrap().unwrap();
    assert_eq!((row.weight, row.priority), (7, 4));
    assert!(!row.status);
}

#[tokio::test]
async fn chat_log_lifecycle() {
    let store = fresh_store().await;
    let log_id = store
        .insert_chat_log(NewChatLog {
            alias: "gpt-4o".to_string(),
            provider_name: "openai-main".to_string(),
            provider_model: "gpt-4o-2024-08-06".to_string(),
            status: "success".to_string(),
            style: "openai".to_string(),
            user_agent: None,
            remote_ip: None,
            retry_index: 0,
            error_text: None,
        })
        .await
        .unwrap();

    store.mark_chat_log_error(log_id, "upstream 500").await.unwrap();
    let rows = store.list_chat_logs(10, 0).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, "error");
    assert_eq!(rows[0].error_text.as_deref(), Some("upstream 500"));

    store
        .insert_chat_io(log_id, b"{\"model\":\"gpt-4o\"}", b"{\"ok\":true}")
        .await
        .unwrap();
}

#[tokio::test]
async fn settings_rows_decode_into_typed_view() {
    let store = fresh_store().await;
    store.set_setting("strict_capability_match", "true").await.unwrap();
    store.set_setting("auto_weight_decay_step", "4").await.unwrap();
    store.set_setting("strict_capability_match", "false").await.unwrap();

    let settings = store.settings().await.unwrap();
    assert!(!settings.strict_capability_match);
    assert_eq!(settings.auto_weight_decay_step, 4);
}

#[tokio::test]
async fn health_logs_scan_newest_first() {
    let store = fresh_store().await;
    let (_, _, assoc_id) = seed_route(&store).await;

    for status in ["success", "error", "error"] {
        store
            .insert_health_check_log(NewHealthCheckLog {
                association_id: assoc_id,
                provider_name: "openai-main".to_string(),
                provider_model: "gpt-4o-2024-08-06".to_string(),
                status: status.to_string(),
                error_text: None,
                latency_ms: Some(12),
                batch_id: Some("b1".to_string()),
            })
            .await
            .unwrap();
    }

    let recent = store.recent_health_checks(assoc_id, 10).await.unwrap();
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[0].status, "error");
    assert_eq!(recent[2].status, "success");

    let batch = store.health_checks_for_batch("b1").await.unwrap();
    assert_eq!(batch.len(), 3);
}

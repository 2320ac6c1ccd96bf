//! Typed persistence contract consumed by the dispatch core.
//!
//! The core never touches the database directly; it is handed an
//! `Arc<dyn Store>` at bootstrap. Runtime rows are plain structs so test
//! doubles stay trivial.

use std::collections::BTreeMap;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::settings::GatewaySettings;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct ProviderRow {
    pub id: i64,
    pub name: String,
    /// "openai" | "openai-res" | "anthropic".
    pub ptype: String,
    pub config: serde_json::Value,
    pub proxy: Option<String>,
    pub console: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelRow {
    pub id: i64,
    pub name: String,
    pub max_retry: i32,
    pub timeout_seconds: i32,
    pub io_log: bool,
    pub remark: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AssociationRow {
    pub id: i64,
    pub model_id: i64,
    pub provider_id: i64,
    pub provider_model: String,
    pub status: bool,
    pub weight: i64,
    pub priority: i64,
    pub tool_call: bool,
    pub structured_output: bool,
    pub image: bool,
    pub with_header: bool,
    pub customer_headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct SettingRow {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct NewChatLog {
    pub alias: String,
    pub provider_name: String,
    pub provider_model: String,
    pub status: String,
    pub style: String,
    pub user_agent: Option<String>,
    pub remote_ip: Option<String>,
    pub retry_index: i32,
    pub error_text: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ChatLogMetrics {
    pub proxy_time_ms: Option<i64>,
    pub first_chunk_ms: Option<i64>,
    pub chunk_ms: Option<i64>,
    pub tps: Option<f64>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ChatLogRow {
    pub id: i64,
    pub alias: String,
    pub provider_name: String,
    pub provider_model: String,
    pub status: String,
    pub style: String,
    pub retry_index: i32,
    pub error_text: Option<String>,
    pub metrics: ChatLogMetrics,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewHealthCheckLog {
    pub association_id: i64,
    pub provider_name: String,
    pub provider_model: String,
    pub status: String,
    pub error_text: Option<String>,
    pub latency_ms: Option<i64>,
    pub batch_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HealthCheckLogRow {
    pub id: i64,
    pub association_id: i64,
    pub status: String,
    pub error_text: Option<String>,
    pub latency_ms: Option<i64>,
    pub batch_id: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewAssociation {
    pub model_id: i64,
    pub provider_id: i64,
    pub provider_model: String,
    pub status: bool,
    pub weight: i64,
    pub priority: i64,
    pub tool_call: bool,
    pub structured_output: bool,
    pub image: bool,
    pub with_header: bool,
    pub customer_headers: BTreeMap<String, String>,
}

impl Default for NewAssociation {
    fn default() -> Self {
        Self {
            model_id: 0,
            provider_id: 0,
            provider_model: String::new(),
            status: true,
            weight: 5,
            priority: 10,
            tool_call: false,
            structured_output: false,
            image: false,
            with_header: false,
            customer_headers: BTreeMap::new(),
        }
    }
}

/// Persistent store over providers, models, associations, settings and the
/// two log tables. Admin mutations go through the same trait; the dispatch
/// core only ever uses point reads, appends, and the feedback point updates.
#[async_trait]
pub trait Store: Send + Sync {
    // ---- routing reads ----
    async fn model_by_name(&self, name: &str) -> StoreResult<Option<ModelRow>>;
    async fn list_models(&self) -> StoreResult<Vec<ModelRow>>;
    async fn provider_by_id(&self, id: i64) -> StoreResult<Option<ProviderRow>>;
    async fn list_providers(&self) -> StoreResult<Vec<ProviderRow>>;
    async fn association_by_id(&self, id: i64) -> StoreResult<Option<AssociationRow>>;
    async fn list_associations(&self) -> StoreResult<Vec<AssociationRow>>;
    async fn enabled_associations_for_model(
        &self,
        model_id: i64,
    ) -> StoreResult<Vec<AssociationRow>>;
    /// Failure feedback is attributed through the log's provider identity.
    async fn find_association_by_target(
        &self,
        provider_name: &str,
        provider_model: &str,
    ) -> StoreResult<Option<AssociationRow>>;

    // ---- admin-plane mutations ----
    async fn upsert_provider(
        &self,
        name: &str,
        ptype: &str,
        config: &serde_json::Value,
        proxy: Option<&str>,
        console: Option<&str>,
    ) -> StoreResult<i64>;
    async fn upsert_model(
        &self,
        name: &str,
        max_retry: i32,
        timeout_seconds: i32,
        io_log: bool,
        remark: Option<&str>,
    ) -> StoreResult<i64>;
    /// `(model_id, provider_id, provider_model)` identifies the row.
    async fn upsert_association(&self, assoc: NewAssociation) -> StoreResult<i64>;

    // ---- feedback point updates (last write wins) ----
    async fn update_association_routing(
        &self,
        id: i64,
        weight: i64,
        priority: i64,
    ) -> StoreResult<()>;
    async fn set_association_status(&self, id: i64, status: bool) -> StoreResult<()>;

    // ---- settings ----
    async fn settings(&self) -> StoreResult<GatewaySettings>;
    async fn set_setting(&self, key: &str, value: &str) -> StoreResult<()>;

    // ---- chat logs ----
    async fn insert_chat_log(&self, log: NewChatLog) -> StoreResult<i64>;
    async fn mark_chat_log_error(&self, id: i64, error_text: &str) -> StoreResult<()>;
    async fn update_chat_log_metrics(&self, id: i64, metrics: ChatLogMetrics) -> StoreResult<()>;
    async fn insert_chat_io(&self, chat_log_id: i64, input: &[u8], output: &[u8])
    -> StoreResult<()>;
    /// Newest first; the admin surface pages through these.
    async fn list_chat_logs(&self, limit: u64, offset: u64) -> StoreResult<Vec<ChatLogRow>>;

    // ---- health check logs ----
    async fn insert_health_check_log(&self, log: NewHealthCheckLog) -> StoreResult<i64>;
    /// Most recent first; used for the consecutive-failure scan.
    async fn recent_health_checks(
        &self,
        association_id: i64,
        limit: u64,
    ) -> StoreResult<Vec<HealthCheckLogRow>>;
    async fn health_checks_for_batch(&self, batch_id: &str)
    -> StoreResult<Vec<HealthCheckLogRow>>;
}

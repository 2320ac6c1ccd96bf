use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "chat_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub alias: String,
    pub provider_name: String,
    pub provider_model: String,
    /// "success" or "error".
    pub status: String,
    /// Client wire format the request arrived in.
    pub style: String,
    pub user_agent: Option<String>,
    pub remote_ip: Option<String>,
    pub retry_index: i32,
    pub error_text: Option<String>,
    pub proxy_time_ms: Option<i64>,
    pub first_chunk_ms: Option<i64>,
    pub chunk_ms: Option<i64>,
    pub tps: Option<f64>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub created_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}

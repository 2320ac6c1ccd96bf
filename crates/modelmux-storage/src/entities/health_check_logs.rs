use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "health_check_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub association_id: i64,
    pub provider_name: String,
    pub provider_model: String,
    /// "success" or "error".
    pub status: String,
    pub error_text: Option<String>,
    pub latency_ms: Option<i64>,
    /// Correlates the logs of one ad-hoc check-all pass.
    pub batch_id: Option<String>,
    pub created_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}

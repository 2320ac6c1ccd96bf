use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "associations")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub model_id: i64,
    pub provider_id: i64,
    /// Model string sent upstream; may differ from the client alias.
    pub provider_model: String,
    pub status: bool,
    pub weight: i64,
    pub priority: i64,
    pub tool_call: bool,
    pub structured_output: bool,
    pub image: bool,
    pub with_header: bool,
    pub customer_headers_json: Json,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}

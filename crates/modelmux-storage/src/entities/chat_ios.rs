use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "chat_ios")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub chat_log_id: i64,
    pub input: Vec<u8>,
    /// Raw body for non-stream responses; JSON array of SSE chunks for
    /// streaming responses.
    pub output: Vec<u8>,
    pub created_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}

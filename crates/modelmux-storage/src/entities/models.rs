use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "models")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    /// Client-facing alias; the string clients send in their "model" field.
    #[sea_orm(unique_key = "model_name")]
    pub name: String,
    pub max_retry: i32,
    pub timeout_seconds: i32,
    pub io_log: bool,
    pub remark: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(has_many)]
    pub associations: HasMany<super::associations::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}

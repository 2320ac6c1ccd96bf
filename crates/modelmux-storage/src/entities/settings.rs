use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "settings")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "setting_key")]
    pub key: String,
    pub value: String,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}

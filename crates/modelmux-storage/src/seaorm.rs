//! SeaORM-backed store over SQLite.

use std::collections::BTreeMap;

use async_trait::async_trait;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, ConnectionTrait, Database, DatabaseBackend,
    DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Schema,
};
use time::OffsetDateTime;

use crate::entities;
use crate::settings::GatewaySettings;
use crate::store::{
    AssociationRow, ChatLogMetrics, ChatLogRow, HealthCheckLogRow, ModelRow, NewAssociation,
    NewChatLog, NewHealthCheckLog, ProviderRow, SettingRow, Store, StoreResult,
};

#[derive(Clone)]
pub struct SeaOrmStore {
    db: DatabaseConnection,
}

impl SeaOrmStore {
    pub async fn connect(dsn: &str) -> StoreResult<Self> {
        let db = Database::connect(dsn).await?;
        // Sqlite needs this per-connection for cascade + integrity.
        if db.get_database_backend() == DatabaseBackend::Sqlite {
            db.execute_unprepared("PRAGMA foreign_keys = ON").await?;
        }
        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Entity-first schema sync; run once at bootstrap.
    pub async fn sync(&self) -> StoreResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Providers)
            .register(entities::Models)
            .register(entities::Associations)
            .register(entities::Settings)
            .register(entities::ChatLogs)
            .register(entities::ChatIos)
            .register(entities::HealthCheckLogs)
            .sync(&self.db)
            .await?;
        Ok(())
    }
}

fn provider_row(model: entities::providers::Model) -> ProviderRow {
    ProviderRow {
        id: model.id,
        name: model.name,
        ptype: model.ptype,
        config: model.config_json,
        proxy: model.proxy,
        console: model.console,
    }
}

fn model_row(model: entities::models::Model) -> ModelRow {
    ModelRow {
        id: model.id,
        name: model.name,
        max_retry: model.max_retry,
        timeout_seconds: model.timeout_seconds,
        io_log: model.io_log,
        remark: model.remark,
    }
}

fn association_row(model: entities::associations::Model) -> AssociationRow {
    let customer_headers: BTreeMap<String, String> =
        serde_json::from_value(model.customer_headers_json).unwrap_or_default();
    AssociationRow {
        id: model.id,
        model_id: model.model_id,
        provider_id: model.provider_id,
        provider_model: model.provider_model,
        status: model.status,
        weight: model.weight,
        priority: model.priority,
        tool_call: model.tool_call,
        structured_output: model.structured_output,
        image: model.image,
        with_header: model.with_header,
        customer_headers,
    }
}

fn health_row(model: entities::health_check_logs::Model) -> HealthCheckLogRow {
    HealthCheckLogRow {
        id: model.id,
        association_id: model.association_id,
        status: model.status,
        error_text: model.error_text,
        latency_ms: model.latency_ms,
        batch_id: model.batch_id,
        created_at: model.created_at,
    }
}

#[async_trait]
impl Store for SeaOrmStore {
    async fn model_by_name(&self, name: &str) -> StoreResult<Option<ModelRow>> {
        use entities::models::Column;
        let row = entities::Models::find()
            .filter(Column::Name.eq(name))
            .one(&self.db)
            .await?;
        Ok(row.map(model_row))
    }

    async fn list_models(&self) -> StoreResult<Vec<ModelRow>> {
        use entities::models::Column;
        let rows = entities::Models::find()
            .order_by_asc(Column::Name)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(model_row).collect())
    }

    async fn provider_by_id(&self, id: i64) -> StoreResult<Option<ProviderRow>> {
        let row = entities::Providers::find_by_id(id).one(&self.db).await?;
        Ok(row.map(provider_row))
    }

    async fn list_providers(&self) -> StoreResult<Vec<ProviderRow>> {
        use entities::providers::Column;
        let rows = entities::Providers::find()
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(provider_row).collect())
    }

    async fn association_by_id(&self, id: i64) -> StoreResult<Option<AssociationRow>> {
        let row = entities::Associations::find_by_id(id).one(&self.db).await?;
        Ok(row.map(association_row))
    }

    async fn list_associations(&self) -> StoreResult<Vec<AssociationRow>> {
        use entities::associations::Column;
        let rows = entities::Associations::find()
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(association_row).collect())
    }

    async fn enabled_associations_for_model(
        &self,
        model_id: i64,
    ) -> StoreResult<Vec<AssociationRow>> {
        use entities::associations::Column;
        let rows = entities::Associations::find()
            .filter(Column::ModelId.eq(model_id))
            .filter(Column::Status.eq(true))
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(association_row).collect())
    }

    async fn find_association_by_target(
        &self,
        provider_name: &str,
        provider_model: &str,
    ) -> StoreResult<Option<AssociationRow>> {
        use entities::associations::Column;
        use entities::providers::Column as ProviderColumn;

        let provider = entities::Providers::find()
            .filter(ProviderColumn::Name.eq(provider_name))
            .one(&self.db)
            .await?;
        let Some(provider) = provider else {
            return Ok(None);
        };
        let row = entities::Associations::find()
            .filter(Column::ProviderId.eq(provider.id))
            .filter(Column::ProviderModel.eq(provider_model))
            .one(&self.db)
            .await?;
        Ok(row.map(association_row))
    }

    async fn upsert_provider(
        &self,
        name: &str,
        ptype: &str,
        config: &serde_json::Value,
        proxy: Option<&str>,
        console: Option<&str>,
    ) -> StoreResult<i64> {
        use entities::providers::{ActiveModel, Column};
        let now = OffsetDateTime::now_utc();
        let existing = entities::Providers::find()
            .filter(Column::Name.eq(name))
            .one(&self.db)
            .await?;
        match existing {
            Some(row) => {
                let id = row.id;
                let mut active: ActiveModel = row.into();
                active.ptype = ActiveValue::Set(ptype.to_string());
                active.config_json = ActiveValue::Set(config.clone());
                active.proxy = ActiveValue::Set(proxy.map(str::to_string));
                active.console = ActiveValue::Set(console.map(str::to_string));
                active.updated_at = ActiveValue::Set(now);
                active.update(&self.db).await?;
                Ok(id)
            }
            None => {
                let active = ActiveModel {
                    id: ActiveValue::NotSet,
                    name: ActiveValue::Set(name.to_string()),
                    ptype: ActiveValue::Set(ptype.to_string()),
                    config_json: ActiveValue::Set(config.clone()),
                    proxy: ActiveValue::Set(proxy.map(str::to_string)),
                    console: ActiveValue::Set(console.map(str::to_string)),
                    created_at: ActiveValue::Set(now),
                    updated_at: ActiveValue::Set(now),
                };
                let model = active.insert(&self.db).await?;
                Ok(model.id)
            }
        }
    }

    async fn upsert_model(
        &self,
        name: &str,
        max_retry: i32,
        timeout_seconds: i32,
        io_log: bool,
        remark: Option<&str>,
    ) -> StoreResult<i64> {
        use entities::models::{ActiveModel, Column};
        let now = OffsetDateTime::now_utc();
        let existing = entities::Models::find()
            .filter(Column::Name.eq(name))
            .one(&self.db)
            .await?;
        match existing {
            Some(row) => {
                let id = row.id;
                let mut active: ActiveModel = row.into();
                active.max_retry = ActiveValue::Set(max_retry);
                active.timeout_seconds = ActiveValue::Set(timeout_seconds);
                active.io_log = ActiveValue::Set(io_log);
                active.remark = ActiveValue::Set(remark.map(str::to_string));
                active.updated_at = ActiveValue::Set(now);
                active.update(&self.db).await?;
                Ok(id)
            }
            None => {
                let active = ActiveModel {
                    id: ActiveValue::NotSet,
                    name: ActiveValue::Set(name.to_string()),
                    max_retry: ActiveValue::Set(max_retry),
                    timeout_seconds: ActiveValue::Set(timeout_seconds),
                    io_log: ActiveValue::Set(io_log),
                    remark: ActiveValue::Set(remark.map(str::to_string)),
                    created_at: ActiveValue::Set(now),
                    updated_at: ActiveValue::Set(now),
                };
                let model = active.insert(&self.db).await?;
                Ok(model.id)
            }
        }
    }

    async fn upsert_association(&self, assoc: NewAssociation) -> StoreResult<i64> {
        use entities::associations::{ActiveModel, Column};
        let now = OffsetDateTime::now_utc();
        let headers = serde_json::to_value(&assoc.customer_headers)?;
        let existing = entities::Associations::find()
            .filter(Column::ModelId.eq(assoc.model_id))
            .filter(Column::ProviderId.eq(assoc.provider_id))
            .filter(Column::ProviderModel.eq(assoc.provider_model.as_str()))
            .one(&self.db)
            .await?;
        match existing {
            Some(row) => {
                let id = row.id;
                let mut active: ActiveModel = row.into();
                active.status = ActiveValue::Set(assoc.status);
                active.weight = ActiveValue::Set(assoc.weight);
                active.priority = ActiveValue::Set(assoc.priority);
                active.tool_call = ActiveValue::Set(assoc.tool_call);
                active.structured_output = ActiveValue::Set(assoc.structured_output);
                active.image = ActiveValue::Set(assoc.image);
                active.with_header = ActiveValue::Set(assoc.with_header);
                active.customer_headers_json = ActiveValue::Set(headers);
                active.updated_at = ActiveValue::Set(now);
                active.update(&self.db).await?;
                Ok(id)
            }
            None => {
                let active = ActiveModel {
                    id: ActiveValue::NotSet,
                    model_id: ActiveValue::Set(assoc.model_id),
                    provider_id: ActiveValue::Set(assoc.provider_id),
                    provider_model: ActiveValue::Set(assoc.provider_model),
                    status: ActiveValue::Set(assoc.status),
                    weight: ActiveValue::Set(assoc.weight),
                    priority: ActiveValue::Set(assoc.priority),
                    tool_call: ActiveValue::Set(assoc.tool_call),
                    structured_output: ActiveValue::Set(assoc.structured_output),
                    image: ActiveValue::Set(assoc.image),
                    with_header: ActiveValue::Set(assoc.with_header),
                    customer_headers_json: ActiveValue::Set(headers),
                    created_at: ActiveValue::Set(now),
                    updated_at: ActiveValue::Set(now),
                };
                let model = active.insert(&self.db).await?;
                Ok(model.id)
            }
        }
    }

    async fn update_association_routing(
        &self,
        id: i64,
        weight: i64,
        priority: i64,
    ) -> StoreResult<()> {
        use entities::associations::ActiveModel;
        let active = ActiveModel {
            id: ActiveValue::Unchanged(id),
            weight: ActiveValue::Set(weight),
            priority: ActiveValue::Set(priority),
            updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            ..Default::default()
        };
        active.update(&self.db).await?;
        Ok(())
    }

    async fn set_association_status(&self, id: i64, status: bool) -> StoreResult<()> {
        use entities::associations::ActiveModel;
        let active = ActiveModel {
            id: ActiveValue::Unchanged(id),
            status: ActiveValue::Set(status),
            updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            ..Default::default()
        };
        active.update(&self.db).await?;
        Ok(())
    }

    async fn settings(&self) -> StoreResult<GatewaySettings> {
        let rows = entities::Settings::find().all(&self.db).await?;
        let rows: Vec<SettingRow> = rows
            .into_iter()
            .map(|row| SettingRow {
                key: row.key,
                value: row.value,
            })
            .collect();
        Ok(GatewaySettings::from_rows(&rows))
    }

    async fn set_setting(&self, key: &str, value: &str) -> StoreResult<()> {
        use entities::settings::{ActiveModel, Column};
        let now = OffsetDateTime::now_utc();
        let existing = entities::Settings::find()
            .filter(Column::Key.eq(key))
            .one(&self.db)
            .await?;
        match existing {
            Some(row) => {
                let mut active: ActiveModel = row.into();
                active.value = ActiveValue::Set(value.to_string());
                active.updated_at = ActiveValue::Set(now);
                active.update(&self.db).await?;
            }
            None => {
                let active = ActiveModel {
                    id: ActiveValue::NotSet,
                    key: ActiveValue::Set(key.to_string()),
                    value: ActiveValue::Set(value.to_string()),
                    updated_at: ActiveValue::Set(now),
                };
                active.insert(&self.db).await?;
            }
        }
        Ok(())
    }

    async fn insert_chat_log(&self, log: NewChatLog) -> StoreResult<i64> {
        use entities::chat_logs::ActiveModel;
        let active = ActiveModel {
            id: ActiveValue::NotSet,
            alias: ActiveValue::Set(log.alias),
            provider_name: ActiveValue::Set(log.provider_name),
            provider_model: ActiveValue::Set(log.provider_model),
            status: ActiveValue::Set(log.status),
            style: ActiveValue::Set(log.style),
            user_agent: ActiveValue::Set(log.user_agent),
            remote_ip: ActiveValue::Set(log.remote_ip),
            retry_index: ActiveValue::Set(log.retry_index),
            error_text: ActiveValue::Set(log.error_text),
            proxy_time_ms: ActiveValue::Set(None),
            first_chunk_ms: ActiveValue::Set(None),
            chunk_ms: ActiveValue::Set(None),
            tps: ActiveValue::Set(None),
            prompt_tokens: ActiveValue::Set(None),
            completion_tokens: ActiveValue::Set(None),
            total_tokens: ActiveValue::Set(None),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        let model = active.insert(&self.db).await?;
        Ok(model.id)
    }

    async fn mark_chat_log_error(&self, id: i64, error_text: &str) -> StoreResult<()> {
        use entities::chat_logs::ActiveModel;
        let active = ActiveModel {
            id: ActiveValue::Unchanged(id),
            status: ActiveValue::Set("error".to_string()),
            error_text: ActiveValue::Set(Some(error_text.to_string())),
            ..Default::default()
        };
        active.update(&self.db).await?;
        Ok(())
    }

    async fn update_chat_log_metrics(&self, id: i64, metrics: ChatLogMetrics) -> StoreResult<()> {
        use entities::chat_logs::ActiveModel;
        let active = ActiveModel {
            id: ActiveValue::Unchanged(id),
            proxy_time_ms: ActiveValue::Set(metrics.proxy_time_ms),
            first_chunk_ms: ActiveValue::Set(metrics.first_chunk_ms),
            chunk_ms: ActiveValue::Set(metrics.chunk_ms),
            tps: ActiveValue::Set(metrics.tps),
            prompt_tokens: ActiveValue::Set(metrics.prompt_tokens),
            completion_tokens: ActiveValue::Set(metrics.completion_tokens),
            total_tokens: ActiveValue::Set(metrics.total_tokens),
            ..Default::default()
        };
        active.update(&self.db).await?;
        Ok(())
    }

    async fn insert_chat_io(
        &self,
        chat_log_id: i64,
        input: &[u8],
        output: &[u8],
    ) -> StoreResult<()> {
        use entities::chat_ios::ActiveModel;
        let active = ActiveModel {
            id: ActiveValue::NotSet,
            chat_log_id: ActiveValue::Set(chat_log_id),
            input: ActiveValue::Set(input.to_vec()),
            output: ActiveValue::Set(output.to_vec()),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        active.insert(&self.db).await?;
        Ok(())
    }

    async fn list_chat_logs(&self, limit: u64, offset: u64) -> StoreResult<Vec<ChatLogRow>> {
        use entities::chat_logs::Column;
        let rows = entities::ChatLogs::find()
            .order_by_desc(Column::Id)
            .offset(offset)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| ChatLogRow {
                id: row.id,
                alias: row.alias,
                provider_name: row.provider_name,
                provider_model: row.provider_model,
                status: row.status,
                style: row.style,
                retry_index: row.retry_index,
                error_text: row.error_text,
                metrics: ChatLogMetrics {
                    proxy_time_ms: row.proxy_time_ms,
                    first_chunk_ms: row.first_chunk_ms,
                    chunk_ms: row.chunk_ms,
                    tps: row.tps,
                    prompt_tokens: row.prompt_tokens,
                    completion_tokens: row.completion_tokens,
                    total_tokens: row.total_tokens,
                },
                created_at: row.created_at,
            })
            .collect())
    }

    async fn insert_health_check_log(&self, log: NewHealthCheckLog) -> StoreResult<i64> {
        use entities::health_check_logs::ActiveModel;
        let active = ActiveModel {
            id: ActiveValue::NotSet,
            association_id: ActiveValue::Set(log.association_id),
            provider_name: ActiveValue::Set(log.provider_name),
            provider_model: ActiveValue::Set(log.provider_model),
            status: ActiveValue::Set(log.status),
            error_text: ActiveValue::Set(log.error_text),
            latency_ms: ActiveValue::Set(log.latency_ms),
            batch_id: ActiveValue::Set(log.batch_id),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
        };
        let model = active.insert(&self.db).await?;
        Ok(model.id)
    }

    async fn recent_health_checks(
        &self,
        association_id: i64,
        limit: u64,
    ) -> StoreResult<Vec<HealthCheckLogRow>> {
        use entities::health_check_logs::Column;
        let rows = entities::HealthCheckLogs::find()
            .filter(Column::AssociationId.eq(association_id))
            .order_by_desc(Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(health_row).collect())
    }

    async fn health_checks_for_batch(
        &self,
        batch_id: &str,
    ) -> StoreResult<Vec<HealthCheckLogRow>> {
        use entities::health_check_logs::Column;
        let rows = entities::HealthCheckLogs::find()
            .filter(Column::BatchId.eq(batch_id))
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(health_row).collect())
    }
}

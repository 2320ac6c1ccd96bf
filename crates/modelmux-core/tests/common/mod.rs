//! Hand-rolled fakes shared by the integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use modelmux_core::upstream::{
    TransportError, UpstreamBody, UpstreamClient, UpstreamHttpRequest, UpstreamHttpResponse,
};
use modelmux_storage::{
    AssociationRow, ChatLogMetrics, ChatLogRow, GatewaySettings, HealthCheckLogRow, ModelRow,
    NewAssociation, NewChatLog, NewHealthCheckLog, ProviderRow, Store, StoreResult,
};
use time::OffsetDateTime;

#[derive(Debug, Clone)]
pub struct ChatLogEntry {
    pub id: i64,
    pub log: NewChatLog,
    pub metrics: Option<ChatLogMetrics>,
}

#[derive(Default)]
pub struct MemoryStore {
    pub providers: Mutex<Vec<ProviderRow>>,
    pub models: Mutex<Vec<ModelRow>>,
    pub associations: Mutex<Vec<AssociationRow>>,
    pub settings: Mutex<GatewaySettings>,
    pub chat_logs: Mutex<Vec<ChatLogEntry>>,
    pub chat_ios: Mutex<Vec<(i64, Vec<u8>, Vec<u8>)>>,
    pub health_logs: Mutex<Vec<HealthCheckLogRow>>,
}

impl MemoryStore {
    pub fn set_settings(&self, settings: GatewaySettings) {
        *self.settings.lock().unwrap() = settings;
    }

    pub fn add_provider(&self, id: i64, name: &str, ptype: &str, proxy: Option<&str>) {
        self.providers.lock().unwrap().push(ProviderRow {
            id,
            name: name.to_string(),
            ptype: ptype.to_string(),
            config: serde_json::json!({
                "base_url": format!("http://upstream-{name}.test/v1"),
                "api_key": "sk-fake",
            }),
            proxy: proxy.map(str::to_string),
            console: None,
        });
    }

    pub fn add_model(&self, id: i64, name: &str, max_retry: i32, timeout_seconds: i32) {
        self.models.lock().unwrap().push(ModelRow {
            id,
            name: name.to_string(),
            max_retry,
            timeout_seconds,
            io_log: false,
            remark: None,
        });
    }

    pub fn add_association(&self, assoc: AssociationRow) {
        self.associations.lock().unwrap().push(assoc);
    }

    pub fn association(&self, id: i64) -> Option<AssociationRow> {
        self.associations
            .lock()
            .unwrap()
            .iter()
            .find(|assoc| assoc.id == id)
            .cloned()
    }

    pub fn chat_log_entries(&self) -> Vec<ChatLogEntry> {
        self.chat_logs.lock().unwrap().clone()
    }
}

pub fn association(id: i64, model_id: i64, provider_id: i64, provider_model: &str) -> AssociationRow {
    AssociationRow {
        id,
        model_id,
        provider_id,
        provider_model: provider_model.to_string(),
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

#[async_trait]
impl Store for MemoryStore {
    async fn model_by_name(&self, name: &str) -> StoreResult<Option<ModelRow>> {
        Ok(self
            .models
            .lock()
            .unwrap()
            .iter()
            .find(|model| model.name == name)
            .cloned())
    }

    async fn list_models(&self) -> StoreResult<Vec<ModelRow>> {
        Ok(self.models.lock().unwrap().clone())
    }

    async fn provider_by_id(&self, id: i64) -> StoreResult<Option<ProviderRow>> {
        Ok(self
            .providers
            .lock()
            .unwrap()
            .iter()
            .find(|provider| provider.id == id)
            .cloned())
    }

    async fn list_providers(&self) -> StoreResult<Vec<ProviderRow>> {
        Ok(self.providers.lock().unwrap().clone())
    }

    async fn association_by_id(&self, id: i64) -> StoreResult<Option<AssociationRow>> {
        Ok(self.association(id))
    }

    async fn list_associations(&self) -> StoreResult<Vec<AssociationRow>> {
        Ok(self.associations.lock().unwrap().clone())
    }

    async fn enabled_associations_for_model(
        &self,
        model_id: i64,
    ) -> StoreResult<Vec<AssociationRow>> {
        Ok(self
            .associations
            .lock()
            .unwrap()
            .iter()
            .filter(|assoc| assoc.model_id == model_id && assoc.status)
            .cloned()
            .collect())
    }

    async fn find_association_by_target(
        &self,
        provider_name: &str,
        provider_model: &str,
    ) -> StoreResult<Option<AssociationRow>> {
        let providers = self.providers.lock().unwrap();
        let Some(provider) = providers.iter().find(|p| p.name == provider_name) else {
            return Ok(None);
        };
        Ok(self
            .associations
            .lock()
            .unwrap()
            .iter()
            .find(|assoc| {
                assoc.provider_id == provider.id && assoc.provider_model == provider_model
            })
            .cloned())
    }

    async fn upsert_provider(
        &self,
        name: &str,
        ptype: &str,
        config: &serde_json::Value,
        proxy: Option<&str>,
        console: Option<&str>,
    ) -> StoreResult<i64> {
        let mut providers = self.providers.lock().unwrap();
        if let Some(existing) = providers.iter_mut().find(|p| p.name == name) {
            existing.ptype = ptype.to_string();
            existing.config = config.clone();
            existing.proxy = proxy.map(str::to_string);
            existing.console = console.map(str::to_string);
            return Ok(existing.id);
        }
        let id = providers.len() as i64 + 1;
        providers.push(ProviderRow {
            id,
            name: name.to_string(),
            ptype: ptype.to_string(),
            config: config.clone(),
            proxy: proxy.map(str::to_string),
            console: console.map(str::to_string),
        });
        Ok(id)
    }

    async fn upsert_model(
        &self,
        name: &str,
        max_retry: i32,
        timeout_seconds: i32,
        io_log: bool,
        remark: Option<&str>,
    ) -> StoreResult<i64> {
        let mut models = self.models.lock().unwrap();
        if let Some(existing) = models.iter_mut().find(|m| m.name == name) {
            existing.max_retry = max_retry;
            existing.timeout_seconds = timeout_seconds;
            existing.io_log = io_log;
            existing.remark = remark.map(str::to_string);
            return Ok(existing.id);
        }
        let id = models.len() as i64 + 1;
        models.push(ModelRow {
            id,
            name: name.to_string(),
            max_retry,
            timeout_seconds,
            io_log,
            remark: remark.map(str::to_string),
        });
        Ok(id)
    }

    async fn upsert_association(&self, assoc: NewAssociation) -> StoreResult<i64> {
        let mut associations = self.associations.lock().unwrap();
        if let Some(existing) = associations.iter_mut().find(|a| {
            a.model_id == assoc.model_id
                && a.provider_id == assoc.provider_id
                && a.provider_model == assoc.provider_model
        }) {
            existing.status = assoc.status;
            existing.weight = assoc.weight;
            existing.priority = assoc.priority;
            return Ok(existing.id);
        }
        let id = associations.len() as i64 + 1;
        associations.push(AssociationRow {
            id,
            model_id: assoc.model_id,
            provider_id: assoc.provider_id,
            provider_model: assoc.provider_model,
            status: assoc.status,
            weight: assoc.weight,
            priority: assoc.priority,
            tool_call: assoc.tool_call,
            structured_output: assoc.structured_output,
            image: assoc.image,
            with_header: assoc.with_header,
            customer_headers: assoc.customer_headers,
        });
        Ok(id)
    }

    async fn update_association_routing(
        &self,
        id: i64,
        weight: i64,
        priority: i64,
    ) -> StoreResult<()> {
        let mut associations = self.associations.lock().unwrap();
        if let Some(assoc) = associations.iter_mut().find(|assoc| assoc.id == id) {
            assoc.weight = weight;
            assoc.priority = priority;
        }
        Ok(())
    }

    async fn set_association_status(&self, id: i64, status: bool) -> StoreResult<()> {
        let mut associations = self.associations.lock().unwrap();
        if let Some(assoc) = associations.iter_mut().find(|assoc| assoc.id == id) {
            assoc.status = status;
        }
        Ok(())
    }

    async fn settings(&self) -> StoreResult<GatewaySettings> {
        Ok(self.settings.lock().unwrap().clone())
    }

    async fn set_setting(&self, _key: &str, _value: &str) -> StoreResult<()> {
        Ok(())
    }

    async fn insert_chat_log(&self, log: NewChatLog) -> StoreResult<i64> {
        let mut logs = self.chat_logs.lock().unwrap();
        let id = logs.len() as i64 + 1;
        logs.push(ChatLogEntry {
            id,
            log,
            metrics: None,
        });
        Ok(id)
    }

    async fn mark_chat_log_error(&self, id: i64, error_text: &str) -> StoreResult<()> {
        let mut logs = self.chat_logs.lock().unwrap();
        if let Some(entry) = logs.iter_mut().find(|entry| entry.id == id) {
            entry.log.status = "error".to_string();
            entry.log.error_text = Some(error_text.to_string());
        }
        Ok(())
    }

    async fn update_chat_log_metrics(&self, id: i64, metrics: ChatLogMetrics) -> StoreResult<()> {
        let mut logs = self.chat_logs.lock().unwrap();
        if let Some(entry) = logs.iter_mut().find(|entry| entry.id == id) {
            entry.metrics = Some(metrics);
        }
        Ok(())
    }

    async fn insert_chat_io(
        &self,
        chat_log_id: i64,
        input: &[u8],
        output: &[u8],
    ) -> StoreResult<()> {
        self.chat_ios
            .lock()
            .unwrap()
            .push((chat_log_id, input.to_vec(), output.to_vec()));
        Ok(())
    }

    async fn list_chat_logs(&self, limit: u64, offset: u64) -> StoreResult<Vec<ChatLogRow>> {
        let logs = self.chat_logs.lock().unwrap();
        Ok(logs
            .iter()
            .rev()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|entry| ChatLogRow {
                id: entry.id,
                alias: entry.log.alias.clone(),
                provider_name: entry.log.provider_name.clone(),
                provider_model: entry.log.provider_model.clone(),
                status: entry.log.status.clone(),
                style: entry.log.style.clone(),
                retry_index: entry.log.retry_index,
                error_text: entry.log.error_text.clone(),
                metrics: entry.metrics.clone().unwrap_or_default(),
                created_at: OffsetDateTime::now_utc(),
            })
            .collect())
    }

    async fn insert_health_check_log(&self, log: NewHealthCheckLog) -> StoreResult<i64> {
        let mut logs = self.health_logs.lock().unwrap();
        let id = logs.len() as i64 + 1;
        logs.push(HealthCheckLogRow {
            id,
            association_id: log.association_id,
            status: log.status,
            error_text: log.error_text,
            latency_ms: log.latency_ms,
            batch_id: log.batch_id,
            created_at: OffsetDateTime::now_utc(),
        });
        Ok(id)
    }

    async fn recent_health_checks(
        &self,
        association_id: i64,
        limit: u64,
    ) -> StoreResult<Vec<HealthCheckLogRow>> {
        let logs = self.health_logs.lock().unwrap();
        Ok(logs
            .iter()
            .rev()
            .filter(|log| log.association_id == association_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn health_checks_for_batch(
        &self,
        batch_id: &str,
    ) -> StoreResult<Vec<HealthCheckLogRow>> {
        let logs = self.health_logs.lock().unwrap();
        Ok(logs
            .iter()
            .filter(|log| log.batch_id.as_deref() == Some(batch_id))
            .cloned()
            .collect())
    }
}

/// One scripted upstream reply.
pub enum Reply {
    Status(u16, &'static str),
    Json(String),
    Stream(Vec<String>),
    Transport(TransportError),
}

/// Upstream double: pops scripted replies in order, repeating the last one,
/// and records every request it saw.
#[derive(Default)]
pub struct ScriptClient {
    replies: Mutex<VecDeque<Reply>>,
    pub requests: Mutex<Vec<UpstreamHttpRequest>>,
}

impl ScriptClient {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request_bodies(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|req| {
                String::from_utf8_lossy(req.body.as_deref().unwrap_or_default()).to_string()
            })
            .collect()
    }

    fn next_reply(&self) -> Option<Reply> {
        let mut replies = self.replies.lock().unwrap();
        if replies.len() > 1 {
            replies.pop_front()
        } else {
            // Repeat the final reply forever.
            replies.front().map(|reply| match reply {
                Reply::Status(status, body) => Reply::Status(*status, body),
                Reply::Json(body) => Reply::Json(body.clone()),
                Reply::Stream(frames) => Reply::Stream(frames.clone()),
                Reply::Transport(err) => Reply::Transport(err.clone()),
            })
        }
    }
}

impl UpstreamClient for ScriptClient {
    fn send<'a>(
        &'a self,
        req: UpstreamHttpRequest,
        _proxy: Option<String>,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, TransportError>> + Send + 'a>>
    {
        self.requests.lock().unwrap().push(req);
        let reply = self.next_reply();
        Box::pin(async move {
            match reply {
                None => Err(TransportError::Other("script exhausted".to_string())),
                Some(Reply::Transport(err)) => Err(err),
                Some(Reply::Status(status, body)) => Ok(UpstreamHttpResponse {
                    status,
                    headers: Vec::new(),
                    body: UpstreamBody::Bytes(Bytes::from_static(body.as_bytes())),
                }),
                Some(Reply::Json(body)) => Ok(UpstreamHttpResponse {
                    status: 200,
                    headers: vec![(
                        "content-type".to_string(),
                        "application/json".to_string(),
                    )],
                    body: UpstreamBody::Bytes(Bytes::from(body)),
                }),
                Some(Reply::Stream(frames)) => {
                    let (tx, rx) = tokio::sync::mpsc::channel(16);
                    tokio::spawn(async move {
                        for frame in frames {
                            if tx.send(Bytes::from(frame)).await.is_err() {
                                return;
                            }
                        }
                    });
                    Ok(UpstreamHttpResponse {
                        status: 200,
                        headers: vec![(
                            "content-type".to_string(),
                            "text/event-stream".to_string(),
                        )],
                        body: UpstreamBody::Stream(rx),
                    })
                }
            }
        })
    }
}

/// Poll until `check` passes or the deadline hits; detached feedback and
/// recorder tasks land shortly after dispatch returns.
pub async fn wait_until(check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(check(), "condition not reached in time");
}

//! Periodic association health probes.
//!
//! A singleton background task walks every association on an interval,
//! sends a canned one-sentence prompt through the same adapter + HTTP path
//! dispatch uses (no transformer, no retry), records a HealthCheckLog row,
//! and applies the auto-disable / auto-enable rules.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use modelmux_protocol::Proto;
use modelmux_storage::{AssociationRow, NewHealthCheckLog, ProviderRow, Store};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::feedback::FeedbackEngine;
use crate::provider::{ProviderConfig, adapter_for};
use crate::upstream::{UpstreamClient, UpstreamBody};

const PROBE_PROMPT: &str = "Reply with OK.";
const PROBE_MAX_TOKENS: u32 = 16;
const PROBE_TIMEOUT: Duration = Duration::from_secs(60);
/// Scan depth for the consecutive-failure count.
const FAILURE_SCAN_LIMIT: u64 = 50;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct HealthBatchProgress {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub pending: usize,
    pub completed: bool,
}

struct CheckerState {
    running: bool,
    interval: Duration,
    handle: Option<JoinHandle<()>>,
}

pub struct HealthChecker {
    store: Arc<dyn Store>,
    client: Arc<dyn UpstreamClient>,
    feedback: Arc<FeedbackEngine>,
    state: Mutex<CheckerState>,
    /// Only one pass runs at a time, ticker or ad-hoc.
    pass_lock: Mutex<()>,
}

impl HealthChecker {
    pub fn new(
        store: Arc<dyn Store>,
        client: Arc<dyn UpstreamClient>,
        feedback: Arc<FeedbackEngine>,
    ) -> Self {
        Self {
            store,
            client,
            feedback,
            state: Mutex::new(CheckerState {
                running: false,
                interval: Duration::from_secs(30 * 60),
                handle: None,
            }),
            pass_lock: Mutex::new(()),
        }
    }

    pub async fn start(self: &Arc<Self>) {
        let interval = self.read_interval().await;
        let mut state = self.state.lock().await;
        if state.running {
            return;
        }
        state.interval = interval;
        state.running = true;
        let checker = self.clone();
        state.handle = Some(tokio::spawn(async move {
            checker.run(interval).await;
        }));
        info!(event = "health_checker_started", interval_secs = interval.as_secs());
    }

    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        state.running = false;
        if let Some(handle) = state.handle.take() {
            handle.abort();
        }
        info!(event = "health_checker_stopped");
    }

    /// Re-reads the interval setting without losing checker state.
    pub async fn restart(self: &Arc<Self>) {
        self.stop().await;
        self.start().await;
    }

    async fn read_interval(&self) -> Duration {
        match self.store.settings().await {
            Ok(settings) => Duration::from_secs(settings.health_check_interval_minutes.max(1) * 60),
            Err(err) => {
                warn!(event = "health_settings_failed", error = %err);
                Duration::from_secs(30 * 60)
            }
        }
    }

    async fn run(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        loop {
            ticker.tick().await;
            let enabled = self
                .store
                .settings()
                .await
                .map(|settings| settings.health_check_enabled)
                .unwrap_or(false);
            if !enabled {
                continue;
            }
            self.run_pass(None).await;
        }
    }

    /// One full pass over all associations. `batch_id` is stamped on every
    /// produced log row when this is an ad-hoc check-all.
    pub async fn run_pass(&self, batch_id: Option<&str>) {
        let _guard = self.pass_lock.lock().await;

        let associations = match self.store.list_associations().await {
            Ok(associations) => associations,
            Err(err) => {
                warn!(event = "health_list_failed", error = %err);
                return;
            }
        };

        let mut providers: HashMap<i64, ProviderRow> = HashMap::new();
        for assoc in &associations {
            if providers.contains_key(&assoc.provider_id) {
                continue;
            }
            match self.store.provider_by_id(assoc.provider_id).await {
                Ok(Some(provider)) => {
                    providers.insert(assoc.provider_id, provider);
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(event = "health_provider_load_failed", error = %err);
                }
            }
        }

        for assoc in &associations {
            let Some(provider) = providers.get(&assoc.provider_id) else {
                continue;
            };
            self.probe(assoc, provider, batch_id).await;
        }
    }

    /// Ad-hoc full pass; the caller polls progress by batch id.
    pub fn spawn_check_all(self: &Arc<Self>, batch_id: String) {
        let checker = self.clone();
        tokio::spawn(async move {
            checker.run_pass(Some(&batch_id)).await;
        });
    }

    pub async fn batch_progress(&self, batch_id: &str) -> HealthBatchProgress {
        let total = self
            .store
            .list_associations()
            .await
            .map(|associations| associations.len())
            .unwrap_or(0);
        let logs = self
            .store
            .health_checks_for_batch(batch_id)
            .await
            .unwrap_or_default();
        let success = logs.iter().filter(|log| log.status == "success").count();
        let failed = logs.len() - success;
        let pending = total.saturating_sub(logs.len());
        HealthBatchProgress {
            total,
            success,
            failed,
            pending,
            completed: pending == 0,
        }
    }

    async fn probe(
        &self,
        assoc: &AssociationRow,
        provider: &ProviderRow,
        batch_id: Option<&str>,
    ) {
        let Some(proto) = Proto::parse(&provider.ptype) else {
            return;
        };
        let Some(config) = ProviderConfig::from_json(&provider.config) else {
            return;
        };

        let body = probe_body(proto, &assoc.provider_model);
        let req = adapter_for(proto).chat_request(&config, body.into(), false);

        let started = Instant::now();
        let outcome =
            tokio::time::timeout(PROBE_TIMEOUT, self.client.send(req, provider.proxy.clone()))
                .await;
        let latency_ms = started.elapsed().as_millis() as i64;

        let error_text = match outcome {
            Err(_) => Some("probe timed out".to_string()),
            Ok(Err(err)) => Some(format!("transport: {err}")),
            Ok(Ok(resp)) if !resp.is_success() => {
                let body = match resp.body {
                    UpstreamBody::Bytes(bytes) => String::from_utf8_lossy(&bytes)
                        .chars()
                        .take(1024)
                        .collect(),
                    UpstreamBody::Stream(_) => "<stream>".to_string(),
                };
                Some(format!("upstream {}: {}", resp.status, body))
            }
            Ok(Ok(_)) => None,
        };
        let success = error_text.is_none();

        let log = NewHealthCheckLog {
            association_id: assoc.id,
            provider_name: provider.name.clone(),
            provider_model: assoc.provider_model.clone(),
            status: if success { "success" } else { "error" }.to_string(),
            error_text,
            latency_ms: Some(latency_ms),
            batch_id: batch_id.map(str::to_string),
        };
        if let Err(err) = self.store.insert_health_check_log(log).await {
            warn!(event = "health_log_insert_failed", association_id = assoc.id, error = %err);
            return;
        }

        self.apply_outcome(assoc, provider, success).await;
    }

    async fn apply_outcome(&self, assoc: &AssociationRow, provider: &ProviderRow, success: bool) {
        let settings = match self.store.settings().await {
            Ok(settings) => settings,
            Err(err) => {
                warn!(event = "health_settings_failed", error = %err);
                return;
            }
        };

        if success {
            if !assoc.status && settings.health_check_auto_enable {
                info!(event = "health_auto_enable", association_id = assoc.id);
                if let Err(err) = self.store.set_association_status(assoc.id, true).await {
                    warn!(event = "health_status_write_failed", association_id = assoc.id, error = %err);
                }
            }
            if settings.health_check_count_as_success {
                self.feedback.on_success(assoc.id).await;
            }
            return;
        }

        let failures = self.consecutive_failures(assoc.id).await;
        if settings.health_check_failure_disable_enabled
            && failures >= settings.health_check_failure_threshold
        {
            info!(
                event = "health_auto_disable",
                association_id = assoc.id,
                consecutive_failures = failures,
            );
            if let Err(err) = self.store.set_association_status(assoc.id, false).await {
                warn!(event = "health_status_write_failed", association_id = assoc.id, error = %err);
            }
        }
        if settings.health_check_count_as_failure {
            self.feedback
                .on_failure(&provider.name, &assoc.provider_model)
                .await;
        }
    }

    /// Contiguous error rows from the newest log backwards.
    async fn consecutive_failures(&self, association_id: i64) -> u32 {
        let logs = match self
            .store
            .recent_health_checks(association_id, FAILURE_SCAN_LIMIT)
            .await
        {
            Ok(logs) => logs,
            Err(err) => {
                warn!(event = "health_scan_failed", association_id, error = %err);
                return 0;
            }
        };
        let mut count = 0;
        for log in logs {
            if log.status == "error" {
                count += 1;
            } else {
                break;
            }
        }
        count
    }
}

fn probe_body(proto: Proto, provider_model: &str) -> Vec<u8> {
    let body = match proto {
        Proto::OpenAiChat => json!({
            "model": provider_model,
            "messages": [{ "role": "user", "content": PROBE_PROMPT }],
            "max_tokens": PROBE_MAX_TOKENS,
        }),
        Proto::OpenAiResponses => json!({
            "model": provider_model,
            "input": PROBE_PROMPT,
            "max_output_tokens": PROBE_MAX_TOKENS,
        }),
        Proto::Claude => json!({
            "model": provider_model,
            "max_tokens": PROBE_MAX_TOKENS,
            "messages": [{ "role": "user", "content": PROBE_PROMPT }],
        }),
    };
    body.to_string().into_bytes()
}

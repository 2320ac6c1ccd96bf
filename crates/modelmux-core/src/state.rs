use std::sync::Arc;

use modelmux_storage::Store;

use crate::dispatch::Dispatcher;
use crate::feedback::FeedbackEngine;
use crate::health::HealthChecker;
use crate::upstream::UpstreamClient;

/// Shared per-process state; constructed once in main and threaded through
/// the router and background tasks.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub dispatcher: Arc<Dispatcher>,
    pub feedback: Arc<FeedbackEngine>,
    pub health: Arc<HealthChecker>,
    /// Shared bearer token; `None` runs the gateway in open mode.
    pub token: Option<String>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn Store>,
        client: Arc<dyn UpstreamClient>,
        token: Option<String>,
    ) -> Arc<Self> {
        let feedback = Arc::new(FeedbackEngine::new(store.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            client.clone(),
            feedback.clone(),
        ));
        let health = Arc::new(HealthChecker::new(
            store.clone(),
            client,
            feedback.clone(),
        ));
        Arc::new(Self {
            store,
            dispatcher,
            feedback,
            health,
            token,
        })
    }
}

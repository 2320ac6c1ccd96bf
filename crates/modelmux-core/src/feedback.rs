//! Post-attempt weight/priority/status mutation.
//!
//! Runs on detached tasks so a slow store write never delays the response
//! path; conflicting concurrent writes are last-write-wins per row.

use std::sync::Arc;

use modelmux_storage::{AssociationRow, GatewaySettings, Store};
use tracing::warn;

pub struct FeedbackEngine {
    store: Arc<dyn Store>,
}

impl FeedbackEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub fn spawn_success(self: &Arc<Self>, association_id: i64) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.on_success(association_id).await;
        });
    }

    pub fn spawn_failure(self: &Arc<Self>, provider_name: String, provider_model: String) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.on_failure(&provider_name, &provider_model).await;
        });
    }

    pub async fn on_success(&self, association_id: i64) {
        let settings = match self.store.settings().await {
            Ok(settings) => settings,
            Err(err) => {
                warn!(event = "feedback_settings_failed", error = %err);
                return;
            }
        };
        if !settings.auto_success_increase {
            return;
        }
        let association = match self.store.association_by_id(association_id).await {
            Ok(Some(association)) => association,
            Ok(None) => return,
            Err(err) => {
                warn!(event = "feedback_load_failed", association_id, error = %err);
                return;
            }
        };
        let (weight, priority) = success_adjust(&association, &settings);
        if weight == association.weight && priority == association.priority {
            return;
        }
        if let Err(err) = self
            .store
            .update_association_routing(association_id, weight, priority)
            .await
        {
            warn!(event = "feedback_write_failed", association_id, error = %err);
        }
    }

    /// Failed attempts are attributed by the log's provider identity rather
    /// than an association id; a retry chain may touch several associations.
    pub async fn on_failure(&self, provider_name: &str, provider_model: &str) {
        let settings = match self.store.settings().await {
            Ok(settings) => settings,
            Err(err) => {
                warn!(event = "feedback_settings_failed", error = %err);
                return;
            }
        };
        if !settings.auto_weight_decay && !settings.auto_priority_decay {
            return;
        }
        let association = match self
            .store
            .find_association_by_target(provider_name, provider_model)
            .await
        {
            Ok(Some(association)) => association,
            Ok(None) => return,
            Err(err) => {
                warn!(event = "feedback_load_failed", provider_name, error = %err);
                return;
            }
        };

        let (weight, priority, disable) = failure_adjust(&association, &settings);
        if weight != association.weight || priority != association.priority {
            if let Err(err) = self
                .store
                .update_association_routing(association.id, weight, priority)
                .await
            {
                warn!(event = "feedback_write_failed", association_id = association.id, error = %err);
            }
        }
        if disable {
            if let Err(err) = self.store.set_association_status(association.id, false).await {
                warn!(event = "feedback_disable_failed", association_id = association.id, error = %err);
            }
        }
    }
}

/// New (weight, priority) after a success. The cap never reduces a value
/// already above it.
fn success_adjust(association: &AssociationRow, settings: &GatewaySettings) -> (i64, i64) {
    let weight = association.weight.max(
        (association.weight + settings.auto_weight_increase_step)
            .min(settings.auto_weight_increase_max),
    );
    let priority = association.priority.max(
        (association.priority + settings.auto_priority_increase_step)
            .min(settings.auto_priority_increase_max),
    );
    (weight, priority)
}

/// New (weight, priority, disable) after a failure.
fn failure_adjust(
    association: &AssociationRow,
    settings: &GatewaySettings,
) -> (i64, i64, bool) {
    let mut weight = association.weight;
    let mut priority = association.priority;
    let mut disable = false;

    if settings.auto_weight_decay {
        weight = (weight - settings.auto_weight_decay_step).max(1);
    }
    if settings.auto_priority_decay {
        priority = (priority - settings.auto_priority_decay_step).max(0);
        if settings.auto_priority_decay_disable_enabled
            && priority <= settings.auto_priority_decay_threshold
        {
            disable = true;
        }
    }
    (weight, priority, disable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn association(weight: i64, priority: i64) -> AssociationRow {
        AssociationRow {
            id: 1,
            model_id: 1,
            provider_id: 1,
            provider_model: "m".to_string(),
            status: true,
            weight,
            priority,
            tool_call: false,
            structured_output: false,
            image: false,
            with_header: false,
            customer_headers: BTreeMap::new(),
        }
    }

    fn settings() -> GatewaySettings {
        GatewaySettings {
            auto_success_increase: true,
            auto_weight_increase_step: 2,
            auto_weight_increase_max: 10,
            auto_priority_increase_step: 1,
            auto_priority_increase_max: 20,
            auto_weight_decay: true,
            auto_weight_decay_step: 3,
            auto_priority_decay: true,
            auto_priority_decay_step: 5,
            auto_priority_decay_threshold: 2,
            auto_priority_decay_disable_enabled: true,
            ..GatewaySettings::default()
        }
    }

    #[test]
    fn success_respects_cap_without_reducing() {
        let (weight, priority) = success_adjust(&association(9, 19), &settings());
        assert_eq!(weight, 10);
        assert_eq!(priority, 20);

        // Already above the cap: stays put instead of shrinking.
        let (weight, priority) = success_adjust(&association(15, 30), &settings());
        assert_eq!(weight, 15);
        assert_eq!(priority, 30);
    }

    #[test]
    fn failure_floors_weight_at_one_and_priority_at_zero() {
        let (weight, priority, _) = failure_adjust(&association(2, 3), &settings());
        assert_eq!(weight, 1);
        assert_eq!(priority, 0);
    }

    #[test]
    fn decay_below_threshold_disables() {
        let (_, priority, disable) = failure_adjust(&association(5, 6), &settings());
        assert_eq!(priority, 1);
        assert!(disable);

        let (_, _, disable) = failure_adjust(&association(5, 20), &settings());
        assert!(!disable);
    }
}

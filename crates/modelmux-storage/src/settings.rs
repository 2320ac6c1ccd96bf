//! Typed view over the settings table.
//!
//! Settings are read per-decision rather than cached; a missing or
//! unparseable row falls back to its default so a half-written admin update
//! can never wedge dispatch.

use crate::store::SettingRow;

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub strict_capability_match: bool,
    pub auto_weight_decay: bool,
    pub auto_weight_decay_step: i64,
    pub auto_success_increase: bool,
    pub auto_weight_increase_step: i64,
    pub auto_weight_increase_max: i64,
    pub auto_priority_decay: bool,
    pub auto_priority_decay_step: i64,
    pub auto_priority_decay_threshold: i64,
    pub auto_priority_decay_disable_enabled: bool,
    pub auto_priority_increase_step: i64,
    pub auto_priority_increase_max: i64,
    pub health_check_enabled: bool,
    pub health_check_interval_minutes: u64,
    pub health_check_failure_threshold: u32,
    pub health_check_failure_disable_enabled: bool,
    pub health_check_auto_enable: bool,
    pub health_check_count_as_success: bool,
    pub health_check_count_as_failure: bool,
    pub strip_response_headers: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            strict_capability_match: false,
            auto_weight_decay: false,
            auto_weight_decay_step: 1,
            auto_success_increase: false,
            auto_weight_increase_step: 1,
            auto_weight_increase_max: 10,
            auto_priority_decay: false,
            auto_priority_decay_step: 1,
            auto_priority_decay_threshold: 0,
            auto_priority_decay_disable_enabled: false,
            auto_priority_increase_step: 1,
            auto_priority_increase_max: 10,
            health_check_enabled: false,
            health_check_interval_minutes: 30,
            health_check_failure_threshold: 3,
            health_check_failure_disable_enabled: false,
            health_check_auto_enable: false,
            health_check_count_as_success: false,
            health_check_count_as_failure: false,
            strip_response_headers: false,
        }
    }
}

impl GatewaySettings {
    pub fn from_rows(rows: &[SettingRow]) -> Self {
        let mut settings = Self::default();
        for row in rows {
            let value = row.value.as_str();
            match row.key.as_str() {
                "strict_capability_match" => settings.strict_capability_match = parse_bool(value),
                "auto_weight_decay" => settings.auto_weight_decay = parse_bool(value),
                "auto_weight_decay_step" => {
                    settings.auto_weight_decay_step = parse_or(value, settings.auto_weight_decay_step)
                }
                "auto_success_increase" => settings.auto_success_increase = parse_bool(value),
                "auto_weight_increase_step" => {
                    settings.auto_weight_increase_step =
                        parse_or(value, settings.auto_weight_increase_step)
                }
                "auto_weight_increase_max" => {
                    settings.auto_weight_increase_max =
                        parse_or(value, settings.auto_weight_increase_max)
                }
                "auto_priority_decay" => settings.auto_priority_decay = parse_bool(value),
                "auto_priority_decay_step" => {
                    settings.auto_priority_decay_step =
                        parse_or(value, settings.auto_priority_decay_step)
                }
                "auto_priority_decay_threshold" => {
                    settings.auto_priority_decay_threshold =
                        parse_or(value, settings.auto_priority_decay_threshold)
                }
                "auto_priority_decay_disable_enabled" => {
                    settings.auto_priority_decay_disable_enabled = parse_bool(value)
                }
                "auto_priority_increase_step" => {
                    settings.auto_priority_increase_step =
                        parse_or(value, settings.auto_priority_increase_step)
                }
                "auto_priority_increase_max" => {
                    settings.auto_priority_increase_max =
                        parse_or(value, settings.auto_priority_increase_max)
                }
                "health_check_enabled" => settings.health_check_enabled = parse_bool(value),
                "health_check_interval_minutes" => {
                    settings.health_check_interval_minutes =
                        parse_or(value, settings.health_check_interval_minutes)
                }
                "health_check_failure_threshold" => {
                    settings.health_check_failure_threshold =
                        parse_or(value, settings.health_check_failure_threshold)
                }
                "health_check_failure_disable_enabled" => {
                    settings.health_check_failure_disable_enabled = parse_bool(value)
                }
                "health_check_auto_enable" => settings.health_check_auto_enable = parse_bool(value),
                "health_check_count_as_success" => {
                    settings.health_check_count_as_success = parse_bool(value)
                }
                "health_check_count_as_failure" => {
                    settings.health_check_count_as_failure = parse_bool(value)
                }
                "strip_response_headers" => settings.strip_response_headers = parse_bool(value),
                _ => {}
            }
        }
        settings
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "on"
    )
}

fn parse_or<T: std::str::FromStr>(value: &str, default: T) -> T {
    value.trim().parse().unwrap_or(default)
}

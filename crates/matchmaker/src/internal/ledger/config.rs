use crate::Map;
use serde::{Deserialize, Serialize};

pub const MIN_PRIORITY_FACTOR: f64 = 1.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LedgerConfig {
    pub min_priority: f64,
    /// Half life of the usage decay, in seconds.
    pub priority_half_life: f64,
    pub default_priority_factor: f64,
    pub nice_user_priority_factor: f64,
    pub nice_user_prefix: String,
    pub remote_user_priority_factor: f64,
    pub local_domain: Option<String>,
    pub max_log_size: u64,
    pub limits: LimitsConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            min_priority: 0.5,
            priority_half_life: 86400.0,
            default_priority_factor: 1e3,
            nice_user_priority_factor: 1e10,
            nice_user_prefix: "nice-user.".to_string(),
            remote_user_priority_factor: 1e7,
            local_domain: None,
            max_log_size: 1_000_000,
            limits: LimitsConfig::default(),
        }
    }
}

impl LedgerConfig {
    /// Remote domain factor only applies when a local domain is known.
    pub fn effective_remote_factor(&self) -> f64 {
        if self.local_domain.is_some() {
            self.remote_user_priority_factor
        } else {
            1.0
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum for individual limit names.
    pub maxima: Map<String, f64>,
    /// Maximum for every limit in a scope (`scope.name`).
    pub scope_defaults: Map<String, f64>,
    pub default_limit: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            maxima: Map::default(),
            scope_defaults: Map::default(),
            default_limit: 2_308_032.0,
        }
    }
}

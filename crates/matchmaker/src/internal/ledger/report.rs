use crate::internal::ledger::Timestamp;
use serde::{Deserialize, Serialize};

/// One row of the aggregate accounting report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountReport {
    pub name: String,
    pub is_group: bool,
    /// Effective priority (stored priority times the factor).
    pub effective_priority: f64,
    pub priority: f64,
    pub priority_factor: f64,
    pub resources_used: u32,
    pub weighted_resources_used: f64,
    pub accumulated_usage: f64,
    pub weighted_accumulated_usage: f64,
    pub begin_usage_time: Timestamp,
    pub last_usage_time: Timestamp,
    pub ceiling: Option<f64>,
    pub floor: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClaimReport {
    pub resource: String,
    pub start_time: Timestamp,
    pub slot_weight: f64,
    pub concurrency_limits: Option<String>,
}

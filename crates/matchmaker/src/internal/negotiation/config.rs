use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables of the negotiation cycle.
///
/// Fields that are missing from a builder take their value from
/// [`NegotiatorConfig::default`].
#[derive(Builder, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[builder(pattern = "owned", default)]
#[serde(default)]
pub struct NegotiatorConfig {
    /// Desired period between the starts of two cycles.
    pub interval: Duration,
    /// Minimal pause after a cycle finished.
    pub cycle_delay: Duration,
    pub max_time_per_cycle: Duration,
    /// Total time one submitter may take within a cycle, across spins.
    pub max_time_per_submitter: Duration,
    pub max_time_per_spin: Duration,
    pub max_pie_spins: u32,
    pub max_allocation_rounds: u32,
    pub consider_preemption: bool,
    pub preemption_priority_delta: f64,
    pub use_slot_weights: bool,
    pub use_job_priority_in_sort: bool,
    pub match_list_cache: bool,
    pub allow_quota_oversubscription: bool,
    pub round_robin_remainders: bool,
    pub floor_round: bool,
    /// Number of cycle records kept for diagnostics.
    pub history_size: usize,
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        NegotiatorConfig {
            interval: Duration::from_secs(60),
            cycle_delay: Duration::from_secs(20),
            max_time_per_cycle: Duration::from_secs(1200),
            max_time_per_submitter: Duration::from_secs(60),
            max_time_per_spin: Duration::from_secs(120),
            max_pie_spins: 1000,
            max_allocation_rounds: 3,
            consider_preemption: true,
            preemption_priority_delta: 0.0,
            use_slot_weights: true,
            use_job_priority_in_sort: false,
            match_list_cache: true,
            allow_quota_oversubscription: false,
            round_robin_remainders: true,
            floor_round: true,
            history_size: 10,
        }
    }
}

impl NegotiatorConfig {
    /// Delay between the end of a cycle that took `last_duration` and the
    /// start of the next one.
    pub fn next_cycle_delay(&self, last_duration: Duration) -> Duration {
        self.cycle_delay
            .max(self.interval.saturating_sub(last_duration))
    }
}

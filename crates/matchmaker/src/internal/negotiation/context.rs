use crate::Map;
use crate::internal::ledger::{Timestamp, UsageLedger};
use crate::internal::matching::{Evaluator, MatchConfig, OfferPool};
use crate::internal::negotiation::comm::NegotiatorComm;
use crate::internal::negotiation::config::NegotiatorConfig;
use crate::internal::negotiation::record::CycleRecord;
use std::time::{Duration, Instant};

/// Everything a running cycle works with, borrowed from the negotiator and
/// its caller for the duration of the pie-slicing phase.
pub(crate) struct CycleContext<'a> {
    pub ledger: &'a mut UsageLedger,
    pub pool: &'a mut OfferPool,
    pub comm: &'a mut dyn NegotiatorComm,
    pub evaluator: &'a dyn Evaluator,
    pub config: &'a NegotiatorConfig,
    pub record: &'a mut CycleRecord,
    pub now: Timestamp,
    pub deadline: Instant,
    /// Size of the pool at the start of the cycle.
    pub pool_weight: f64,
    pub min_slot_weight: f64,
    /// Time spent with each submitter so far in this cycle.
    pub time_spent: Map<String, Duration>,
}

impl CycleContext<'_> {
    pub fn match_config(&self) -> MatchConfig {
        MatchConfig {
            consider_preemption: self.config.consider_preemption,
            preemption_priority_delta: self.config.preemption_priority_delta,
            use_slot_weights: self.config.use_slot_weights,
        }
    }

    pub fn remaining_cycle_time(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn match_cost(&self, slot_weight: f64) -> f64 {
        self.match_config().match_cost(slot_weight)
    }

    pub fn time_spent(&self, submitter: &str) -> Duration {
        self.time_spent.get(submitter).copied().unwrap_or_default()
    }

    pub fn is_failed(&self, submitter: &str) -> bool {
        self.record.failed_submitters.contains(submitter)
    }
}

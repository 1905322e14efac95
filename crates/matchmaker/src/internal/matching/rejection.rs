use derive_more::{Add, AddAssign};
use serde::{Deserialize, Serialize};

/// Why candidates were not selected for a request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Add, AddAssign, Serialize, Deserialize)]
pub struct RejectionCounts {
    pub unmatched: u32,
    pub preemption_policy: u32,
    pub preemption_rank: u32,
    pub preemption_priority: u32,
    pub submitter_limit: u32,
    pub concurrency_limit: u32,
    pub evaluation_errors: u32,
}

impl RejectionCounts {
    pub fn total(&self) -> u32 {
        self.unmatched
            + self.preemption_policy
            + self.preemption_rank
            + self.preemption_priority
            + self.submitter_limit
            + self.concurrency_limit
            + self.evaluation_errors
    }

    /// Human-readable reason sent with a rejection, most specific first.
    pub fn reason(&self, limit: Option<&str>, ignore_submitter_limit: bool) -> String {
        if self.concurrency_limit > 0 {
            format!("concurrency limit {} reached", limit.unwrap_or_default())
        } else if self.preemption_policy > 0 {
            "PREEMPTION_REQUIREMENTS == False".to_string()
        } else if self.preemption_priority > 0 {
            "insufficient priority".to_string()
        } else if self.submitter_limit > 0 && !ignore_submitter_limit {
            "submitter limit exceeded".to_string()
        } else {
            "no match found".to_string()
        }
    }
}

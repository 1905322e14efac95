use crate::internal::records::SubmitterAd;
use rand::Rng;
use std::cmp::Ordering;

/// Usage relative to the allocation; submitters far below their share come
/// first among equal priorities.
pub fn starvation_ratio(usage: f64, allocated: f64) -> f64 {
    if allocated > 0.0 {
        usage / allocated
    } else {
        f64::MAX
    }
}

/// Per-cycle negotiation state of one submitter.
#[derive(Debug, Clone)]
pub(crate) struct SubmitterEntry {
    pub ad: SubmitterAd,
    pub priority: f64,
    pub starvation: f64,
    pub tiebreak: u32,
}

impl SubmitterEntry {
    pub fn new(ad: SubmitterAd, priority: f64, rng: &mut impl Rng) -> Self {
        SubmitterEntry {
            ad,
            priority,
            starvation: f64::MAX,
            tiebreak: rng.random(),
        }
    }

    pub fn name(&self) -> &str {
        &self.ad.name
    }
}

fn compare(a: &SubmitterEntry, b: &SubmitterEntry, use_job_priority: bool) -> Ordering {
    let order = a
        .priority
        .total_cmp(&b.priority)
        .then(a.starvation.total_cmp(&b.starvation));
    let order = if use_job_priority {
        // Higher job priority goes first
        order.then(b.ad.job_priority.cmp(&a.ad.job_priority))
    } else {
        order
    };
    order.then(a.tiebreak.cmp(&b.tiebreak))
}

/// Best priority (lowest value) first.
pub(crate) fn sort_submitters(entries: &mut [SubmitterEntry], use_job_priority: bool) {
    entries.sort_by(|a, b| compare(a, b, use_job_priority));
}

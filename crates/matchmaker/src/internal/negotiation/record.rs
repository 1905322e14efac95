use crate::Set;
use crate::internal::matching::RejectionCounts;
use crate::internal::ledger::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;

/// Counters of a single negotiation cycle; diagnostics only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleRecord {
    pub started_at: Timestamp,
    pub duration: Duration,
    pub fetch_duration: Duration,
    pub accounting_duration: Duration,
    pub quota_duration: Duration,
    pub sort_duration: Duration,
    pub pie_duration: Duration,
    pub offers_seen: usize,
    pub submitters_seen: usize,
    pub pool_size: f64,
    pub matches: u32,
    pub preemptions: u32,
    pub rejections: RejectionCounts,
    pub jobs_considered: u32,
    pub pies: u32,
    pub pie_spins: u32,
    pub allocation_rounds: u32,
    pub active_submitters: Set<String>,
    pub failed_submitters: Set<String>,
    pub out_of_time_submitters: Set<String>,
    pub limited_submitters: Set<String>,
    /// Set when the cycle was abandoned; contains the reason.
    pub aborted: Option<String>,
}

impl CycleRecord {
    pub fn new(started_at: Timestamp) -> Self {
        CycleRecord {
            started_at,
            ..Default::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.aborted.is_none()
    }
}

/// The most recent cycle records, newest last.
#[derive(Debug, Clone)]
pub struct CycleHistory {
    records: VecDeque<CycleRecord>,
    capacity: usize,
}

impl CycleHistory {
    pub fn new(capacity: usize) -> Self {
        CycleHistory {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: CycleRecord) {
        if self.capacity == 0 {
            return;
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        while self.records.len() > capacity {
            self.records.pop_front();
        }
    }

    pub fn last(&self) -> Option<&CycleRecord> {
        self.records.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CycleRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

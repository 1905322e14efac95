//! Records supplied by the inventory: resource offers, submitter demand and
//! the job requests handed out by negotiation sessions.

use crate::Map;
use serde::{Deserialize, Serialize};

/// Arbitrary matchable attributes; only the evaluator interprets them.
pub type AttributeMap = Map<String, serde_json::Value>;

fn default_slot_weight() -> f64 {
    1.0
}

fn default_cpus() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Offer {
    pub name: String,
    #[serde(default)]
    pub claim: Option<OfferClaim>,
    #[serde(default = "default_slot_weight")]
    pub slot_weight: f64,
    #[serde(default = "default_cpus")]
    pub cpus: u32,
    #[serde(default)]
    pub partitionable: bool,
    /// Token passed to the submitter so it can claim the resource.
    #[serde(default)]
    pub claim_token: Option<String>,
    #[serde(default)]
    pub attributes: AttributeMap,
}

/// Existing claim reported by the resource itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OfferClaim {
    pub remote_user: String,
    /// The offer's rank of the job currently running on it.
    #[serde(default)]
    pub current_rank: f64,
    #[serde(default)]
    pub concurrency_limits: Option<String>,
}

impl Offer {
    pub fn new(name: &str) -> Self {
        Offer {
            name: name.to_string(),
            claim: None,
            slot_weight: 1.0,
            cpus: 1,
            partitionable: false,
            claim_token: None,
            attributes: Default::default(),
        }
    }

    pub fn remote_user(&self) -> Option<&str> {
        self.claim.as_ref().map(|c| c.remote_user.as_str())
    }

    pub fn is_claimed(&self) -> bool {
        self.claim.is_some()
    }

    /// Capacity the offer contributes to the pool size.
    pub fn pool_weight(&self, use_slot_weights: bool) -> f64 {
        if use_slot_weights {
            self.slot_weight
        } else if self.partitionable {
            self.cpus as f64
        } else {
            1.0
        }
    }

    pub fn claim_token(&self) -> &str {
        self.claim_token.as_deref().unwrap_or(&self.name)
    }
}

/// Demand summary of one submitter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitterAd {
    pub name: String,
    #[serde(default)]
    pub idle_jobs: u32,
    #[serde(default)]
    pub running_jobs: u32,
    #[serde(default)]
    pub weighted_idle_jobs: Option<f64>,
    #[serde(default)]
    pub weighted_running_jobs: Option<f64>,
    /// Highest job priority among the idle jobs.
    #[serde(default)]
    pub job_priority: i32,
    #[serde(default)]
    pub attributes: AttributeMap,
}

impl SubmitterAd {
    pub fn new(name: &str, idle_jobs: u32) -> Self {
        SubmitterAd {
            name: name.to_string(),
            idle_jobs,
            running_jobs: 0,
            weighted_idle_jobs: None,
            weighted_running_jobs: None,
            job_priority: 0,
            attributes: Default::default(),
        }
    }

    pub fn idle_demand(&self, use_slot_weights: bool) -> f64 {
        match (use_slot_weights, self.weighted_idle_jobs) {
            (true, Some(weighted)) => weighted,
            _ => self.idle_jobs as f64,
        }
    }

    pub fn running_demand(&self, use_slot_weights: bool) -> f64 {
        match (use_slot_weights, self.weighted_running_jobs) {
            (true, Some(weighted)) => weighted,
            _ => self.running_jobs as f64,
        }
    }
}

/// One pending job handed out by a negotiation session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRequest {
    pub id: String,
    /// Jobs with the same autocluster have identical matching attributes.
    #[serde(default)]
    pub autocluster: Option<i64>,
    #[serde(default)]
    pub concurrency_limits: Option<String>,
    #[serde(default)]
    pub attributes: AttributeMap,
}

impl JobRequest {
    pub fn new(id: &str) -> Self {
        JobRequest {
            id: id.to_string(),
            autocluster: None,
            concurrency_limits: None,
            attributes: Default::default(),
        }
    }
}

/// Everything the inventory knows at the start of a cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Snapshot {
    pub offers: Vec<Offer>,
    pub submitters: Vec<SubmitterAd>,
}

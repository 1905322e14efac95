use crate::internal::records::{JobRequest, Offer, OfferClaim, SubmitterAd};
use serde_json::{Value, json};

pub struct OfferBuilder {
    offer: Offer,
}

impl OfferBuilder {
    pub fn new(name: &str) -> OfferBuilder {
        OfferBuilder {
            offer: Offer::new(name),
        }
    }

    pub fn weight(mut self, slot_weight: f64) -> OfferBuilder {
        self.offer.slot_weight = slot_weight;
        self
    }

    pub fn partitionable(mut self, cpus: u32) -> OfferBuilder {
        self.offer.partitionable = true;
        self.offer.cpus = cpus;
        self
    }

    pub fn claimed_by(mut self, user: &str, current_rank: f64) -> OfferBuilder {
        self.offer.claim = Some(OfferClaim {
            remote_user: user.to_string(),
            current_rank,
            concurrency_limits: None,
        });
        self
    }

    pub fn claim_limits(mut self, limits: &str) -> OfferBuilder {
        if let Some(claim) = self.offer.claim.as_mut() {
            claim.concurrency_limits = Some(limits.to_string());
        }
        self
    }

    pub fn attr<V: Into<Value>>(mut self, name: &str, value: V) -> OfferBuilder {
        self.offer.attributes.insert(name.to_string(), value.into());
        self
    }

    /// The offer's rank of requests of `submitter`.
    pub fn startd_rank(mut self, submitter: &str, rank: f64) -> OfferBuilder {
        let ranks = self
            .offer
            .attributes
            .entry("rank".to_string())
            .or_insert_with(|| json!({}));
        if let Some(ranks) = ranks.as_object_mut() {
            ranks.insert(submitter.to_string(), json!(rank));
        }
        self
    }

    pub fn build(self) -> Offer {
        self.offer
    }
}

pub struct JobBuilder {
    job: JobRequest,
}

impl JobBuilder {
    pub fn new(id: &str) -> JobBuilder {
        JobBuilder {
            job: JobRequest::new(id),
        }
    }

    pub fn autocluster(mut self, autocluster: i64) -> JobBuilder {
        self.job.autocluster = Some(autocluster);
        self
    }

    pub fn limits(mut self, limits: &str) -> JobBuilder {
        self.job.concurrency_limits = Some(limits.to_string());
        self
    }

    /// Only offers whose attribute `name` equals `value` match.
    pub fn requires<V: Into<Value>>(mut self, name: &str, value: V) -> JobBuilder {
        let requirements = self
            .job
            .attributes
            .entry("requirements".to_string())
            .or_insert_with(|| json!({}));
        if let Some(requirements) = requirements.as_object_mut() {
            requirements.insert(name.to_string(), value.into());
        }
        self
    }

    /// Ranks offers by their numeric attribute `name`.
    pub fn rank_by(mut self, name: &str) -> JobBuilder {
        self.job
            .attributes
            .insert("rank".to_string(), json!(name));
        self
    }

    pub fn build(self) -> JobRequest {
        self.job
    }
}

pub fn simple_jobs(submitter: &str, count: usize) -> Vec<JobRequest> {
    (0..count)
        .map(|i| JobRequest::new(&format!("{submitter}#{i}")))
        .collect()
}

pub fn submitter_ad(name: &str, idle_jobs: u32) -> SubmitterAd {
    SubmitterAd::new(name, idle_jobs)
}

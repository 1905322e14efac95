use crate::internal::common::error::MatchmakerError;
use crate::internal::negotiation::{NegotiatorComm, ReconfigQueue, Reconfiguration, SessionReply};
use crate::internal::records::{JobRequest, Offer, Snapshot, SubmitterAd};
use crate::{Map, Set};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
pub struct Grant {
    pub submitter: String,
    pub job: String,
    pub offer: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub submitter: String,
    pub job: String,
    pub reason: String,
}

/// In-memory inventory and schedds.
///
/// Submitter ads are reported with `idle_jobs` equal to the number of
/// queued requests. Requests handed out in a session and not granted go
/// back to the front of the queue when the session ends.
#[derive(Default)]
pub struct TestComm {
    pub offers: Vec<Offer>,
    ads: Vec<SubmitterAd>,
    queues: Map<String, VecDeque<JobRequest>>,
    handed_out: Map<String, Vec<JobRequest>>,

    pub fail_snapshot: bool,
    /// Submitters whose sessions break on the first request.
    pub broken: Set<String>,
    /// Posted while the snapshot is being fetched, i.e. in the middle of a cycle.
    pub reconfigure_during_fetch: Option<(ReconfigQueue, Reconfiguration)>,

    pub grants: Vec<Grant>,
    pub rejections: Vec<Rejection>,
    pub notified: Vec<String>,
    pub ended_sessions: Vec<String>,
}

impl TestComm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_submitter(&mut self, ad: SubmitterAd) {
        self.queues.entry(ad.name.clone()).or_default();
        self.ads.push(ad);
    }

    pub fn add_jobs(&mut self, submitter: &str, jobs: Vec<JobRequest>) {
        if !self.ads.iter().any(|ad| ad.name == submitter) {
            self.add_submitter(SubmitterAd::new(submitter, 0));
        }
        self.queues
            .entry(submitter.to_string())
            .or_default()
            .extend(jobs);
    }

    pub fn ad_mut(&mut self, submitter: &str) -> &mut SubmitterAd {
        self.ads
            .iter_mut()
            .find(|ad| ad.name == submitter)
            .unwrap()
    }

    pub fn pending(&self, submitter: &str) -> usize {
        self.queues.get(submitter).map_or(0, |q| q.len())
    }

    pub fn grants_of(&self, submitter: &str) -> Vec<&str> {
        self.grants
            .iter()
            .filter(|g| g.submitter == submitter)
            .map(|g| g.offer.as_str())
            .collect()
    }

    pub fn rejections_of(&self, submitter: &str) -> Vec<&str> {
        self.rejections
            .iter()
            .filter(|r| r.submitter == submitter)
            .map(|r| r.reason.as_str())
            .collect()
    }

    /// Marks granted offers as claimed by the winners, as the inventory
    /// would report them in the next cycle.
    pub fn claim_granted(&mut self) {
        for grant in &self.grants {
            if let Some(offer) = self.offers.iter_mut().find(|o| o.name == grant.offer) {
                offer.claim = Some(crate::internal::records::OfferClaim {
                    remote_user: grant.submitter.clone(),
                    current_rank: 0.0,
                    concurrency_limits: None,
                });
            }
        }
    }

    pub fn clear_log(&mut self) {
        self.grants.clear();
        self.rejections.clear();
        self.notified.clear();
        self.ended_sessions.clear();
    }
}

impl NegotiatorComm for TestComm {
    fn fetch_snapshot(&mut self) -> crate::Result<Snapshot> {
        if let Some((queue, reconfiguration)) = self.reconfigure_during_fetch.take() {
            queue.request(reconfiguration);
        }
        if self.fail_snapshot {
            return Err(MatchmakerError::Inventory(
                "collector is not responding".to_string(),
            ));
        }
        let submitters = self
            .ads
            .iter()
            .map(|ad| {
                let mut ad = ad.clone();
                ad.idle_jobs = self.pending(&ad.name) as u32;
                ad
            })
            .collect();
        Ok(Snapshot {
            offers: self.offers.clone(),
            submitters,
        })
    }

    fn request_next_job(&mut self, submitter: &str) -> crate::Result<SessionReply> {
        if self.broken.contains(submitter) {
            return Err(MatchmakerError::Session(format!(
                "connection to {submitter} lost"
            )));
        }
        let Some(job) = self
            .queues
            .get_mut(submitter)
            .and_then(|queue| queue.pop_front())
        else {
            return Ok(SessionReply::NoMoreJobs);
        };
        self.handed_out
            .entry(submitter.to_string())
            .or_default()
            .push(job.clone());
        Ok(SessionReply::Job(job))
    }

    fn reject(&mut self, submitter: &str, job: &JobRequest, reason: &str) -> crate::Result<()> {
        self.rejections.push(Rejection {
            submitter: submitter.to_string(),
            job: job.id.clone(),
            reason: reason.to_string(),
        });
        Ok(())
    }

    fn permission_granted(
        &mut self,
        submitter: &str,
        job: &JobRequest,
        offer: &Offer,
    ) -> crate::Result<()> {
        if let Some(jobs) = self.handed_out.get_mut(submitter) {
            jobs.retain(|j| j.id != job.id);
        }
        self.grants.push(Grant {
            submitter: submitter.to_string(),
            job: job.id.clone(),
            offer: offer.name.clone(),
        });
        Ok(())
    }

    fn end_negotiation(&mut self, submitter: &str) -> crate::Result<()> {
        let returned = self.handed_out.remove(submitter).unwrap_or_default();
        let queue = self.queues.entry(submitter.to_string()).or_default();
        for job in returned.into_iter().rev() {
            queue.push_front(job);
        }
        self.ended_sessions.push(submitter.to_string());
        Ok(())
    }

    fn notify_match(&mut self, offer: &Offer, _submitter: &str, _job: &JobRequest) {
        self.notified.push(offer.name.clone());
    }
}

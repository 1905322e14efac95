use std::collections::VecDeque;

use itertools::Itertools;
use matchmaker::negotiation::{NegotiatorComm, SessionReply};
use matchmaker::records::{JobRequest, Offer, Snapshot};
use matchmaker::{Map, Set};

use crate::server::inventory::{MatchRecord, PoolDir};

#[derive(Default)]
struct Session {
    queue: VecDeque<JobRequest>,
    handed_out: Vec<JobRequest>,
}

/// Talks to the pool directory on behalf of the negotiator.
///
/// Each submitter's request file is read once per cycle. Requests that
/// already appear in the match log are never handed out again.
pub struct LocalComm {
    pool: PoolDir,
    sessions: Map<String, Session>,
    /// `(submitter, job id)` pairs already granted.
    granted: Set<(String, String)>,
    grants_in_cycle: u32,
    rejections_in_cycle: u32,
}

impl LocalComm {
    pub fn new(pool: PoolDir) -> crate::Result<Self> {
        let granted: Set<(String, String)> = pool
            .read_matches()?
            .into_iter()
            .map(|record| (record.submitter, record.job))
            .collect();
        if !granted.is_empty() {
            log::info!(
                "{} requests of {} submitters were already granted",
                granted.len(),
                granted.iter().map(|(submitter, _)| submitter).unique().count()
            );
        }
        Ok(LocalComm {
            pool,
            sessions: Default::default(),
            granted,
            grants_in_cycle: 0,
            rejections_in_cycle: 0,
        })
    }

    pub fn pool(&self) -> &PoolDir {
        &self.pool
    }

    pub fn grants_in_cycle(&self) -> u32 {
        self.grants_in_cycle
    }

    pub fn rejections_in_cycle(&self) -> u32 {
        self.rejections_in_cycle
    }

    fn session(&mut self, submitter: &str) -> matchmaker::Result<&mut Session> {
        if !self.sessions.contains_key(submitter) {
            let queue: VecDeque<JobRequest> = self
                .pool
                .load_jobs(submitter)?
                .into_iter()
                .filter(|job| {
                    !self
                        .granted
                        .contains(&(submitter.to_string(), job.id.clone()))
                })
                .collect();
            log::debug!("{submitter} has {} pending requests", queue.len());
            self.sessions.insert(
                submitter.to_string(),
                Session {
                    queue,
                    handed_out: Vec::new(),
                },
            );
        }
        self.sessions
            .get_mut(submitter)
            .ok_or_else(|| matchmaker::Error::Session(format!("No session with {submitter}")))
    }
}

impl NegotiatorComm for LocalComm {
    fn fetch_snapshot(&mut self) -> matchmaker::Result<Snapshot> {
        self.sessions.clear();
        self.grants_in_cycle = 0;
        self.rejections_in_cycle = 0;
        self.pool.load_snapshot()
    }

    fn request_next_job(&mut self, submitter: &str) -> matchmaker::Result<SessionReply> {
        let session = self.session(submitter)?;
        match session.queue.pop_front() {
            Some(job) => {
                session.handed_out.push(job.clone());
                Ok(SessionReply::Job(job))
            }
            None => Ok(SessionReply::NoMoreJobs),
        }
    }

    fn reject(&mut self, submitter: &str, job: &JobRequest, reason: &str) -> matchmaker::Result<()> {
        log::debug!("Request {} of {submitter} rejected: {reason}", job.id);
        self.rejections_in_cycle += 1;
        Ok(())
    }

    fn permission_granted(
        &mut self,
        submitter: &str,
        job: &JobRequest,
        offer: &Offer,
    ) -> matchmaker::Result<()> {
        let record = MatchRecord {
            time: chrono::Utc::now(),
            submitter: submitter.to_string(),
            job: job.id.clone(),
            offer: offer.name.clone(),
            claim_token: offer.claim_token().to_string(),
            preempted: offer.remote_user().map(|user| user.to_string()),
        };
        self.pool
            .append_matches(&[record])
            .map_err(|error| matchmaker::Error::Session(format!("Cannot record match: {error}")))?;
        if let Some(session) = self.sessions.get_mut(submitter) {
            session.handed_out.retain(|j| j.id != job.id);
        }
        self.granted.insert((submitter.to_string(), job.id.clone()));
        self.grants_in_cycle += 1;
        Ok(())
    }

    fn end_negotiation(&mut self, submitter: &str) -> matchmaker::Result<()> {
        if let Some(session) = self.sessions.get_mut(submitter) {
            for job in session.handed_out.drain(..).rev() {
                session.queue.push_front(job);
            }
        }
        Ok(())
    }

    fn notify_match(&mut self, offer: &Offer, submitter: &str, job: &JobRequest) {
        log::debug!("Offer {} matched with {} of {submitter}", offer.name, job.id);
    }
}

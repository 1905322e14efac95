use crate::internal::records::{JobRequest, Offer, Snapshot};

/// Answer of a submitter asked for its next pending request.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionReply {
    Job(JobRequest),
    NoMoreJobs,
}

/// Everything the negotiator needs from the outside world.
///
/// A session with a submitter starts implicitly with the first
/// [`NegotiatorComm::request_next_job`] and ends with
/// [`NegotiatorComm::end_negotiation`]. Requests that were handed out but
/// neither granted nor rejected when the session ends stay pending, and so do
/// rejected requests: they are offered again in the next session.
pub trait NegotiatorComm {
    fn fetch_snapshot(&mut self) -> crate::Result<Snapshot>;

    fn request_next_job(&mut self, submitter: &str) -> crate::Result<SessionReply>;

    fn reject(&mut self, submitter: &str, job: &JobRequest, reason: &str) -> crate::Result<()>;

    fn permission_granted(
        &mut self,
        submitter: &str,
        job: &JobRequest,
        offer: &Offer,
    ) -> crate::Result<()>;

    fn end_negotiation(&mut self, submitter: &str) -> crate::Result<()>;

    /// Tells the resource that it was matched. Best effort.
    fn notify_match(&mut self, offer: &Offer, submitter: &str, job: &JobRequest);
}

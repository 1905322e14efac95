use crate::internal::matching::engine::Candidate;
use crate::internal::matching::rejection::RejectionCounts;

/// Requests with the same key see the same ordered list of candidates.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheKey {
    pub autocluster: i64,
    pub submitter: String,
    pub priority: f64,
    pub only_consider_startd_rank: bool,
}

/// Sorted candidates of the last scanned request shape.
///
/// Lives for one negotiation session; consumers of the cache call
/// [`MatchListCache::invalidate`] whenever the pool changes in a way that the
/// stored list does not reflect.
#[derive(Debug, Default)]
pub struct MatchListCache {
    key: Option<CacheKey>,
    candidates: Vec<Candidate>,
    rejections: RejectionCounts,
    hits: u32,
    misses: u32,
}

impl MatchListCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(&mut self) {
        self.key = None;
        self.candidates.clear();
        self.rejections = RejectionCounts::default();
    }

    pub(crate) fn lookup(&mut self, key: &CacheKey) -> Option<(&mut Vec<Candidate>, RejectionCounts)> {
        if self.key.as_ref() == Some(key) {
            self.hits += 1;
            Some((&mut self.candidates, self.rejections))
        } else {
            self.misses += 1;
            None
        }
    }

    pub(crate) fn store(
        &mut self,
        key: CacheKey,
        candidates: Vec<Candidate>,
        rejections: RejectionCounts,
    ) -> &mut Vec<Candidate> {
        self.key = Some(key);
        self.candidates = candidates;
        self.rejections = rejections;
        &mut self.candidates
    }

    pub fn is_valid_for(&self, key: &CacheKey) -> bool {
        self.key.as_ref() == Some(key)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn hits(&self) -> u32 {
        self.hits
    }

    pub fn misses(&self) -> u32 {
        self.misses
    }
}

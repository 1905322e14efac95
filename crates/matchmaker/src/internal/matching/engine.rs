use crate::internal::common::ids::OfferId;
use crate::internal::ledger::{LimitRequest, UsageLedger, parse_limits};
use crate::internal::matching::cache::{CacheKey, MatchListCache};
use crate::internal::matching::evaluator::{EvalContext, EvalValue, Evaluator, Expression};
use crate::internal::matching::pool::OfferPool;
use crate::internal::matching::rejection::RejectionCounts;
use crate::internal::records::{JobRequest, Offer};
use std::cmp::Ordering;

/// How a match relates to an existing claim on the offer.
/// Ordered from the least to the most preferred state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreemptState {
    PriorityPreemption,
    RankPreemption,
    NoPreemption,
}

impl PreemptState {
    pub fn is_preempting(&self) -> bool {
        !matches!(self, PreemptState::NoPreemption)
    }
}

/// Sort key of a candidate; every field is "higher is better".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchScore {
    pub pre_job_rank: f64,
    pub job_rank: f64,
    pub post_job_rank: f64,
    pub preempt_state: PreemptState,
    pub preempt_rank: f64,
}

impl MatchScore {
    pub fn compare(&self, other: &MatchScore) -> Ordering {
        self.pre_job_rank
            .total_cmp(&other.pre_job_rank)
            .then(self.job_rank.total_cmp(&other.job_rank))
            .then(self.post_job_rank.total_cmp(&other.post_job_rank))
            .then(self.preempt_state.cmp(&other.preempt_state))
            .then(self.preempt_rank.total_cmp(&other.preempt_rank))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub offer: OfferId,
    pub preempt_state: PreemptState,
    pub score: MatchScore,
}

/// What a submitter has spent so far in the current pie spin.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpendState {
    pub limit_used: f64,
    pub limit: f64,
    pub limit_used_unclaimed: f64,
    pub limit_unclaimed: f64,
    pub pie_left: f64,
    pub ignore_submitter_limit: bool,
    pub only_consider_startd_rank: bool,
}

pub struct MatchRequest<'a> {
    pub request: &'a JobRequest,
    pub submitter: &'a str,
    pub submitter_priority: f64,
    pub spend: SpendState,
}

#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub best: Option<Candidate>,
    pub rejections: RejectionCounts,
    /// Name of the last concurrency limit that rejected a candidate.
    pub rejected_limit: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchConfig {
    pub consider_preemption: bool,
    /// How much worse the claimant's priority has to be before its claim
    /// may be preempted on priority grounds.
    pub preemption_priority_delta: f64,
    /// Charge matches by slot weight instead of one per match.
    pub use_slot_weights: bool,
}

impl MatchConfig {
    /// What a match with an offer of `slot_weight` counts against limits.
    pub fn match_cost(&self, slot_weight: f64) -> f64 {
        if self.use_slot_weights {
            slot_weight
        } else {
            1.0
        }
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        MatchConfig {
            consider_preemption: true,
            preemption_priority_delta: 0.0,
            use_slot_weights: true,
        }
    }
}

/// Admits a match of `cost` when it fits into the limit. A submitter that
/// has not received anything yet may round up once, as long as the pie has
/// (almost) enough left for the offer.
pub fn submitter_limit_permits(used: f64, allowed: f64, pie_left: f64, cost: f64) -> bool {
    if used + cost <= allowed {
        return true;
    }
    used <= 0.0 && pie_left >= 0.99 * cost
}

pub struct MatchEngine<'a> {
    evaluator: &'a dyn Evaluator,
    ledger: &'a UsageLedger,
    config: MatchConfig,
}

impl<'a> MatchEngine<'a> {
    pub fn new(evaluator: &'a dyn Evaluator, ledger: &'a UsageLedger, config: MatchConfig) -> Self {
        MatchEngine {
            evaluator,
            ledger,
            config,
        }
    }

    /// Selects the best admissible offer for the request.
    ///
    /// With a cache, requests sharing the same autocluster, submitter,
    /// priority and mode reuse the sorted candidates of the previous scan,
    /// unless the preemption expressions are unstable.
    pub fn find_best_match(
        &self,
        pool: &OfferPool,
        request: &MatchRequest<'_>,
        cache: Option<&mut MatchListCache>,
    ) -> crate::Result<MatchOutcome> {
        let limits = match &request.request.concurrency_limits {
            Some(spec) => parse_limits(spec)?,
            None => LimitRequest::new(),
        };
        let key = self.cache_key(request);
        match (cache, key) {
            (Some(cache), Some(key)) => {
                if let Some((candidates, rejections)) = cache.lookup(&key) {
                    log::trace!("Match list cache hit for {}", request.submitter);
                    return Ok(self.select(pool, candidates, rejections, &limits, request));
                }
                let (candidates, rejections) = self.scan(pool, request);
                let candidates = cache.store(key, candidates, rejections);
                Ok(self.select(pool, candidates, rejections, &limits, request))
            }
            (cache, None) => {
                if let Some(cache) = cache {
                    cache.invalidate();
                }
                let (mut candidates, rejections) = self.scan(pool, request);
                Ok(self.select(pool, &mut candidates, rejections, &limits, request))
            }
            (None, Some(_)) => {
                let (mut candidates, rejections) = self.scan(pool, request);
                Ok(self.select(pool, &mut candidates, rejections, &limits, request))
            }
        }
    }

    fn cache_key(&self, request: &MatchRequest<'_>) -> Option<CacheKey> {
        if self.evaluator.is_unstable(Expression::PreemptionRequirements)
            || self.evaluator.is_unstable(Expression::PreemptionRank)
        {
            return None;
        }
        request.request.autocluster.map(|autocluster| CacheKey {
            autocluster,
            submitter: request.submitter.to_string(),
            priority: request.submitter_priority,
            only_consider_startd_rank: request.spend.only_consider_startd_rank,
        })
    }

    /// Evaluates every offer in the pool and returns the admissible ones,
    /// best first. Limits that change during negotiation are not checked.
    fn scan(&self, pool: &OfferPool, request: &MatchRequest<'_>) -> (Vec<Candidate>, RejectionCounts) {
        let mut rejections = RejectionCounts::default();
        let mut candidates = Vec::new();
        for (id, offer) in pool.iter() {
            let context = EvalContext {
                request: request.request,
                offer,
                submitter: request.submitter,
                submitter_priority: request.submitter_priority,
                remote_user_priority: offer.remote_user().map(|user| self.ledger.priority(user)),
            };
            let Some(preempt_state) = self.classify(&context, request, &mut rejections) else {
                continue;
            };
            candidates.push(Candidate {
                offer: id,
                preempt_state,
                score: self.score(&context, preempt_state),
            });
        }
        candidates.sort_by(|a, b| b.score.compare(&a.score));
        (candidates, rejections)
    }

    fn classify(
        &self,
        context: &EvalContext<'_>,
        request: &MatchRequest<'_>,
        rejections: &mut RejectionCounts,
    ) -> Option<PreemptState> {
        match self.evaluator.evaluate(Expression::Requirements, context) {
            Ok(value) if value.is_true() => {}
            Ok(_) => {
                rejections.unmatched += 1;
                return None;
            }
            Err(error) => {
                log::debug!(
                    "Cannot evaluate requirements of {} against {}: {error}",
                    context.request.id,
                    context.offer.name
                );
                rejections.evaluation_errors += 1;
                return None;
            }
        }

        let offer = context.offer;
        let Some(claim) = &offer.claim else {
            if request.spend.only_consider_startd_rank {
                return None;
            }
            return Some(PreemptState::NoPreemption);
        };
        if !self.config.consider_preemption {
            return None;
        }
        let new_rank = self.number(Expression::StartdRank, context, 0.0);
        if new_rank > claim.current_rank {
            return Some(PreemptState::RankPreemption);
        }
        if request.spend.only_consider_startd_rank {
            rejections.preemption_rank += 1;
            return None;
        }
        if claim.remote_user == request.submitter {
            return None;
        }

        let remote_priority = context.remote_user_priority.unwrap_or(f64::MAX);
        if remote_priority <= request.submitter_priority
            || remote_priority - request.submitter_priority < self.config.preemption_priority_delta
        {
            rejections.preemption_priority += 1;
            return None;
        }
        if self.evaluator.is_defined(Expression::PreemptionRequirements) {
            match self
                .evaluator
                .evaluate(Expression::PreemptionRequirements, context)
            {
                Ok(value) if value.is_true() => {}
                Ok(_) => {
                    rejections.preemption_policy += 1;
                    return None;
                }
                Err(error) => {
                    log::debug!("Cannot evaluate preemption requirements: {error}");
                    rejections.preemption_policy += 1;
                    return None;
                }
            }
        }
        if new_rank < claim.current_rank {
            rejections.preemption_rank += 1;
            return None;
        }
        Some(PreemptState::PriorityPreemption)
    }

    fn score(&self, context: &EvalContext<'_>, preempt_state: PreemptState) -> MatchScore {
        let optional = |expression| {
            if self.evaluator.is_defined(expression) {
                self.number(expression, context, -f64::MAX)
            } else {
                -f64::MAX
            }
        };
        MatchScore {
            pre_job_rank: optional(Expression::PreJobRank),
            job_rank: self.number(Expression::JobRank, context, 0.0),
            post_job_rank: optional(Expression::PostJobRank),
            preempt_state,
            preempt_rank: if preempt_state.is_preempting() {
                optional(Expression::PreemptionRank)
            } else {
                -f64::MAX
            },
        }
    }

    fn number(&self, expression: Expression, context: &EvalContext<'_>, default: f64) -> f64 {
        match self.evaluator.evaluate(expression, context) {
            Ok(EvalValue::Undefined) => default,
            Ok(value) => value.as_number().unwrap_or(default),
            Err(error) => {
                log::debug!("Cannot evaluate {expression:?}: {error}");
                -f64::MAX
            }
        }
    }

    /// Takes the first candidate that still passes the submitter and
    /// concurrency limits. Offers that left the pool are dropped.
    fn select(
        &self,
        pool: &OfferPool,
        candidates: &mut Vec<Candidate>,
        rejections: RejectionCounts,
        limits: &LimitRequest,
        request: &MatchRequest<'_>,
    ) -> MatchOutcome {
        let mut outcome = MatchOutcome {
            best: None,
            rejections,
            rejected_limit: None,
        };
        candidates.retain(|c| pool.contains(c.offer));
        let spend = &request.spend;
        let mut chosen = None;
        for (index, candidate) in candidates.iter().enumerate() {
            let Some(offer) = pool.get(candidate.offer) else {
                continue;
            };
            let cost = self.config.match_cost(offer.slot_weight);
            let permitted = match candidate.preempt_state {
                PreemptState::PriorityPreemption => {
                    spend.ignore_submitter_limit
                        || submitter_limit_permits(spend.limit_used, spend.limit, spend.pie_left, cost)
                }
                PreemptState::NoPreemption => submitter_limit_permits(
                    spend.limit_used_unclaimed,
                    spend.limit_unclaimed,
                    spend.pie_left,
                    cost,
                ),
                PreemptState::RankPreemption => true,
            };
            if !permitted {
                outcome.rejections.submitter_limit += 1;
                continue;
            }
            if !limits.is_empty() {
                let released = if candidate.preempt_state.is_preempting() {
                    released_limits(offer)
                } else {
                    None
                };
                if let Some(name) = self.ledger.limits().exceeded_by(limits, released.as_ref()) {
                    outcome.rejections.concurrency_limit += 1;
                    outcome.rejected_limit = Some(name.to_string());
                    continue;
                }
            }
            chosen = Some(index);
            break;
        }
        outcome.best = chosen.map(|index| candidates.remove(index));
        outcome
    }
}

fn released_limits(offer: &Offer) -> Option<LimitRequest> {
    let spec = offer.claim.as_ref()?.concurrency_limits.as_ref()?;
    parse_limits(spec).ok()
}

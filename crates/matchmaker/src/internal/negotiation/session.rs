use crate::internal::matching::{MatchEngine, MatchListCache, MatchRequest, SpendState};
use crate::internal::negotiation::comm::SessionReply;
use crate::internal::negotiation::context::CycleContext;
use crate::internal::records::JobRequest;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionOutcome {
    /// The submitter has nothing more to match in this cycle.
    Done,
    /// Stopped by a limit or a deadline; continue in the next spin.
    Resume,
    /// The session broke; the submitter is skipped for the rest of the cycle.
    Failed,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionLimits {
    pub priority: f64,
    pub limit: f64,
    pub limit_unclaimed: f64,
    /// Capacity left under the submitter's ceiling.
    pub ceiling_left: f64,
    pub ignore_submitter_limit: bool,
    pub deadline: Instant,
}

/// Matches requests of one submitter until it runs out of requests, limit
/// or time. Matched costs are subtracted from `pie_left`.
///
/// Errors are returned only for failures of the ledger; session failures
/// end with [`SessionOutcome::Failed`].
pub(crate) fn negotiate(
    ctx: &mut CycleContext<'_>,
    submitter: &str,
    limits: &SessionLimits,
    pie_left: &mut f64,
) -> crate::Result<SessionOutcome> {
    let mut cache = ctx.config.match_list_cache.then(MatchListCache::new);
    let mut limit_used = 0.0;
    let mut limit_used_unclaimed = 0.0;
    let mut limited_by_submitter_limit = false;
    let mut announced_overlimit = false;
    let start = Instant::now();

    let outcome = loop {
        if Instant::now() >= limits.deadline {
            log::info!(
                "Reached deadline for {submitter} after {:?}, stopping",
                start.elapsed()
            );
            ctx.record
                .out_of_time_submitters
                .insert(submitter.to_string());
            break SessionOutcome::Resume;
        }
        let only_consider_startd_rank = if limit_used >= limits.limit {
            if !limits.ignore_submitter_limit {
                log::debug!("Reached submitter limit of {submitter}: {limit_used}, stopping");
                break SessionOutcome::Resume;
            }
            if !announced_overlimit {
                announced_overlimit = true;
                log::debug!(
                    "{submitter} is over its limit ({}, used {limit_used}), only considering startd rank",
                    limits.limit
                );
            }
            true
        } else {
            false
        };
        if limit_used >= limits.ceiling_left {
            log::info!("{submitter} hit its ceiling ({limit_used} new this cycle), stopping");
            break SessionOutcome::Resume;
        }

        let job = match ctx.comm.request_next_job(submitter) {
            Ok(SessionReply::Job(job)) => job,
            Ok(SessionReply::NoMoreJobs) => {
                if limit_used >= limits.limit || limited_by_submitter_limit {
                    break SessionOutcome::Resume;
                }
                break SessionOutcome::Done;
            }
            Err(error) => {
                log::error!("Session with {submitter} failed: {error}");
                return Ok(SessionOutcome::Failed);
            }
        };
        ctx.record.jobs_considered += 1;

        let spend = SpendState {
            limit_used,
            limit: limits.limit,
            limit_used_unclaimed,
            limit_unclaimed: limits.limit_unclaimed,
            pie_left: *pie_left,
            ignore_submitter_limit: limits.ignore_submitter_limit,
            only_consider_startd_rank,
        };
        let request = MatchRequest {
            request: &job,
            submitter,
            submitter_priority: limits.priority,
            spend,
        };
        let result = MatchEngine::new(ctx.evaluator, ctx.ledger, ctx.match_config()).find_best_match(
            ctx.pool,
            &request,
            cache.as_mut(),
        );
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => {
                log::warn!("Skipping request {} of {submitter}: {error}", job.id);
                ctx.record.rejections.evaluation_errors += 1;
                if let Err(error) = ctx.comm.reject(submitter, &job, "no match found") {
                    log::error!("Cannot send rejection to {submitter}: {error}");
                    return Ok(SessionOutcome::Failed);
                }
                continue;
            }
        };

        let Some(candidate) = outcome.best else {
            ctx.record.rejections += outcome.rejections;
            if outcome.rejections.submitter_limit > 0 {
                limited_by_submitter_limit = true;
                ctx.record
                    .limited_submitters
                    .insert(submitter.to_string());
            }
            let reason = outcome.rejections.reason(
                outcome.rejected_limit.as_deref(),
                limits.ignore_submitter_limit,
            );
            log::info!("Rejected {} of {submitter}: {reason}", job.id);
            if let Err(error) = ctx.comm.reject(submitter, &job, &reason) {
                log::error!("Cannot send rejection to {submitter}: {error}");
                return Ok(SessionOutcome::Failed);
            }
            if outcome.rejections.submitter_limit > 0
                && !ctx.config.consider_preemption
                && !ctx.config.use_slot_weights
            {
                log::debug!("{submitter} hit its submitter limit, done negotiating");
                break SessionOutcome::Resume;
            }
            continue;
        };

        let Some(offer) = ctx.pool.get(candidate.offer).cloned() else {
            continue;
        };
        if let Some(claim) = &offer.claim {
            log::info!(
                "Preempting {} (user prio={:.2}, rank={:.2}) on {} for {submitter} (user prio={:.2})",
                claim.remote_user,
                ctx.ledger.priority(&claim.remote_user),
                claim.current_rank,
                offer.name,
                limits.priority
            );
        }
        if let Err(error) = ctx.comm.permission_granted(submitter, &job, &offer) {
            log::error!("Cannot send match of {} to {submitter}: {error}", job.id);
            return Ok(SessionOutcome::Failed);
        }
        ctx.comm.notify_match(&offer, submitter, &job);
        ctx.pool.remove(candidate.offer);

        let cost = ctx.match_cost(offer.slot_weight);
        commit_match(ctx, submitter, &job, &offer.name, cost)?;
        limit_used += cost;
        if offer.is_claimed() {
            ctx.record.preemptions += 1;
        } else {
            limit_used_unclaimed += cost;
        }
        *pie_left -= cost;
        ctx.record.matches += 1;
        log::info!(
            "Matched {} of {submitter} with {}{}",
            job.id,
            offer.name,
            if offer.is_claimed() { " (preempting)" } else { "" }
        );
    };

    if let Err(error) = ctx.comm.end_negotiation(submitter) {
        log::error!("Cannot end session with {submitter}: {error}");
        return Ok(SessionOutcome::Failed);
    }
    Ok(outcome)
}

fn commit_match(
    ctx: &mut CycleContext<'_>,
    submitter: &str,
    job: &JobRequest,
    resource: &str,
    cost: f64,
) -> crate::Result<()> {
    let result = ctx.ledger.add_match(
        submitter,
        resource,
        cost,
        job.concurrency_limits.as_deref(),
        ctx.now,
    );
    match result {
        Err(error) if error.is_recoverable() => {
            log::warn!("Match of {} is not accounted: {error}", job.id);
            Ok(())
        }
        result => result,
    }
}

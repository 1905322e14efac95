use crate::Set;
use crate::internal::ledger::UsageLedger;
use crate::internal::negotiation::context::CycleContext;
use crate::internal::negotiation::session::{SessionLimits, SessionOutcome, negotiate};
use crate::internal::negotiation::sort::{SubmitterEntry, sort_submitters, starvation_ratio};
use std::time::Instant;

/// Group whose quota caps the pie; `None` negotiates without a group quota.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PieGroup<'a> {
    pub name: Option<&'a str>,
    pub quota: f64,
}

impl<'a> PieGroup<'a> {
    pub fn unlimited() -> Self {
        PieGroup {
            name: None,
            quota: f64::MAX,
        }
    }

    pub fn new(name: &'a str, quota: f64) -> Self {
        PieGroup {
            name: Some(name),
            quota,
        }
    }

    fn usage(&self, ledger: &UsageLedger) -> f64 {
        self.name
            .map_or(0.0, |name| ledger.weighted_resources_used(name))
    }

    fn quota_reached(&self, ledger: &UsageLedger) -> bool {
        self.name.is_some() && self.usage(ledger) >= self.quota
    }
}

struct Normalization {
    max_priority: f64,
    factor: f64,
}

impl Normalization {
    fn compute(entries: &[SubmitterEntry]) -> Self {
        let max_priority = entries
            .iter()
            .map(|e| e.priority)
            .fold(f64::MIN_POSITIVE, f64::max);
        let mut seen = Set::default();
        let factor = entries
            .iter()
            .filter(|e| seen.insert(e.name()))
            .map(|e| max_priority / e.priority)
            .sum();
        Normalization {
            max_priority,
            factor,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct SubmitterLimit {
    limit: f64,
    limit_unclaimed: f64,
    usage: f64,
}

fn submitter_limit(
    ctx: &CycleContext<'_>,
    entry: &SubmitterEntry,
    normalization: &Normalization,
    slot_total: f64,
    group: PieGroup<'_>,
    group_usage: f64,
    floor_round: bool,
) -> SubmitterLimit {
    let usage = ctx.ledger.weighted_resources_used(entry.name());
    let share = normalization.max_priority / (entry.priority * normalization.factor);
    let limit = (share * slot_total - usage).max(0.0);
    let mut limit_unclaimed = limit;
    if group.name.is_some() {
        let max_allowed = (group.quota - group_usage).max(0.0);
        limit_unclaimed = limit_unclaimed.min(max_allowed);
    }
    let mut limit = if ctx.config.consider_preemption {
        limit
    } else {
        limit_unclaimed
    };
    if floor_round {
        let floor = ctx.ledger.floor(entry.name());
        limit = limit.min((floor - usage).max(0.0));
    }
    SubmitterLimit {
        limit,
        limit_unclaimed,
        usage,
    }
}

/// Runs the spins of the pie for the submitters of one group.
///
/// Submitters that finished (or failed) are removed from `entries`; those
/// that were only stopped by limits stay for a later round.
pub(crate) fn negotiate_with_group(
    ctx: &mut CycleContext<'_>,
    entries: &mut Vec<SubmitterEntry>,
    group: PieGroup<'_>,
    floor_round: bool,
) -> crate::Result<()> {
    ctx.record.pies += 1;
    let group_label = group.name.unwrap_or("<all>");
    let mut spin = 0;
    loop {
        spin += 1;
        ctx.record.pie_spins += 1;
        let ignore_submitter_limit = spin == 1 && ctx.config.consider_preemption;
        if !ignore_submitter_limit && group.quota_reached(ctx.ledger) {
            log::info!(
                "Group {group_label} is using its quota {}, halting negotiation",
                group.quota
            );
            break;
        }

        entries.retain(|entry| {
            if entry.ad.idle_jobs == 0 {
                log::debug!("Skipping {}: no idle jobs", entry.name());
                return false;
            }
            !ctx.is_failed(entry.name())
        });
        if entries.is_empty() {
            break;
        }

        let group_usage = group.usage(ctx.ledger);
        let normalization = Normalization::compute(entries);
        let slot_total = ctx.pool_weight.min(group.quota);
        let mut pie_left = 0.0;
        for index in 0..entries.len() {
            let limit = submitter_limit(
                ctx,
                &entries[index],
                &normalization,
                slot_total,
                group,
                group_usage,
                false,
            );
            pie_left += limit.limit;
            entries[index].starvation = starvation_ratio(limit.usage, limit.usage + limit.limit);
        }
        if !ctx.config.consider_preemption && pie_left <= 0.0 {
            log::info!("Halting negotiation of {group_label}: no slots available to match");
            break;
        }
        if spin == 1 {
            sort_submitters(entries, ctx.config.use_job_priority_in_sort);
        }

        log::debug!(
            "Pie spin {spin} of {group_label}: slot total {slot_total}, pie left {pie_left}, {} submitters",
            entries.len()
        );
        let pie_left_orig = pie_left;
        let count_orig = entries.len();

        let mut index = 0;
        while index < entries.len() {
            if !ignore_submitter_limit && group.quota_reached(ctx.ledger) {
                break;
            }
            let outcome = negotiate_entry(
                ctx,
                &entries[index],
                &normalization,
                slot_total,
                group,
                group_usage,
                floor_round,
                spin,
                ignore_submitter_limit,
                &mut pie_left,
            )?;
            match outcome {
                SessionOutcome::Resume => index += 1,
                SessionOutcome::Done => {
                    log::debug!("{} got all it wants; removing it", entries[index].name());
                    entries.remove(index);
                }
                SessionOutcome::Failed => {
                    let entry = entries.remove(index);
                    log::warn!("Ignoring {} for the rest of this cycle", entry.name());
                    ctx.record
                        .failed_submitters
                        .insert(entry.name().to_string());
                }
            }
        }

        let progressed = pie_left < pie_left_orig || entries.len() < count_orig;
        if !progressed
            || entries.is_empty()
            || ctx.pool.is_empty()
            || floor_round
            || spin >= ctx.config.max_pie_spins
        {
            break;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn negotiate_entry(
    ctx: &mut CycleContext<'_>,
    entry: &SubmitterEntry,
    normalization: &Normalization,
    slot_total: f64,
    group: PieGroup<'_>,
    group_usage: f64,
    floor_round: bool,
    spin: u32,
    ignore_submitter_limit: bool,
    pie_left: &mut f64,
) -> crate::Result<SessionOutcome> {
    let name = entry.name().to_string();
    let computed = submitter_limit(
        ctx,
        entry,
        normalization,
        slot_total,
        group,
        group_usage,
        floor_round,
    );
    let mut limit = computed.limit;
    if limit > *pie_left {
        log::debug!("{name} is starved by {}", limit - *pie_left);
        limit = *pie_left;
    }
    let ceiling_left = ctx
        .ledger
        .ceiling(&name)
        .map_or(f64::MAX, |ceiling| (ceiling - computed.usage).max(0.0));

    let time_spent = ctx.time_spent(&name);
    let remaining_submitter = ctx.config.max_time_per_submitter.saturating_sub(time_spent);
    let remaining_cycle = ctx.remaining_cycle_time();
    if remaining_submitter.is_zero() {
        log::info!("Negotiation with {name} skipped: {time_spent:?} spent on this submitter");
        ctx.record.out_of_time_submitters.insert(name);
        return Ok(SessionOutcome::Done);
    }
    if remaining_cycle.is_zero() {
        log::info!("Negotiation with {name} skipped: maximal cycle time exceeded");
        return Ok(SessionOutcome::Done);
    }
    if spin > 1 && (limit < ctx.min_slot_weight || *pie_left < ctx.min_slot_weight) {
        log::debug!("Negotiation with {name} skipped: pie left is below the smallest slot");
        return Ok(SessionOutcome::Resume);
    }
    if ceiling_left <= 0.0 || ceiling_left < ctx.min_slot_weight {
        log::info!("Negotiation with {name} skipped: ceiling remaining is {ceiling_left}");
        return Ok(SessionOutcome::Done);
    }

    log::debug!(
        "Negotiating with {name}: priority {}, limit {limit}, usage {}, ceiling left {ceiling_left}",
        entry.priority,
        computed.usage
    );
    let start = Instant::now();
    let budget = ctx
        .config
        .max_time_per_spin
        .min(remaining_cycle)
        .min(remaining_submitter);
    let limits = SessionLimits {
        priority: entry.priority,
        limit,
        limit_unclaimed: computed.limit_unclaimed,
        ceiling_left,
        ignore_submitter_limit,
        deadline: start + budget,
    };
    ctx.record.active_submitters.insert(name.clone());
    let outcome = negotiate(ctx, &name, &limits, pie_left)?;
    *ctx.time_spent.entry(name).or_default() += start.elapsed();
    Ok(outcome)
}

use crate::internal::common::ids::GroupId;
use crate::internal::common::utils::QUOTA_EPSILON;
use crate::internal::ledger::UsageLedger;
use crate::internal::negotiation::context::CycleContext;
use crate::internal::negotiation::pie::{PieGroup, negotiate_with_group};
use crate::internal::negotiation::sort::{SubmitterEntry, starvation_ratio};
use crate::internal::quota::{
    QuotaPhase, QuotaTree, assign_quotas, check_conservation, fairshare, recover_remainders,
    round_robin,
};

/// Submitters split by the group they negotiate in, indexed by group id.
pub(crate) struct GroupBuckets {
    buckets: Vec<Vec<SubmitterEntry>>,
}

impl GroupBuckets {
    pub fn build(tree: &QuotaTree, ledger: &UsageLedger, entries: Vec<SubmitterEntry>) -> Self {
        let mut buckets: Vec<Vec<SubmitterEntry>> = vec![Vec::new(); tree.len()];
        for entry in entries {
            let group = ledger.groups().resolve(entry.name());
            let id = tree.find(&group).unwrap_or_else(|| tree.root());
            buckets[id.index()].push(entry);
        }
        GroupBuckets { buckets }
    }

    pub fn get_mut(&mut self, id: GroupId) -> &mut Vec<SubmitterEntry> {
        &mut self.buckets[id.index()]
    }

    pub fn is_empty(&self, id: GroupId) -> bool {
        self.buckets[id.index()].is_empty()
    }

    pub fn take(&mut self, id: GroupId) -> Vec<SubmitterEntry> {
        std::mem::take(&mut self.buckets[id.index()])
    }

    /// Running plus idle demand of the submitters in the group.
    pub fn demand(&self, id: GroupId, use_slot_weights: bool) -> f64 {
        self.buckets[id.index()]
            .iter()
            .map(|e| e.ad.idle_demand(use_slot_weights) + e.ad.running_demand(use_slot_weights))
            .sum()
    }
}

/// Loads current usage and demand into the tree and assigns quotas out of
/// `total`.
pub(crate) fn prepare_quotas(
    tree: &mut QuotaTree,
    buckets: &GroupBuckets,
    ledger: &UsageLedger,
    total: f64,
    use_slot_weights: bool,
) {
    tree.reset();
    for id in tree.ids() {
        let usage = ledger.weighted_resources_used(tree[id].name());
        tree.set_usage(id, usage, buckets.demand(id, use_slot_weights));
    }
    tree.update_subtree_usage();
    tree.set_phase(QuotaPhase::AssignQuotas);
    let root = tree.root();
    assign_quotas(tree, root, total);
    log::debug!("Assigned group quotas from {total} available slots");
}

/// One allocation round; returns the surplus nobody could use.
fn allocate(tree: &mut QuotaTree, initial: f64, round_robin_remainders: bool, now: f64) -> f64 {
    let root = tree.root();
    tree.start_round();
    let mut surplus = fairshare(tree, root);
    if round_robin_remainders {
        tree.set_phase(QuotaPhase::RecoverRemainders);
        surplus += recover_remainders(tree, root);
        surplus = round_robin(tree, root, surplus, now);
    }
    let surplus = check_conservation(tree, initial, surplus);
    tree.set_phase(QuotaPhase::Done);
    surplus
}

/// Groups that get to negotiate, most starved first. With autoregroup the
/// root always comes last.
fn negotiation_order(
    tree: &QuotaTree,
    buckets: &GroupBuckets,
    autoregroup: bool,
    first_round: bool,
) -> Vec<GroupId> {
    let root = tree.root();
    let mut order: Vec<(bool, f64, GroupId)> = tree
        .ids()
        .filter(|id| !buckets.is_empty(*id))
        .filter(|id| {
            let node = &tree[*id];
            node.allocated() > 0.0
                && (first_round || node.allocated() > node.usage() + QUOTA_EPSILON)
        })
        .map(|id| {
            let node = &tree[id];
            (
                autoregroup && id == root,
                starvation_ratio(node.usage(), node.allocated()),
                id,
            )
        })
        .collect();
    order.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then(a.1.total_cmp(&b.1))
            .then(a.2.cmp(&b.2))
    });
    order.into_iter().map(|(_, _, id)| id).collect()
}

/// Floor round for the submitters below their floor, followed by the
/// ordinary spins of the pie.
pub(crate) fn negotiate_group(
    ctx: &mut CycleContext<'_>,
    entries: &mut Vec<SubmitterEntry>,
    group: PieGroup<'_>,
) -> crate::Result<()> {
    if ctx.config.floor_round {
        let mut below_floor: Vec<SubmitterEntry> = entries
            .iter()
            .filter(|entry| {
                let floor = ctx.ledger.floor(entry.name());
                floor > 0.0 && ctx.ledger.weighted_resources_used(entry.name()) < floor
            })
            .cloned()
            .collect();
        if !below_floor.is_empty() {
            log::debug!(
                "{} submitters are below their floor, running a floor round",
                below_floor.len()
            );
            negotiate_with_group(ctx, &mut below_floor, group, true)?;
        }
    }
    negotiate_with_group(ctx, entries, group, false)
}

/// Hierarchical group quota negotiation: allocation rounds over the tree,
/// then a final pass of autoregroup submitters against the whole pool.
pub(crate) fn negotiate_with_all_groups(
    ctx: &mut CycleContext<'_>,
    tree: &mut QuotaTree,
    buckets: &mut GroupBuckets,
    total_quota: f64,
) -> crate::Result<()> {
    let root = tree.root();
    let autoregroup = tree.has_autoregroup();
    let rounds = ctx.config.max_allocation_rounds.max(1);
    for round in 1..=rounds {
        ctx.record.allocation_rounds += 1;
        let surplus = allocate(
            tree,
            total_quota,
            ctx.config.round_robin_remainders,
            ctx.now as f64,
        );
        log::debug!("Allocation round {round}: surplus {surplus}");

        let mut shortfall = false;
        for id in negotiation_order(tree, buckets, autoregroup, round == 1) {
            let name = tree[id].name().to_string();
            let allocated = tree[id].allocated();
            log::info!(
                "Negotiating with group {name}: allocated {allocated}, usage {}",
                tree[id].usage()
            );
            negotiate_group(ctx, buckets.get_mut(id), PieGroup::new(&name, allocated))?;

            let usage = ctx.ledger.weighted_resources_used(&name);
            let node = &mut tree[id];
            node.usage = usage;
            if usage + QUOTA_EPSILON < allocated && node.currently_requested > usage {
                log::debug!("Group {name} used {usage} of {allocated}, releasing the rest");
                node.currently_requested = usage;
                shortfall = true;
            }
        }
        tree.update_subtree_usage();
        if !shortfall || ctx.pool.is_empty() {
            break;
        }
    }

    if autoregroup {
        let mut entries: Vec<SubmitterEntry> = tree
            .ids()
            .filter(|id| *id == root || tree[*id].autoregroup())
            .flat_map(|id| buckets.take(id))
            .collect();
        if !entries.is_empty() && !ctx.pool.is_empty() {
            log::info!(
                "Negotiating {} autoregroup submitters against the whole pool",
                entries.len()
            );
            negotiate_with_group(ctx, &mut entries, PieGroup::unlimited(), false)?;
        }
    }
    Ok(())
}

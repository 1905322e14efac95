use crate::internal::common::ids::GroupId;
use crate::internal::common::utils::{QUOTA_EPSILON, approx_eq, non_negative};
use crate::internal::quota::tree::{QuotaPhase, QuotaTree};

const MAX_SURPLUS_ITERATIONS: usize = 1000;

/// Allocates quota against demand in the subtree rooted at `id` and returns
/// the surplus that nobody in the subtree could use.
pub fn fairshare(tree: &mut QuotaTree, id: GroupId) -> f64 {
    tree.set_phase(QuotaPhase::Fairshare);
    let node = &mut tree[id];
    node.allocated = node.requested.min(node.quota);
    node.requested -= node.allocated;
    node.subtree_requested = node.requested;
    let mut surplus = node.quota - node.allocated;
    if node.is_leaf() {
        return surplus;
    }

    let children = node.children.clone();
    for child in children {
        surplus += fairshare(tree, child);
        if tree[child].accept_surplus {
            let requested = tree[child].subtree_requested;
            tree[id].subtree_requested += requested;
        }
    }
    allocate_surplus(tree, id, surplus)
}

/// Shares `surplus` among the node itself and its children that accept
/// surplus. Returns what could not be given away.
///
/// The first pass is weighted by subtree quota, the second gives equal
/// weight to recipients without quota. A recipient never receives more than
/// its outstanding request.
pub fn allocate_surplus(tree: &mut QuotaTree, id: GroupId, surplus: f64) -> f64 {
    if surplus <= 0.0 {
        return 0.0;
    }
    let total_requested = tree[id].subtree_requested;
    if total_requested <= 0.0 {
        return surplus;
    }

    let mut recipients = Recipients::collect(tree, id);
    let mut surplus = surplus;
    if surplus >= total_requested {
        for recipient in recipients.entries.iter_mut() {
            recipient.allocated = recipient.requested;
        }
        surplus -= total_requested;
    } else {
        surplus = recipients.distribute(surplus, true);
        surplus = recipients.distribute(surplus, false);
    }

    let mut leftover = surplus;
    for recipient in &recipients.entries {
        if recipient.allocated <= 0.0 {
            continue;
        }
        if recipient.id == id {
            let node = &mut tree[id];
            node.allocated += recipient.allocated;
            node.requested = non_negative(node.requested - recipient.allocated);
        } else {
            // The child lowers its own subtree request
            leftover += allocate_surplus(tree, recipient.id, recipient.allocated);
        }
    }
    let given: f64 = recipients.entries.iter().map(|r| r.allocated).sum();
    tree[id].subtree_requested = non_negative(total_requested - given);
    leftover
}

struct Recipient {
    id: GroupId,
    weight: f64,
    requested: f64,
    allocated: f64,
}

impl Recipient {
    fn outstanding(&self) -> f64 {
        self.requested - self.allocated
    }
}

struct Recipients {
    entries: Vec<Recipient>,
}

impl Recipients {
    /// The node itself (using its own quota and request) and every child
    /// that accepts surplus.
    fn collect(tree: &QuotaTree, id: GroupId) -> Self {
        let node = &tree[id];
        let mut entries = vec![Recipient {
            id,
            weight: node.quota,
            requested: node.requested,
            allocated: 0.0,
        }];
        entries.extend(
            node.children
                .iter()
                .filter(|c| tree[**c].accept_surplus)
                .map(|c| Recipient {
                    id: *c,
                    weight: tree[*c].subtree_quota,
                    requested: tree[*c].subtree_requested,
                    allocated: 0.0,
                }),
        );
        Recipients { entries }
    }

    fn distribute(&mut self, mut surplus: f64, by_quota: bool) -> f64 {
        for _ in 0..MAX_SURPLUS_ITERATIONS {
            if surplus <= QUOTA_EPSILON {
                break;
            }
            let weight_of = |r: &Recipient| {
                if by_quota {
                    r.weight
                } else if r.weight <= 0.0 {
                    1.0
                } else {
                    0.0
                }
            };
            let total_weight: f64 = self
                .entries
                .iter()
                .filter(|r| r.outstanding() > QUOTA_EPSILON)
                .map(weight_of)
                .sum();
            if total_weight <= 0.0 {
                break;
            }
            let mut given = 0.0;
            for recipient in self.entries.iter_mut() {
                if recipient.outstanding() <= QUOTA_EPSILON {
                    continue;
                }
                let share = surplus * weight_of(recipient) / total_weight;
                let amount = share.min(recipient.outstanding());
                recipient.allocated += amount;
                given += amount;
            }
            surplus -= given;
            if given <= 0.0 {
                break;
            }
        }
        non_negative(surplus)
    }
}

/// Verifies that allocations plus `surplus` add up to `initial`.
///
/// Negative allocations are clamped to zero. Returns the clamped surplus.
pub fn check_conservation(tree: &mut QuotaTree, initial: f64, surplus: f64) -> f64 {
    for id in tree.ids() {
        let node = &mut tree[id];
        if node.allocated < 0.0 {
            log::warn!(
                "Group {} has negative allocation {}, clamping to zero",
                node.name,
                node.allocated
            );
            node.allocated = 0.0;
        }
    }
    let surplus = if surplus < 0.0 {
        log::warn!("Negative quota surplus {surplus}, clamping to zero");
        0.0
    } else {
        surplus
    };
    let total = tree.total_allocated() + surplus;
    if !tree.allow_oversubscription() && !approx_eq(total, initial, 1e-6) {
        log::warn!(
            "Group quota allocation does not add up: allocated {} + surplus {surplus} != {initial}",
            tree.total_allocated()
        );
    }
    surplus
}

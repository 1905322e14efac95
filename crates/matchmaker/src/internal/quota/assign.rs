use crate::internal::common::ids::GroupId;
use crate::internal::common::utils::non_negative;
use crate::internal::quota::tree::{QuotaPhase, QuotaTree};

/// Distributes `quota` over the subtree rooted at `id`.
///
/// Static children are served first (scaled down when they do not fit),
/// dynamic children split the rest proportionally to their weights. The
/// node keeps whatever its children did not take.
pub fn assign_quotas(tree: &mut QuotaTree, id: GroupId, quota: f64) {
    tree.set_phase(QuotaPhase::AssignQuotas);
    let quota = non_negative(quota);
    tree[id].subtree_quota = quota;
    if quota <= 0.0 {
        zero_subtree(tree, id);
        return;
    }

    let children = tree[id].children.clone();
    let static_total: f64 = children
        .iter()
        .filter(|c| tree[**c].static_quota)
        .map(|c| tree[*c].config_quota)
        .sum();
    let dynamic_total: f64 = children
        .iter()
        .filter(|c| !tree[**c].static_quota)
        .map(|c| tree[*c].config_quota)
        .sum();

    let oversubscribe = tree.allow_oversubscription();
    let static_assigned = if oversubscribe {
        static_total
    } else {
        static_total.min(quota)
    };
    let dynamic_assigned = non_negative(quota - static_assigned);
    // Dynamic weights summing above one are renormalized
    let dynamic_norm = dynamic_total.max(1.0);

    let mut assigned = Vec::with_capacity(children.len());
    for child in &children {
        let node = &tree[*child];
        let child_quota = if node.static_quota {
            if static_total > 0.0 {
                node.config_quota * static_assigned / static_total
            } else {
                0.0
            }
        } else {
            node.config_quota * dynamic_assigned / dynamic_norm
        };
        assigned.push((*child, child_quota));
    }

    let children_total: f64 = assigned.iter().map(|(_, q)| *q).sum();
    tree[id].quota = if oversubscribe {
        quota
    } else {
        non_negative(quota - children_total)
    };
    log::debug!(
        "Group {} assigned quota {} (own {})",
        tree[id].name,
        quota,
        tree[id].quota
    );

    for (child, child_quota) in assigned {
        assign_quotas(tree, child, child_quota);
    }
}

fn zero_subtree(tree: &mut QuotaTree, id: GroupId) {
    let node = &mut tree[id];
    node.quota = 0.0;
    node.subtree_quota = 0.0;
    let children = node.children.clone();
    for child in children {
        zero_subtree(tree, child);
    }
}

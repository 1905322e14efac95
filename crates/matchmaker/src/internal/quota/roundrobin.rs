use crate::internal::common::ids::GroupId;
use crate::internal::common::utils::non_negative;
use crate::internal::quota::tree::{QuotaPhase, QuotaTree};

/// Strips fractional parts of allocations in the subtree and returns them
/// as surplus. The stripped amount becomes outstanding demand again.
///
/// Also computes `subtree_rr_time`: the oldest round-robin timestamp of any
/// node in the subtree that still has demand.
pub fn recover_remainders(tree: &mut QuotaTree, id: GroupId) -> f64 {
    tree.set_phase(QuotaPhase::RecoverRemainders);
    let node = &mut tree[id];
    let whole = node.allocated.floor();
    let mut surplus = node.allocated - whole;
    node.allocated = whole;
    node.requested += surplus;
    node.subtree_requested = node.requested;
    node.subtree_rr_time = if node.requested > 0.0 {
        node.rr_time
    } else {
        f64::MAX
    };

    let children = node.children.clone();
    for child in children {
        surplus += recover_remainders(tree, child);
        let child_node = &tree[child];
        if child_node.accept_surplus && child_node.subtree_requested > 0.0 {
            let requested = child_node.subtree_requested;
            let rr_time = child_node.subtree_rr_time;
            let node = &mut tree[id];
            node.subtree_requested += requested;
            node.subtree_rr_time = node.subtree_rr_time.min(rr_time);
        }
    }
    surplus
}

/// Hands out whole units of `surplus`, one at a time, to the recipients
/// that waited longest for a round-robin unit. Returns what remains.
pub fn round_robin(tree: &mut QuotaTree, id: GroupId, surplus: f64, now: f64) -> f64 {
    if surplus <= 0.0 {
        return 0.0;
    }
    if tree[id].subtree_requested <= 0.0 {
        return surplus;
    }

    // (id, rr time, outstanding request, units)
    let node = &tree[id];
    let mut recipients: Vec<(GroupId, f64, f64, f64)> = vec![(
        id,
        if node.requested > 0.0 {
            node.rr_time
        } else {
            f64::MAX
        },
        node.requested,
        0.0,
    )];
    recipients.extend(
        node.children
            .iter()
            .filter(|c| tree[**c].accept_surplus && tree[**c].subtree_requested > 0.0)
            .map(|c| (*c, tree[*c].subtree_rr_time, tree[*c].subtree_requested, 0.0)),
    );
    recipients.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));

    let mut surplus = surplus;
    loop {
        let mut given = false;
        for recipient in recipients.iter_mut() {
            if surplus < 1.0 {
                break;
            }
            if recipient.2 - recipient.3 > 0.0 {
                recipient.3 += 1.0;
                surplus -= 1.0;
                given = true;
            }
        }
        if !given || surplus < 1.0 {
            break;
        }
    }

    for (recipient, _, _, units) in recipients {
        if units <= 0.0 {
            continue;
        }
        if recipient == id {
            let node = &mut tree[id];
            node.allocated += units;
            node.requested = non_negative(node.requested - units);
            node.rr = true;
            node.rr_time = now;
        } else {
            surplus += round_robin(tree, recipient, units, now);
        }
    }
    surplus
}

#[cfg(test)]
mod tests {
    use super::{recover_remainders, round_robin};
    use crate::internal::quota::config::{GroupConfig, QuotaSpec, QuotaTreeConfig};
    use crate::internal::quota::tree::QuotaTree;

    #[test]
    fn remainders_go_to_stalest_group() {
        let config = QuotaTreeConfig {
            groups: vec![
                GroupConfig::new("a", QuotaSpec::Static(1.0)).accept_surplus(true),
                GroupConfig::new("b", QuotaSpec::Static(1.0)).accept_surplus(true),
            ],
            ..Default::default()
        };
        let mut tree = QuotaTree::build(&config).unwrap();
        let a = tree.find("a").unwrap();
        let b = tree.find("b").unwrap();
        tree[a].allocated = 1.5;
        tree[b].allocated = 1.5;
        tree[a].rr_time = 20.0;
        tree[b].rr_time = 10.0;

        let root = tree.root();
        let surplus = recover_remainders(&mut tree, root);
        assert_eq!(surplus, 1.0);
        assert_eq!(tree[a].allocated(), 1.0);

        let left = round_robin(&mut tree, root, surplus, 30.0);
        assert_eq!(left, 0.0);
        assert_eq!(tree[b].allocated(), 2.0);
        assert_eq!(tree[b].rr_time(), 30.0);
        assert_eq!(tree[a].allocated(), 1.0);
        assert_eq!(tree[a].rr_time(), 20.0);
    }
}

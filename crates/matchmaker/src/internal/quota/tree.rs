use crate::Map;
use crate::internal::common::error::MatchmakerError;
use crate::internal::common::ids::GroupId;
use crate::internal::ledger::GroupResolver;
use crate::internal::quota::ROOT_GROUP_NAME;
use crate::internal::quota::config::{QuotaSpec, QuotaTreeConfig};
use std::ops::{Index, IndexMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaPhase {
    Reset,
    AssignQuotas,
    Fairshare,
    RecoverRemainders,
    Done,
}

#[derive(Debug, Clone)]
pub struct GroupNode {
    pub(crate) name: String,
    pub(crate) parent: Option<GroupId>,
    pub(crate) children: Vec<GroupId>,
    pub(crate) config_quota: f64,
    pub(crate) static_quota: bool,
    pub(crate) accept_surplus: bool,
    pub(crate) autoregroup: bool,
    pub(crate) priority_factor: f64,

    // Working fields, reset every cycle
    pub(crate) usage: f64,
    pub(crate) currently_requested: f64,
    pub(crate) requested: f64,
    pub(crate) allocated: f64,
    pub(crate) quota: f64,
    pub(crate) subtree_quota: f64,
    pub(crate) subtree_requested: f64,
    pub(crate) subtree_usage: f64,
    pub(crate) rr: bool,
    pub(crate) rr_time: f64,
    pub(crate) subtree_rr_time: f64,
}

impl GroupNode {
    fn new(name: &str, parent: Option<GroupId>) -> Self {
        GroupNode {
            name: name.to_string(),
            parent,
            children: Vec::new(),
            config_quota: 0.0,
            static_quota: false,
            accept_surplus: false,
            autoregroup: false,
            priority_factor: 0.0,
            usage: 0.0,
            currently_requested: 0.0,
            requested: 0.0,
            allocated: 0.0,
            quota: 0.0,
            subtree_quota: 0.0,
            subtree_requested: 0.0,
            subtree_usage: 0.0,
            rr: false,
            rr_time: 0.0,
            subtree_rr_time: 0.0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<GroupId> {
        self.parent
    }

    pub fn children(&self) -> &[GroupId] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn accept_surplus(&self) -> bool {
        self.accept_surplus
    }

    pub fn autoregroup(&self) -> bool {
        self.autoregroup
    }

    /// Quota assigned to the group itself (not to its children).
    pub fn quota(&self) -> f64 {
        self.quota
    }

    pub fn subtree_quota(&self) -> f64 {
        self.subtree_quota
    }

    pub fn allocated(&self) -> f64 {
        self.allocated
    }

    pub fn requested(&self) -> f64 {
        self.requested
    }

    pub fn currently_requested(&self) -> f64 {
        self.currently_requested
    }

    pub fn usage(&self) -> f64 {
        self.usage
    }

    pub fn subtree_usage(&self) -> f64 {
        self.subtree_usage
    }

    pub fn rr_time(&self) -> f64 {
        self.rr_time
    }
}

/// Arena of accounting groups; the root is always at index zero.
#[derive(Debug, Clone)]
pub struct QuotaTree {
    nodes: Vec<GroupNode>,
    by_name: Map<String, GroupId>,
    allow_oversubscription: bool,
    phase: QuotaPhase,
}

impl Default for QuotaTree {
    fn default() -> Self {
        let root = GroupNode::new(ROOT_GROUP_NAME, None);
        QuotaTree {
            by_name: [(ROOT_GROUP_NAME.to_string(), GroupId::new(0))]
                .into_iter()
                .collect(),
            nodes: vec![root],
            allow_oversubscription: false,
            phase: QuotaPhase::Reset,
        }
    }
}

impl QuotaTree {
    pub fn build(config: &QuotaTreeConfig) -> crate::Result<Self> {
        let mut tree = QuotaTree {
            allow_oversubscription: config.allow_oversubscription,
            ..Default::default()
        };
        tree.nodes[0].accept_surplus = config.accept_surplus;
        tree.nodes[0].autoregroup = config.autoregroup;

        let mut groups: Vec<_> = config.groups.iter().collect();
        groups.sort_by_key(|g| g.name.matches('.').count());
        for group in groups {
            let name = group.name.trim();
            if name.is_empty() || name == ROOT_GROUP_NAME {
                return Err(MatchmakerError::Config(format!(
                    "Invalid accounting group name '{}'",
                    group.name
                )));
            }
            if tree.by_name.contains_key(name) {
                return Err(MatchmakerError::Config(format!(
                    "Accounting group {name} is defined more than once"
                )));
            }
            let value = group.quota.value();
            if !value.is_finite() || value < 0.0 {
                return Err(MatchmakerError::Config(format!(
                    "Accounting group {name} has invalid quota {value}"
                )));
            }
            let parent = match name.rsplit_once('.') {
                Some((parent, _)) => *tree.by_name.get(parent).ok_or_else(|| {
                    MatchmakerError::Config(format!(
                        "Parent group {parent} of accounting group {name} is not defined"
                    ))
                })?,
                None => tree.root(),
            };
            let id = GroupId::new(tree.nodes.len() as u32);
            let mut node = GroupNode::new(name, Some(parent));
            node.config_quota = value;
            node.static_quota = matches!(group.quota, QuotaSpec::Static(_));
            node.accept_surplus = group.accept_surplus.unwrap_or(config.accept_surplus);
            node.autoregroup = group.autoregroup.unwrap_or(config.autoregroup);
            node.priority_factor = group.priority_factor;
            tree.nodes.push(node);
            tree.nodes[parent.index()].children.push(id);
            tree.by_name.insert(name.to_string(), id);
        }
        Ok(tree)
    }

    /// Builds a new tree and carries over round-robin timestamps of the
    /// groups that still exist.
    pub fn rebuild(config: &QuotaTreeConfig, previous: &QuotaTree) -> crate::Result<Self> {
        let mut tree = Self::build(config)?;
        for node in tree.nodes.iter_mut() {
            if let Some(old) = previous.find(&node.name) {
                node.rr_time = previous[old].rr_time;
            }
        }
        Ok(tree)
    }

    #[inline]
    pub fn root(&self) -> GroupId {
        GroupId::new(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// True when only the root group exists.
    pub fn is_flat(&self) -> bool {
        self.nodes.len() == 1
    }

    pub fn allow_oversubscription(&self) -> bool {
        self.allow_oversubscription
    }

    pub fn phase(&self) -> QuotaPhase {
        self.phase
    }

    pub(crate) fn set_phase(&mut self, phase: QuotaPhase) {
        self.phase = phase;
    }

    pub fn find(&self, name: &str) -> Option<GroupId> {
        self.by_name.get(name).copied()
    }

    pub fn ids(&self) -> impl Iterator<Item = GroupId> + use<> {
        (0..self.nodes.len() as u32).map(GroupId::new)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GroupNode> {
        self.nodes.iter()
    }

    pub fn has_autoregroup(&self) -> bool {
        self.nodes.iter().any(|node| node.autoregroup)
    }

    /// Group resolver for the ledger, reflecting this tree.
    pub fn resolver(&self) -> GroupResolver {
        GroupResolver::new(
            self.nodes
                .iter()
                .skip(1)
                .map(|node| (node.name.clone(), node.priority_factor)),
        )
    }

    /// Clears per-cycle working fields; round-robin times survive.
    pub fn reset(&mut self) {
        for node in self.nodes.iter_mut() {
            node.usage = 0.0;
            node.currently_requested = 0.0;
            node.requested = 0.0;
            node.allocated = 0.0;
            node.quota = 0.0;
            node.subtree_quota = 0.0;
            node.subtree_requested = 0.0;
            node.subtree_usage = 0.0;
            node.rr = false;
            node.subtree_rr_time = 0.0;
        }
        self.phase = QuotaPhase::Reset;
    }

    /// Prepares an allocation round: demand is the outstanding request and
    /// nothing is allocated yet.
    pub fn start_round(&mut self) {
        for node in self.nodes.iter_mut() {
            node.requested = node.currently_requested;
            node.allocated = 0.0;
            node.subtree_requested = 0.0;
            node.rr = false;
        }
    }

    pub fn set_usage(&mut self, id: GroupId, usage: f64, requested: f64) {
        let node = &mut self[id];
        node.usage = usage;
        node.currently_requested = requested;
    }

    /// Recomputes `subtree_usage` bottom-up.
    pub fn update_subtree_usage(&mut self) {
        for index in (0..self.nodes.len()).rev() {
            let usage = self.nodes[index].usage
                + self.nodes[index]
                    .children
                    .iter()
                    .map(|c| self.nodes[c.index()].subtree_usage)
                    .sum::<f64>();
            self.nodes[index].subtree_usage = usage;
        }
    }

    pub fn total_allocated(&self) -> f64 {
        self.nodes.iter().map(|node| node.allocated).sum()
    }
}

impl Index<GroupId> for QuotaTree {
    type Output = GroupNode;

    #[inline]
    fn index(&self, id: GroupId) -> &Self::Output {
        &self.nodes[id.index()]
    }
}

impl IndexMut<GroupId> for QuotaTree {
    #[inline]
    fn index_mut(&mut self, id: GroupId) -> &mut Self::Output {
        &mut self.nodes[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use crate::internal::quota::config::{GroupConfig, QuotaSpec, QuotaTreeConfig};
    use crate::internal::quota::tree::QuotaTree;

    #[test]
    fn build_nested() {
        let config = QuotaTreeConfig {
            groups: vec![
                GroupConfig::new("a.x", QuotaSpec::Static(1.0)),
                GroupConfig::new("a", QuotaSpec::Static(5.0)),
                GroupConfig::new("b", QuotaSpec::Dynamic(0.5)),
            ],
            ..Default::default()
        };
        let tree = QuotaTree::build(&config).unwrap();
        assert_eq!(tree.len(), 4);
        let a = tree.find("a").unwrap();
        let ax = tree.find("a.x").unwrap();
        assert_eq!(tree[ax].parent(), Some(a));
        assert_eq!(tree[a].children(), &[ax]);
        assert_eq!(tree[tree.root()].children().len(), 2);
    }

    #[test]
    fn missing_parent_is_fatal() {
        let config = QuotaTreeConfig {
            groups: vec![GroupConfig::new("a.x", QuotaSpec::Static(1.0))],
            ..Default::default()
        };
        let error = QuotaTree::build(&config).unwrap_err();
        assert!(error.is_fatal());
    }

    #[test]
    fn duplicate_group_is_fatal() {
        let config = QuotaTreeConfig {
            groups: vec![
                GroupConfig::new("a", QuotaSpec::Static(1.0)),
                GroupConfig::new("a", QuotaSpec::Static(2.0)),
            ],
            ..Default::default()
        };
        assert!(QuotaTree::build(&config).is_err());
    }

    #[test]
    fn rebuild_keeps_round_robin_time() {
        let config = QuotaTreeConfig {
            groups: vec![GroupConfig::new("a", QuotaSpec::Static(1.0))],
            ..Default::default()
        };
        let mut tree = QuotaTree::build(&config).unwrap();
        let a = tree.find("a").unwrap();
        tree[a].rr_time = 42.0;
        let tree = QuotaTree::rebuild(&config, &tree).unwrap();
        assert_eq!(tree[tree.find("a").unwrap()].rr_time(), 42.0);
    }
}

//! Hierarchical group quotas.
//!
//! One allocation round runs `reset -> fairshare -> recover remainders` on
//! top of quotas assigned by [`assign_quotas`].

pub mod assign;
pub mod config;
pub mod fairshare;
pub mod roundrobin;
pub mod tree;

pub use assign::assign_quotas;
pub use config::{GroupConfig, QuotaSpec, QuotaTreeConfig};
pub use fairshare::{allocate_surplus, check_conservation, fairshare};
pub use roundrobin::{recover_remainders, round_robin};
pub use tree::{GroupNode, QuotaPhase, QuotaTree};

/// Name of the implicit root group.
pub const ROOT_GROUP_NAME: &str = "<none>";

//! The negotiation cycle: snapshots, accounting refresh, group quotas and
//! the pie-slicing loop that hands offers to submitters.

pub mod comm;
pub mod config;
pub(crate) mod context;
pub mod cycle;
pub(crate) mod groups;
pub(crate) mod pie;
pub mod record;
pub(crate) mod session;
pub mod sort;

pub use comm::{NegotiatorComm, SessionReply};
pub use config::{NegotiatorConfig, NegotiatorConfigBuilder};
pub use cycle::{CyclePhase, Negotiator, ReconfigQueue, Reconfiguration};
pub use record::{CycleHistory, CycleRecord};
pub use sort::starvation_ratio;

//! Per-consumer usage and priority bookkeeping.

pub mod account;
pub mod claim;
pub mod config;
pub mod groups;
pub mod journal;
pub mod limits;
pub mod report;
pub mod usage;

pub use account::ConsumerAccount;
pub use claim::ResourceClaim;
pub use config::{LedgerConfig, LimitsConfig};
pub use groups::GroupResolver;
pub use limits::{ConcurrencyLimits, LimitRequest, parse_limits};
pub use report::{AccountReport, ClaimReport};
pub use usage::{UsageLedger, get_domain};

/// Seconds since the unix epoch.
pub type Timestamp = i64;

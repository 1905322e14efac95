#![deny(clippy::await_holding_refcell_ref)]

#[macro_use]
pub mod internal;

pub use crate::internal::common::WrappedRcRefCell;
pub use crate::internal::common::ids::{GroupId, OfferId};
pub use crate::internal::common::{Map, Set};

pub type Error = internal::common::error::MatchmakerError;
pub type Result<T> = std::result::Result<T, Error>;

pub mod records {
    pub use crate::internal::records::{
        AttributeMap, JobRequest, Offer, OfferClaim, Snapshot, SubmitterAd,
    };
}

pub mod ledger {
    pub use crate::internal::ledger::{
        AccountReport, ClaimReport, ConcurrencyLimits, ConsumerAccount, GroupResolver,
        LedgerConfig, LimitRequest, LimitsConfig, ResourceClaim, Timestamp, UsageLedger,
        get_domain, parse_limits,
    };
}

pub mod quota {
    pub use crate::internal::quota::{
        GroupConfig, GroupNode, QuotaPhase, QuotaSpec, QuotaTree, QuotaTreeConfig,
        ROOT_GROUP_NAME, allocate_surplus, assign_quotas, check_conservation, fairshare,
        recover_remainders, round_robin,
    };
}

pub mod matching {
    pub use crate::internal::matching::{
        CacheKey, Candidate, EvalContext, EvalValue, Evaluator, Expression, MatchConfig,
        MatchEngine, MatchListCache, MatchOutcome, MatchRequest, MatchScore, OfferPool,
        PreemptState, RejectionCounts, SpendState, submitter_limit_permits,
    };
}

pub mod negotiation {
    pub use crate::internal::negotiation::{
        CycleHistory, CyclePhase, CycleRecord, Negotiator, NegotiatorComm, NegotiatorConfig,
        NegotiatorConfigBuilder, ReconfigQueue, Reconfiguration, SessionReply,
        starvation_ratio,
    };
}

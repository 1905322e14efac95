pub mod cache;
pub mod engine;
pub mod evaluator;
pub mod pool;
pub mod rejection;

pub use cache::{CacheKey, MatchListCache};
pub use engine::{
    Candidate, MatchConfig, MatchEngine, MatchOutcome, MatchRequest, MatchScore, PreemptState,
    SpendState, submitter_limit_permits,
};
pub use evaluator::{EvalContext, EvalValue, Evaluator, Expression};
pub use pool::OfferPool;
pub use rejection::RejectionCounts;

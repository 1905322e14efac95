use crate::internal::records::{JobRequest, Offer};

/// Expressions the matchmaker asks the evaluator about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Expression {
    /// Mutual match between a request and an offer.
    Requirements,
    /// The request's rank of the offer.
    JobRank,
    /// The offer's rank of the request.
    StartdRank,
    PreemptionRequirements,
    PreemptionRank,
    PreJobRank,
    PostJobRank,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EvalValue {
    Bool(bool),
    Number(f64),
    Undefined,
}

impl EvalValue {
    /// Undefined is false; numbers are true when nonzero.
    pub fn is_true(&self) -> bool {
        match self {
            EvalValue::Bool(value) => *value,
            EvalValue::Number(value) => *value != 0.0,
            EvalValue::Undefined => false,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            EvalValue::Number(value) => Some(*value),
            EvalValue::Bool(value) => Some(if *value { 1.0 } else { 0.0 }),
            EvalValue::Undefined => None,
        }
    }
}

/// Both records of a candidate match plus the priorities that preemption
/// expressions may refer to.
pub struct EvalContext<'a> {
    pub request: &'a JobRequest,
    pub offer: &'a Offer,
    pub submitter: &'a str,
    pub submitter_priority: f64,
    pub remote_user_priority: Option<f64>,
}

pub trait Evaluator {
    fn evaluate(&self, expression: Expression, context: &EvalContext<'_>)
    -> crate::Result<EvalValue>;

    /// False when the expression is not configured at all.
    fn is_defined(&self, _expression: Expression) -> bool {
        true
    }

    /// True when the expression depends on state that changes between two
    /// evaluations with the same records.
    fn is_unstable(&self, _expression: Expression) -> bool {
        false
    }
}

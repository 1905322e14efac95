use crate::internal::common::error::MatchmakerError;
use crate::internal::matching::{EvalContext, EvalValue, Evaluator, Expression};
use std::cell::Cell;

/// Evaluates the attribute conventions of the test builders:
///
/// * a request's `requirements` object must be a subset of the offer
///   attributes; an offer with `broken: true` fails to evaluate,
/// * a request's `rank` names a numeric offer attribute,
/// * an offer's `rank` object maps submitters to the offer's rank of them,
///   which also serves as the pre-job rank,
/// * preemption rank is the priority of the current claimant.
#[derive(Default)]
pub struct TestEvaluator {
    pub preemption_requirements: Option<bool>,
    pub unstable: bool,
    requirement_evaluations: Cell<u32>,
}

impl TestEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requirement_evaluations(&self) -> u32 {
        self.requirement_evaluations.get()
    }

    fn requirements(&self, context: &EvalContext<'_>) -> crate::Result<EvalValue> {
        self.requirement_evaluations
            .set(self.requirement_evaluations.get() + 1);
        if context
            .offer
            .attributes
            .get("broken")
            .is_some_and(|value| value.as_bool() == Some(true))
        {
            return Err(MatchmakerError::Evaluation(format!(
                "offer {} is broken",
                context.offer.name
            )));
        }
        let Some(requirements) = context
            .request
            .attributes
            .get("requirements")
            .and_then(|r| r.as_object())
        else {
            return Ok(EvalValue::Bool(true));
        };
        let matched = requirements
            .iter()
            .all(|(name, value)| context.offer.attributes.get(name) == Some(value));
        Ok(EvalValue::Bool(matched))
    }

    fn startd_rank(&self, context: &EvalContext<'_>) -> EvalValue {
        context
            .offer
            .attributes
            .get("rank")
            .and_then(|ranks| ranks.get(context.submitter))
            .and_then(|rank| rank.as_f64())
            .map_or(EvalValue::Undefined, EvalValue::Number)
    }
}

impl Evaluator for TestEvaluator {
    fn evaluate(
        &self,
        expression: Expression,
        context: &EvalContext<'_>,
    ) -> crate::Result<EvalValue> {
        Ok(match expression {
            Expression::Requirements => return self.requirements(context),
            Expression::JobRank => context
                .request
                .attributes
                .get("rank")
                .and_then(|name| name.as_str())
                .and_then(|name| context.offer.attributes.get(name))
                .and_then(|value| value.as_f64())
                .map_or(EvalValue::Undefined, EvalValue::Number),
            Expression::StartdRank | Expression::PreJobRank => self.startd_rank(context),
            Expression::PostJobRank => EvalValue::Undefined,
            Expression::PreemptionRequirements => self
                .preemption_requirements
                .map_or(EvalValue::Undefined, EvalValue::Bool),
            Expression::PreemptionRank => context
                .remote_user_priority
                .map_or(EvalValue::Undefined, EvalValue::Number),
        })
    }

    fn is_defined(&self, expression: Expression) -> bool {
        match expression {
            Expression::PostJobRank => false,
            Expression::PreemptionRequirements => self.preemption_requirements.is_some(),
            _ => true,
        }
    }

    fn is_unstable(&self, expression: Expression) -> bool {
        self.unstable
            && matches!(
                expression,
                Expression::PreemptionRequirements | Expression::PreemptionRank
            )
    }
}

//! Evaluator for the attribute conventions of the pool directory.
//!
//! Requests carry `requirements`, an object mapping offer attribute names to
//! either an exact value or numeric bounds (`{"min": 4}`, `{"max": 16}`),
//! and `rank`, the name of a numeric offer attribute they prefer.
//! Offers may carry `requirements` checked against the request attributes
//! the same way, and `rank`, an object mapping submitter names (or `"*"`)
//! to the offer's preference for them. By default the offer's preference is
//! also the pre-job rank, so an offer that prefers a request wins over
//! offers the request itself ranks equally.

use matchmaker::matching::{EvalContext, EvalValue, Evaluator, Expression};
use matchmaker::records::AttributeMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const REQUIREMENTS_ATTR: &str = "requirements";
const RANK_ATTR: &str = "rank";
const ANY_SUBMITTER: &str = "*";

/// Ranking applied before the request's own rank.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreJobRank {
    /// The offer's rank of the submitter
    #[default]
    StartdRank,
    /// A numeric offer attribute
    Attribute(String),
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvaluatorConfig {
    /// Priority preemption is allowed only when the running user's priority
    /// is at least this many times worse than the requester's.
    /// Unset means no preemption requirements.
    pub preemption_priority_ratio: Option<f64>,
    pub pre_job_rank: PreJobRank,
    /// Offer attribute used to break ties after the request's rank.
    pub post_job_rank: Option<String>,
}

#[derive(Debug, Default)]
pub struct StructuredEvaluator {
    config: EvaluatorConfig,
}

fn evaluation_error(message: String) -> matchmaker::Error {
    matchmaker::Error::Evaluation(message)
}

fn bound(
    name: &str,
    bounds: &serde_json::Map<String, Value>,
    key: &str,
) -> matchmaker::Result<Option<f64>> {
    match bounds.get(key) {
        None => Ok(None),
        Some(value) => value.as_f64().map(Some).ok_or_else(|| {
            evaluation_error(format!("Bound '{key}' of requirement {name} is not a number"))
        }),
    }
}

/// Checks one side's requirements against the other side's attributes.
fn requirements_met(
    requirements: Option<&Value>,
    attributes: &AttributeMap,
) -> matchmaker::Result<bool> {
    let Some(requirements) = requirements else {
        return Ok(true);
    };
    let Value::Object(requirements) = requirements else {
        return Err(evaluation_error(format!(
            "Requirements have to be an object, got {requirements}"
        )));
    };
    for (name, expected) in requirements {
        let actual = attributes.get(name);
        let met = match expected {
            Value::Object(bounds) if bounds.keys().all(|k| k == "min" || k == "max") => {
                let min = bound(name, bounds, "min")?;
                let max = bound(name, bounds, "max")?;
                match actual.and_then(Value::as_f64) {
                    Some(value) => {
                        min.is_none_or(|min| value >= min) && max.is_none_or(|max| value <= max)
                    }
                    None => false,
                }
            }
            expected => actual == Some(expected),
        };
        if !met {
            return Ok(false);
        }
    }
    Ok(true)
}

fn numeric_attr(attributes: &AttributeMap, name: &str) -> EvalValue {
    attributes
        .get(name)
        .and_then(Value::as_f64)
        .map_or(EvalValue::Undefined, EvalValue::Number)
}

impl StructuredEvaluator {
    pub fn new(config: EvaluatorConfig) -> Self {
        StructuredEvaluator { config }
    }

    fn job_rank(&self, context: &EvalContext<'_>) -> matchmaker::Result<EvalValue> {
        match context.request.attributes.get(RANK_ATTR) {
            None => Ok(EvalValue::Undefined),
            Some(Value::String(attr)) => Ok(numeric_attr(&context.offer.attributes, attr)),
            Some(value) => Err(evaluation_error(format!(
                "Rank of request {} has to be an attribute name, got {value}",
                context.request.id
            ))),
        }
    }

    fn startd_rank(&self, context: &EvalContext<'_>) -> EvalValue {
        let Some(Value::Object(ranks)) = context.offer.attributes.get(RANK_ATTR) else {
            return EvalValue::Undefined;
        };
        ranks
            .get(context.submitter)
            .or_else(|| ranks.get(ANY_SUBMITTER))
            .and_then(Value::as_f64)
            .map_or(EvalValue::Undefined, EvalValue::Number)
    }
}

impl Evaluator for StructuredEvaluator {
    fn evaluate(
        &self,
        expression: Expression,
        context: &EvalContext<'_>,
    ) -> matchmaker::Result<EvalValue> {
        match expression {
            Expression::Requirements => {
                let matched = requirements_met(
                    context.request.attributes.get(REQUIREMENTS_ATTR),
                    &context.offer.attributes,
                )? && requirements_met(
                    context.offer.attributes.get(REQUIREMENTS_ATTR),
                    &context.request.attributes,
                )?;
                Ok(EvalValue::Bool(matched))
            }
            Expression::JobRank => self.job_rank(context),
            Expression::StartdRank => Ok(self.startd_rank(context)),
            Expression::PreJobRank => Ok(match &self.config.pre_job_rank {
                PreJobRank::StartdRank => self.startd_rank(context),
                PreJobRank::Attribute(attr) => numeric_attr(&context.offer.attributes, attr),
                PreJobRank::None => EvalValue::Undefined,
            }),
            Expression::PostJobRank => Ok(self
                .config
                .post_job_rank
                .as_deref()
                .map_or(EvalValue::Undefined, |attr| {
                    numeric_attr(&context.offer.attributes, attr)
                })),
            Expression::PreemptionRequirements => {
                let Some(ratio) = self.config.preemption_priority_ratio else {
                    return Ok(EvalValue::Undefined);
                };
                Ok(match context.remote_user_priority {
                    Some(remote) => EvalValue::Bool(remote >= ratio * context.submitter_priority),
                    None => EvalValue::Bool(true),
                })
            }
            // Preempt the claim of the worst priority first
            Expression::PreemptionRank => Ok(context
                .remote_user_priority
                .map_or(EvalValue::Undefined, EvalValue::Number)),
        }
    }

    fn is_defined(&self, expression: Expression) -> bool {
        match expression {
            Expression::PreemptionRequirements => self.config.preemption_priority_ratio.is_some(),
            Expression::PreJobRank => self.config.pre_job_rank != PreJobRank::None,
            Expression::PostJobRank => self.config.post_job_rank.is_some(),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EvaluatorConfig, PreJobRank, StructuredEvaluator};
    use matchmaker::ledger::{LedgerConfig, UsageLedger};
    use matchmaker::matching::{
        EvalContext, EvalValue, Evaluator, Expression, MatchConfig, MatchEngine, MatchRequest,
        OfferPool, PreemptState, SpendState,
    };
    use matchmaker::records::{JobRequest, Offer, OfferClaim};
    use serde_json::json;

    fn offer(attributes: serde_json::Value) -> Offer {
        let mut offer = Offer::new("slot1");
        offer.attributes = serde_json::from_value(attributes).unwrap();
        offer
    }

    fn job(attributes: serde_json::Value) -> JobRequest {
        let mut job = JobRequest::new("1");
        job.attributes = serde_json::from_value(attributes).unwrap();
        job
    }

    fn eval(
        evaluator: &StructuredEvaluator,
        expression: Expression,
        job: &JobRequest,
        offer: &Offer,
    ) -> matchmaker::Result<EvalValue> {
        evaluator.evaluate(
            expression,
            &EvalContext {
                request: job,
                offer,
                submitter: "alice",
                submitter_priority: 500.0,
                remote_user_priority: Some(1000.0),
            },
        )
    }

    #[test]
    fn test_requirements() {
        let evaluator = StructuredEvaluator::default();
        let offer = offer(json!({"arch": "x86", "memory": 16}));
        let matching = job(json!({"requirements": {"arch": "x86", "memory": {"min": 8}}}));
        let too_big = job(json!({"requirements": {"memory": {"min": 8, "max": 12}}}));
        let other_arch = job(json!({"requirements": {"arch": "arm"}}));
        let missing = job(json!({"requirements": {"gpus": {"min": 1}}}));

        for (job, expected) in [
            (matching, true),
            (too_big, false),
            (other_arch, false),
            (missing, false),
            (job(json!({})), true),
        ] {
            assert_eq!(
                eval(&evaluator, Expression::Requirements, &job, &offer).unwrap(),
                EvalValue::Bool(expected)
            );
        }
    }

    #[test]
    fn test_offer_requirements() {
        let evaluator = StructuredEvaluator::default();
        let offer = offer(json!({"requirements": {"owner": "physics"}}));
        let result = eval(
            &evaluator,
            Expression::Requirements,
            &job(json!({"owner": "chem"})),
            &offer,
        );
        assert_eq!(result.unwrap(), EvalValue::Bool(false));
    }

    #[test]
    fn test_malformed_requirements() {
        let evaluator = StructuredEvaluator::default();
        let offer = offer(json!({"memory": 4}));
        let result = eval(
            &evaluator,
            Expression::Requirements,
            &job(json!({"requirements": {"memory": {"min": "lots"}}})),
            &offer,
        );
        assert!(result.is_err_and(|e| e.is_recoverable()));
        assert!(
            eval(
                &evaluator,
                Expression::Requirements,
                &job(json!({"requirements": ["memory"]})),
                &offer
            )
            .is_err()
        );
    }

    #[test]
    fn test_ranks() {
        let evaluator = StructuredEvaluator::default();
        let offer = offer(json!({"mips": 2500, "rank": {"alice": 10, "*": 1}}));
        let job = job(json!({"rank": "mips"}));
        assert_eq!(
            eval(&evaluator, Expression::JobRank, &job, &offer).unwrap(),
            EvalValue::Number(2500.0)
        );
        assert_eq!(
            eval(&evaluator, Expression::StartdRank, &job, &offer).unwrap(),
            EvalValue::Number(10.0)
        );
        assert!(evaluator.is_defined(Expression::PreJobRank));
        assert_eq!(
            eval(&evaluator, Expression::PreJobRank, &job, &offer).unwrap(),
            EvalValue::Number(10.0)
        );

        let by_attribute = StructuredEvaluator::new(EvaluatorConfig {
            pre_job_rank: PreJobRank::Attribute("mips".to_string()),
            ..Default::default()
        });
        assert_eq!(
            eval(&by_attribute, Expression::PreJobRank, &job, &offer).unwrap(),
            EvalValue::Number(2500.0)
        );
        let without = StructuredEvaluator::new(EvaluatorConfig {
            pre_job_rank: PreJobRank::None,
            ..Default::default()
        });
        assert!(!without.is_defined(Expression::PreJobRank));
        assert_eq!(
            eval(&without, Expression::PreJobRank, &job, &offer).unwrap(),
            EvalValue::Undefined
        );
    }

    #[test]
    fn test_config_names() {
        let config: EvaluatorConfig = toml::from_str(r#"pre_job_rank = "none""#).unwrap();
        assert_eq!(config.pre_job_rank, PreJobRank::None);
        let config: EvaluatorConfig =
            toml::from_str(r#"pre_job_rank = { attribute = "mips" }"#).unwrap();
        assert_eq!(config.pre_job_rank, PreJobRank::Attribute("mips".to_string()));
        let config: EvaluatorConfig = toml::from_str("").unwrap();
        assert_eq!(config.pre_job_rank, PreJobRank::StartdRank);
    }

    #[test]
    fn test_offer_preferring_request_wins() {
        let evaluator = StructuredEvaluator::new(EvaluatorConfig::default());
        let ledger = UsageLedger::new(LedgerConfig::default());
        let mut claimed = offer(json!({"rank": {"alice": 5}}));
        claimed.name = "x".to_string();
        claimed.claim = Some(OfferClaim {
            remote_user: "bob".to_string(),
            current_rank: 1.0,
            concurrency_limits: None,
        });
        let mut alt = offer(json!({}));
        alt.name = "alt".to_string();
        let pool = OfferPool::new(vec![alt, claimed]);

        let job = job(json!({}));
        let request = MatchRequest {
            request: &job,
            submitter: "alice",
            submitter_priority: 500.0,
            spend: SpendState {
                limit: 10.0,
                limit_unclaimed: 10.0,
                pie_left: 10.0,
                ..Default::default()
            },
        };
        let best = MatchEngine::new(&evaluator, &ledger, MatchConfig::default())
            .find_best_match(&pool, &request, None)
            .unwrap()
            .best
            .unwrap();
        assert_eq!(pool.get(best.offer).unwrap().name, "x");
        assert_eq!(best.preempt_state, PreemptState::RankPreemption);
    }

    #[test]
    fn test_preemption_policy() {
        let evaluator = StructuredEvaluator::default();
        let (job, offer) = (job(json!({})), offer(json!({})));
        assert!(!evaluator.is_defined(Expression::PreemptionRequirements));
        assert_eq!(
            eval(&evaluator, Expression::PreemptionRank, &job, &offer).unwrap(),
            EvalValue::Number(1000.0)
        );

        let strict = StructuredEvaluator::new(EvaluatorConfig {
            preemption_priority_ratio: Some(4.0),
            ..Default::default()
        });
        assert!(strict.is_defined(Expression::PreemptionRequirements));
        assert_eq!(
            eval(&strict, Expression::PreemptionRequirements, &job, &offer).unwrap(),
            EvalValue::Bool(false)
        );
        let lenient = StructuredEvaluator::new(EvaluatorConfig {
            preemption_priority_ratio: Some(1.5),
            ..Default::default()
        });
        assert_eq!(
            eval(&lenient, Expression::PreemptionRequirements, &job, &offer).unwrap(),
            EvalValue::Bool(true)
        );
    }
}

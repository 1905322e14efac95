use crate::internal::ledger::{LedgerConfig, LimitsConfig, UsageLedger};
use crate::internal::matching::{
    MatchConfig, MatchEngine, MatchListCache, MatchOutcome, MatchRequest, OfferPool, PreemptState,
    SpendState,
};
use crate::internal::records::{JobRequest, Offer};
use crate::internal::tests::utils::evaluator::TestEvaluator;
use crate::internal::tests::utils::records::{JobBuilder, OfferBuilder};

fn open_spend() -> SpendState {
    SpendState {
        limit: 100.0,
        limit_unclaimed: 100.0,
        pie_left: 100.0,
        ..Default::default()
    }
}

fn request<'a>(job: &'a JobRequest, priority: f64) -> MatchRequest<'a> {
    MatchRequest {
        request: job,
        submitter: "alice",
        submitter_priority: priority,
        spend: open_spend(),
    }
}

struct Fixture {
    ledger: UsageLedger,
    evaluator: TestEvaluator,
    config: MatchConfig,
}

impl Fixture {
    fn new() -> Self {
        Fixture {
            ledger: UsageLedger::new(LedgerConfig::default()),
            evaluator: TestEvaluator::new(),
            config: MatchConfig::default(),
        }
    }

    fn find(&self, pool: &OfferPool, request: &MatchRequest<'_>) -> MatchOutcome {
        MatchEngine::new(&self.evaluator, &self.ledger, self.config)
            .find_best_match(pool, request, None)
            .unwrap()
    }

    fn best_name(&self, offers: Vec<Offer>, request: &MatchRequest<'_>) -> Option<String> {
        let pool = OfferPool::new(offers);
        self.find(&pool, request)
            .best
            .map(|c| pool.get(c.offer).unwrap().name.clone())
    }

    fn reason(&self, offers: Vec<Offer>, request: &MatchRequest<'_>) -> String {
        let pool = OfferPool::new(offers);
        let outcome = self.find(&pool, request);
        assert!(outcome.best.is_none());
        outcome.rejections.reason(
            outcome.rejected_limit.as_deref(),
            request.spend.ignore_submitter_limit,
        )
    }
}

#[test]
fn test_prefers_unclaimed_offer() {
    let f = Fixture::new();
    let job = JobRequest::new("j1");
    let offers = vec![
        OfferBuilder::new("claimed").claimed_by("bob", 0.0).build(),
        OfferBuilder::new("free").build(),
    ];
    assert_eq!(f.best_name(offers, &request(&job, 100.0)).unwrap(), "free");
}

#[test]
fn test_offer_preferring_request_beats_unclaimed_offer() {
    let f = Fixture::new();
    let job = JobRequest::new("j1");
    let offers = vec![
        OfferBuilder::new("alt").build(),
        OfferBuilder::new("x")
            .claimed_by("bob", 1.0)
            .startd_rank("alice", 5.0)
            .build(),
    ];
    let pool = OfferPool::new(offers);
    let best = f.find(&pool, &request(&job, 100.0)).best.unwrap();
    assert_eq!(pool.get(best.offer).unwrap().name, "x");
    assert_eq!(best.preempt_state, PreemptState::RankPreemption);
}

#[test]
fn test_job_rank_orders_offers() {
    let f = Fixture::new();
    let job = JobBuilder::new("j1").rank_by("mips").build();
    let offers = vec![
        OfferBuilder::new("slow").attr("mips", 10).build(),
        OfferBuilder::new("fast").attr("mips", 20).build(),
        OfferBuilder::new("unknown").build(),
    ];
    assert_eq!(f.best_name(offers, &request(&job, 100.0)).unwrap(), "fast");
}

#[test]
fn test_pre_job_rank_beats_job_rank() {
    let f = Fixture::new();
    let job = JobBuilder::new("j1").rank_by("mips").build();
    let offers = vec![
        OfferBuilder::new("fast").attr("mips", 100).build(),
        OfferBuilder::new("preferred")
            .attr("mips", 1)
            .startd_rank("alice", 5.0)
            .build(),
    ];
    assert_eq!(
        f.best_name(offers, &request(&job, 100.0)).unwrap(),
        "preferred"
    );
}

#[test]
fn test_requirements_filter_offers() {
    let f = Fixture::new();
    let job = JobBuilder::new("j1").requires("arch", "arm").build();
    let offers = vec![
        OfferBuilder::new("x86").attr("arch", "x86").build(),
        OfferBuilder::new("arm").attr("arch", "arm").build(),
    ];
    assert_eq!(f.best_name(offers, &request(&job, 100.0)).unwrap(), "arm");

    let offers = vec![OfferBuilder::new("x86").attr("arch", "x86").build()];
    let pool = OfferPool::new(offers);
    let outcome = f.find(&pool, &request(&job, 100.0));
    assert_eq!(outcome.rejections.unmatched, 1);
    assert_eq!(
        outcome.rejections.reason(None, false),
        "no match found"
    );
}

#[test]
fn test_evaluation_error_skips_offer() {
    let f = Fixture::new();
    let job = JobRequest::new("j1");
    let offers = vec![
        OfferBuilder::new("broken").attr("broken", true).build(),
        OfferBuilder::new("ok").build(),
    ];
    let pool = OfferPool::new(offers);
    let outcome = f.find(&pool, &request(&job, 100.0));
    assert_eq!(outcome.rejections.evaluation_errors, 1);
    assert_eq!(pool.get(outcome.best.unwrap().offer).unwrap().name, "ok");
}

#[test]
fn test_rank_preemption() {
    let f = Fixture::new();
    let job = JobRequest::new("j1");
    let offers = vec![
        OfferBuilder::new("slot")
            .claimed_by("bob", 1.0)
            .startd_rank("alice", 5.0)
            .build(),
    ];
    // Worse priority than the claimant does not matter for rank preemption
    let pool = OfferPool::new(offers);
    let outcome = f.find(&pool, &request(&job, 10_000.0));
    assert_eq!(
        outcome.best.unwrap().preempt_state,
        PreemptState::RankPreemption
    );
}

#[test]
fn test_only_startd_rank_mode() {
    let f = Fixture::new();
    let job = JobRequest::new("j1");
    let offers = vec![
        OfferBuilder::new("free").build(),
        OfferBuilder::new("claimed").claimed_by("bob", 3.0).build(),
        OfferBuilder::new("ranked")
            .claimed_by("bob", 1.0)
            .startd_rank("alice", 2.0)
            .build(),
    ];
    let pool = OfferPool::new(offers);
    let mut req = request(&job, 100.0);
    req.spend.only_consider_startd_rank = true;
    let outcome = f.find(&pool, &req);
    assert_eq!(pool.get(outcome.best.unwrap().offer).unwrap().name, "ranked");
    assert_eq!(outcome.rejections.preemption_rank, 1);
}

#[test]
fn test_priority_preemption() {
    let mut f = Fixture::new();
    f.ledger.set_priority("carol", 3.0).unwrap();
    let job = JobRequest::new("j1");
    let offers = || {
        vec![
            OfferBuilder::new("bob-slot").claimed_by("bob", 0.0).build(),
            OfferBuilder::new("carol-slot").claimed_by("carol", 0.0).build(),
        ]
    };
    // The claimant with the worst priority is preempted first
    assert_eq!(
        f.best_name(offers(), &request(&job, 100.0)).unwrap(),
        "carol-slot"
    );
    // Better than carol (3000) but worse than bob (500)
    assert_eq!(
        f.best_name(offers(), &request(&job, 1000.0)).unwrap(),
        "carol-slot"
    );
    assert_eq!(
        f.reason(offers(), &request(&job, 5000.0)),
        "insufficient priority"
    );

    f.config.preemption_priority_delta = 2950.0;
    assert_eq!(
        f.reason(offers(), &request(&job, 100.0)),
        "insufficient priority"
    );
}

#[test]
fn test_own_claim_is_not_preempted() {
    let f = Fixture::new();
    let job = JobRequest::new("j1");
    let offers = vec![OfferBuilder::new("slot").claimed_by("alice", 0.0).build()];
    let pool = OfferPool::new(offers);
    let outcome = f.find(&pool, &request(&job, 100.0));
    assert!(outcome.best.is_none());
    assert_eq!(outcome.rejections.total(), 0);
}

#[test]
fn test_preemption_requirements() {
    let mut f = Fixture::new();
    f.evaluator.preemption_requirements = Some(false);
    let job = JobRequest::new("j1");
    let offers = vec![OfferBuilder::new("slot").claimed_by("bob", 0.0).build()];
    assert_eq!(
        f.reason(offers.clone(), &request(&job, 100.0)),
        "PREEMPTION_REQUIREMENTS == False"
    );

    f.evaluator.preemption_requirements = Some(true);
    assert_eq!(f.best_name(offers, &request(&job, 100.0)).unwrap(), "slot");
}

#[test]
fn test_preemption_disabled() {
    let mut f = Fixture::new();
    f.config.consider_preemption = false;
    let job = JobRequest::new("j1");
    let offers = vec![
        OfferBuilder::new("slot")
            .claimed_by("bob", 0.0)
            .startd_rank("alice", 10.0)
            .build(),
    ];
    assert_eq!(f.reason(offers, &request(&job, 100.0)), "no match found");
}

#[test]
fn test_submitter_limit() {
    let f = Fixture::new();
    let job = JobRequest::new("j1");
    let offers = vec![OfferBuilder::new("slot").build()];
    let mut req = request(&job, 100.0);
    req.spend.limit_unclaimed = 1.0;
    req.spend.limit_used_unclaimed = 1.0;
    assert_eq!(f.reason(offers.clone(), &req), "submitter limit exceeded");

    // Nothing received yet: one round-up is allowed
    req.spend.limit_unclaimed = 0.5;
    req.spend.limit_used_unclaimed = 0.0;
    assert_eq!(f.best_name(offers, &req).unwrap(), "slot");
}

#[test]
fn test_priority_preemption_ignores_limit_when_asked() {
    let f = Fixture::new();
    let job = JobRequest::new("j1");
    let offers = vec![OfferBuilder::new("slot").claimed_by("bob", 0.0).build()];
    let mut req = request(&job, 100.0);
    req.spend.limit = 1.0;
    req.spend.limit_used = 1.0;
    assert_eq!(f.reason(offers.clone(), &req), "submitter limit exceeded");
    req.spend.ignore_submitter_limit = true;
    assert_eq!(f.best_name(offers, &req).unwrap(), "slot");
}

#[test]
fn test_concurrency_limits() {
    let mut f = Fixture::new();
    let mut limits = LimitsConfig::default();
    limits.maxima.insert("license".to_string(), 1.0);
    f.ledger.set_config(LedgerConfig {
        limits,
        ..Default::default()
    });
    f.ledger
        .add_match("bob", "busy", 1.0, Some("license"), 0)
        .unwrap();

    let job = JobBuilder::new("j1").limits("license").build();
    let offers = vec![OfferBuilder::new("free").build()];
    assert_eq!(
        f.reason(offers, &request(&job, 100.0)),
        "concurrency limit license reached"
    );

    // Preempting the claim that holds the license releases it
    let offers = vec![
        OfferBuilder::new("busy")
            .claimed_by("bob", 0.0)
            .claim_limits("license")
            .build(),
    ];
    assert_eq!(f.best_name(offers, &request(&job, 100.0)).unwrap(), "busy");
}

#[test]
fn test_invalid_limits_are_an_error() {
    let f = Fixture::new();
    let job = JobBuilder::new("j1").limits("license:-1").build();
    let pool = OfferPool::new(vec![OfferBuilder::new("slot").build()]);
    let result = MatchEngine::new(&f.evaluator, &f.ledger, f.config).find_best_match(
        &pool,
        &request(&job, 100.0),
        None,
    );
    assert!(result.is_err_and(|e| e.is_recoverable()));
}

#[test]
fn test_match_list_cache() {
    let f = Fixture::new();
    let mut pool = OfferPool::new(
        (0..3)
            .map(|i| {
                OfferBuilder::new(&format!("slot{i}"))
                    .attr("mips", i)
                    .build()
            })
            .collect(),
    );
    let jobs: Vec<JobRequest> = (0..3)
        .map(|i| {
            JobBuilder::new(&format!("j{i}"))
                .autocluster(7)
                .rank_by("mips")
                .build()
        })
        .collect();
    let engine = MatchEngine::new(&f.evaluator, &f.ledger, f.config);
    let mut cache = MatchListCache::new();

    let best = engine
        .find_best_match(&pool, &request(&jobs[0], 100.0), Some(&mut cache))
        .unwrap()
        .best
        .unwrap();
    assert_eq!(pool.get(best.offer).unwrap().name, "slot2");
    assert_eq!(f.evaluator.requirement_evaluations(), 3);
    assert_eq!(cache.len(), 2);

    pool.remove(best.offer);
    let best = engine
        .find_best_match(&pool, &request(&jobs[1], 100.0), Some(&mut cache))
        .unwrap()
        .best
        .unwrap();
    assert_eq!(pool.get(best.offer).unwrap().name, "slot1");
    assert_eq!(f.evaluator.requirement_evaluations(), 3);
    assert_eq!(cache.hits(), 1);

    // Another submitter priority means another list
    engine
        .find_best_match(&pool, &request(&jobs[2], 200.0), Some(&mut cache))
        .unwrap();
    assert_eq!(cache.misses(), 2);
    assert_eq!(f.evaluator.requirement_evaluations(), 5);
}

#[test]
fn test_cache_not_used_for_unstable_preemption() {
    let mut f = Fixture::new();
    f.evaluator.unstable = true;
    let pool = OfferPool::new(vec![
        OfferBuilder::new("slot0").build(),
        OfferBuilder::new("slot1").build(),
    ]);
    let job = JobBuilder::new("j").autocluster(1).build();
    let engine = MatchEngine::new(&f.evaluator, &f.ledger, f.config);
    let mut cache = MatchListCache::new();
    for _ in 0..2 {
        engine
            .find_best_match(&pool, &request(&job, 100.0), Some(&mut cache))
            .unwrap();
    }
    assert_eq!(cache.hits(), 0);
    assert!(cache.is_empty());
    assert_eq!(f.evaluator.requirement_evaluations(), 4);
}

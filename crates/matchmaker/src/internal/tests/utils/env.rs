use crate::internal::ledger::{LedgerConfig, Timestamp, UsageLedger};
use crate::internal::negotiation::{CycleRecord, Negotiator, NegotiatorConfig};
use crate::internal::quota::QuotaTreeConfig;
use crate::internal::records::{JobRequest, Offer};
use crate::internal::tests::utils::comm::TestComm;
use crate::internal::tests::utils::evaluator::TestEvaluator;
use crate::internal::tests::utils::records::{OfferBuilder, simple_jobs};

pub const CYCLE_PERIOD: Timestamp = 60;

pub struct TestEnv {
    pub negotiator: Negotiator,
    pub comm: TestComm,
    pub evaluator: TestEvaluator,
    pub now: Timestamp,
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnv {
    pub fn new() -> TestEnv {
        Self::with_config(NegotiatorConfig::default(), QuotaTreeConfig::default())
    }

    pub fn with_config(config: NegotiatorConfig, quota: QuotaTreeConfig) -> TestEnv {
        Self::with_ledger(config, quota, UsageLedger::new(LedgerConfig::default()))
    }

    pub fn with_ledger(
        config: NegotiatorConfig,
        quota: QuotaTreeConfig,
        ledger: UsageLedger,
    ) -> TestEnv {
        TestEnv {
            negotiator: Negotiator::new(config, quota, ledger).unwrap().with_seed(7),
            comm: TestComm::new(),
            evaluator: TestEvaluator::new(),
            now: 1_000_000,
        }
    }

    pub fn ledger(&self) -> &UsageLedger {
        self.negotiator.ledger()
    }

    pub fn ledger_mut(&mut self) -> &mut UsageLedger {
        self.negotiator.ledger_mut()
    }

    pub fn new_offer(&mut self, offer: Offer) {
        self.comm.offers.push(offer);
    }

    /// Adds `count` unclaimed offers of weight 1 named `{prefix}{i}`.
    pub fn new_offers(&mut self, prefix: &str, count: usize) {
        for i in 0..count {
            self.new_offer(OfferBuilder::new(&format!("{prefix}{i}")).build());
        }
    }

    /// Adds a submitter with `count` identical requests.
    pub fn new_submitter(&mut self, name: &str, count: usize) {
        self.comm.add_jobs(name, simple_jobs(name, count));
    }

    pub fn submit(&mut self, name: &str, job: JobRequest) {
        self.comm.add_jobs(name, vec![job]);
    }

    /// Runs one cycle, `CYCLE_PERIOD` seconds after the previous one.
    pub fn cycle(&mut self) -> CycleRecord {
        self.now += CYCLE_PERIOD;
        self.negotiator
            .run_cycle(&mut self.comm, &self.evaluator, self.now)
            .unwrap()
    }

    pub fn grants_of(&self, submitter: &str) -> usize {
        self.comm.grants_of(submitter).len()
    }
}

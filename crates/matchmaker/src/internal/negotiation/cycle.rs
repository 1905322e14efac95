use crate::WrappedRcRefCell;
use crate::internal::common::error::MatchmakerError;
use crate::internal::ledger::{LedgerConfig, Timestamp, UsageLedger};
use crate::internal::matching::{Evaluator, OfferPool};
use crate::internal::negotiation::comm::NegotiatorComm;
use crate::internal::negotiation::config::NegotiatorConfig;
use crate::internal::negotiation::context::CycleContext;
use crate::internal::negotiation::groups::{
    GroupBuckets, negotiate_group, negotiate_with_all_groups, prepare_quotas,
};
use crate::internal::negotiation::pie::PieGroup;
use crate::internal::negotiation::record::{CycleHistory, CycleRecord};
use crate::internal::negotiation::sort::{SubmitterEntry, sort_submitters};
use crate::internal::quota::{QuotaTree, QuotaTreeConfig};
use crate::internal::records::{Offer, Snapshot, SubmitterAd};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    FetchSnapshots,
    RefreshAccounting,
    RefreshQuotas,
    SortConsumers,
    PieSlice,
}

/// New configuration; `None` keeps the current value.
#[derive(Debug, Clone, Default)]
pub struct Reconfiguration {
    pub negotiator: Option<NegotiatorConfig>,
    pub ledger: Option<LedgerConfig>,
    pub quota: Option<QuotaTreeConfig>,
}

impl Reconfiguration {
    fn merge(&mut self, newer: Reconfiguration) {
        if newer.negotiator.is_some() {
            self.negotiator = newer.negotiator;
        }
        if newer.ledger.is_some() {
            self.ledger = newer.ledger;
        }
        if newer.quota.is_some() {
            self.quota = newer.quota;
        }
    }
}

/// Reconfiguration requests that the negotiator picks up once it is idle.
#[derive(Debug, Clone, Default)]
pub struct ReconfigQueue {
    pending: WrappedRcRefCell<Option<Reconfiguration>>,
}

impl ReconfigQueue {
    pub fn request(&self, reconfiguration: Reconfiguration) {
        let mut pending = self.pending.get_mut();
        match pending.as_mut() {
            Some(current) => current.merge(reconfiguration),
            None => *pending = Some(reconfiguration),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.get().is_some()
    }

    fn take(&self) -> Option<Reconfiguration> {
        self.pending.get_mut().take()
    }
}

/// Owns the ledger and the quota tree and runs negotiation cycles.
pub struct Negotiator {
    config: NegotiatorConfig,
    quota_config: QuotaTreeConfig,
    ledger: UsageLedger,
    tree: QuotaTree,
    phase: CyclePhase,
    reconfig: ReconfigQueue,
    history: CycleHistory,
    rng: SmallRng,
}

fn build_tree(
    config: &NegotiatorConfig,
    quota_config: &QuotaTreeConfig,
    previous: Option<&QuotaTree>,
) -> crate::Result<QuotaTree> {
    let mut quota_config = quota_config.clone();
    quota_config.allow_oversubscription |= config.allow_quota_oversubscription;
    match previous {
        Some(previous) => QuotaTree::rebuild(&quota_config, previous),
        None => QuotaTree::build(&quota_config),
    }
}

impl Negotiator {
    pub fn new(
        config: NegotiatorConfig,
        quota_config: QuotaTreeConfig,
        mut ledger: UsageLedger,
    ) -> crate::Result<Self> {
        let tree = build_tree(&config, &quota_config, None)?;
        ledger.set_groups(tree.resolver());
        Ok(Negotiator {
            history: CycleHistory::new(config.history_size),
            config,
            quota_config,
            ledger,
            tree,
            phase: CyclePhase::Idle,
            reconfig: ReconfigQueue::default(),
            rng: SmallRng::from_os_rng(),
        })
    }

    /// Makes the submitter tie-break reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn config(&self) -> &NegotiatorConfig {
        &self.config
    }

    pub fn quota_config(&self) -> &QuotaTreeConfig {
        &self.quota_config
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut UsageLedger {
        &mut self.ledger
    }

    pub fn tree(&self) -> &QuotaTree {
        &self.tree
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn history(&self) -> &CycleHistory {
        &self.history
    }

    /// Handle for requesting a reconfiguration from outside of the cycle.
    pub fn reconfig_queue(&self) -> ReconfigQueue {
        self.reconfig.clone()
    }

    /// Applies the reconfiguration now when idle, otherwise when the running
    /// cycle finishes.
    pub fn reconfigure(&mut self, reconfiguration: Reconfiguration) -> crate::Result<()> {
        self.reconfig.request(reconfiguration);
        if self.phase == CyclePhase::Idle {
            self.apply_pending()?;
        }
        Ok(())
    }

    fn apply_pending(&mut self) -> crate::Result<()> {
        let Some(reconfiguration) = self.reconfig.take() else {
            return Ok(());
        };
        let config = reconfiguration
            .negotiator
            .unwrap_or_else(|| self.config.clone());
        let quota_config = reconfiguration
            .quota
            .unwrap_or_else(|| self.quota_config.clone());
        let tree = build_tree(&config, &quota_config, Some(&self.tree))?;

        log::info!("Applying new configuration ({} groups)", tree.len() - 1);
        if let Some(ledger_config) = reconfiguration.ledger {
            self.ledger.set_config(ledger_config);
        }
        self.ledger.set_groups(tree.resolver());
        self.history.set_capacity(config.history_size);
        self.tree = tree;
        self.config = config;
        self.quota_config = quota_config;
        Ok(())
    }

    /// Runs one complete negotiation cycle.
    ///
    /// A cycle that fails for a non-fatal reason is abandoned; the returned
    /// record carries the reason. Only fatal errors are returned.
    pub fn run_cycle(
        &mut self,
        comm: &mut dyn NegotiatorComm,
        evaluator: &dyn Evaluator,
        now: Timestamp,
    ) -> crate::Result<CycleRecord> {
        self.apply_pending()?;
        let started = Instant::now();
        let mut record = CycleRecord::new(now);
        log::info!("---------- Started negotiation cycle ----------");
        let result = self.run_phases(comm, evaluator, now, started, &mut record);
        self.phase = CyclePhase::Idle;
        record.duration = started.elapsed();

        match result {
            Ok(()) => log::info!(
                "---------- Finished negotiation cycle: {} matches, {} rejections in {:?} ----------",
                record.matches,
                record.rejections.total(),
                record.duration
            ),
            Err(error) if error.is_fatal() => {
                log::error!("Negotiation cycle failed: {error}");
                return Err(error);
            }
            Err(error) => {
                log::error!("Negotiation cycle abandoned: {error}");
                record.aborted = Some(error.to_string());
            }
        }
        self.history.push(record.clone());
        self.apply_pending()?;
        Ok(record)
    }

    fn run_phases(
        &mut self,
        comm: &mut dyn NegotiatorComm,
        evaluator: &dyn Evaluator,
        now: Timestamp,
        started: Instant,
        record: &mut CycleRecord,
    ) -> crate::Result<()> {
        self.phase = CyclePhase::FetchSnapshots;
        let snapshot = timed_phase!(record.fetch_duration, "fetch_snapshots", {
            comm.fetch_snapshot()
        })
        .map_err(|error| match error {
            error @ MatchmakerError::Config(_) => error,
            error => MatchmakerError::Inventory(error.to_string()),
        })?;
        let Snapshot { offers, submitters } = snapshot;
        record.offers_seen = offers.len();
        record.submitters_seen = submitters.len();
        let offers = valid_offers(offers);
        let submitters = valid_submitters(submitters);

        self.phase = CyclePhase::RefreshAccounting;
        timed_phase!(record.accounting_duration, "refresh_accounting", {
            self.ledger.update_priorities(now)?;
            self.ledger.reconcile(&offers, now)
        })?;

        self.phase = CyclePhase::RefreshQuotas;
        let mut pool = OfferPool::new(offers);
        let use_slot_weights = self.config.use_slot_weights;
        let pool_weight = pool.total_weight(use_slot_weights);
        record.pool_size = pool_weight;
        let mut entries = Vec::with_capacity(submitters.len());
        for ad in submitters {
            entries.push(SubmitterEntry::new(ad, 0.0, &mut self.rng));
        }
        let mut buckets = timed_phase!(record.quota_duration, "refresh_quotas", {
            let buckets = GroupBuckets::build(&self.tree, &self.ledger, entries);
            if !self.tree.is_flat() {
                prepare_quotas(
                    &mut self.tree,
                    &buckets,
                    &self.ledger,
                    pool_weight,
                    use_slot_weights,
                );
            }
            buckets
        });

        self.phase = CyclePhase::SortConsumers;
        timed_phase!(record.sort_duration, "sort_consumers", {
            for id in self.tree.ids() {
                let bucket = buckets.get_mut(id);
                for entry in bucket.iter_mut() {
                    entry.priority = self.ledger.ensure_materialized(entry.name())?;
                }
                sort_submitters(bucket, self.config.use_job_priority_in_sort);
            }
        });

        self.phase = CyclePhase::PieSlice;
        let min_slot_weight = if use_slot_weights {
            pool.min_slot_weight()
        } else {
            1.0
        };
        let mut ctx = CycleContext {
            ledger: &mut self.ledger,
            pool: &mut pool,
            comm,
            evaluator,
            config: &self.config,
            record,
            now,
            deadline: started + self.config.max_time_per_cycle,
            pool_weight,
            min_slot_weight,
            time_spent: Default::default(),
        };
        let tree = &mut self.tree;
        timed_phase!(ctx.record.pie_duration, "pie_slice", {
            if tree.is_flat() {
                let root = tree.root();
                negotiate_group(&mut ctx, buckets.get_mut(root), PieGroup::unlimited())
            } else {
                negotiate_with_all_groups(&mut ctx, tree, &mut buckets, pool_weight)
            }
        })
    }
}

/// Drops offers that cannot be matched.
fn valid_offers(offers: Vec<Offer>) -> Vec<Offer> {
    offers
        .into_iter()
        .filter(|offer| {
            let valid = !offer.name.is_empty()
                && offer.slot_weight.is_finite()
                && offer.slot_weight > 0.0;
            if !valid {
                log::warn!("Ignoring malformed offer '{}'", offer.name);
            }
            valid
        })
        .collect()
}

fn valid_submitters(submitters: Vec<SubmitterAd>) -> Vec<SubmitterAd> {
    let mut seen = crate::Set::default();
    submitters
        .into_iter()
        .filter(|ad| {
            if ad.name.is_empty() {
                log::warn!("Ignoring submitter without a name");
                return false;
            }
            if !seen.insert(ad.name.clone()) {
                log::warn!("Ignoring duplicate submitter {}", ad.name);
                return false;
            }
            true
        })
        .collect()
}

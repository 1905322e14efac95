use crate::internal::common::error::MatchmakerError;
use crate::internal::common::utils::non_negative;
use crate::internal::ledger::account::ConsumerAccount;
use crate::internal::ledger::claim::ResourceClaim;
use crate::internal::ledger::config::{LedgerConfig, MIN_PRIORITY_FACTOR};
use crate::internal::ledger::groups::{GroupResolver, group_path};
use crate::internal::ledger::journal::{
    AttrValue, LedgerJournal, LogEntry, RecordKey, committed_entries,
};
use crate::internal::ledger::limits::{ConcurrencyLimits, LimitRequest, parse_limits};
use crate::internal::ledger::report::{AccountReport, ClaimReport};
use crate::internal::ledger::Timestamp;
use crate::internal::quota::ROOT_GROUP_NAME;
use crate::internal::records::Offer;
use crate::Map;
use std::path::Path;

const ATTR_LAST_UPDATE_TIME: &str = "LastUpdateTime";

/// Returns the domain part (after `@`) of a consumer name.
pub fn get_domain(name: &str) -> Option<&str> {
    name.split_once('@').map(|(_, domain)| domain)
}

/// Usage and priority records of all consumers and all claimed resources.
///
/// Every mutating operation is written to the journal as one transaction.
pub struct UsageLedger {
    config: LedgerConfig,
    accounts: Map<String, ConsumerAccount>,
    claims: Map<String, ResourceClaim>,
    last_update_time: Timestamp,
    limits: ConcurrencyLimits,
    groups: GroupResolver,
    journal: Option<LedgerJournal>,
    transaction: Vec<LogEntry>,
    /// Journal size right after the last compaction.
    compacted_size: u64,
}

impl UsageLedger {
    /// Creates a ledger that is not backed by a journal.
    pub fn new(config: LedgerConfig) -> Self {
        UsageLedger {
            limits: ConcurrencyLimits::new(config.limits.clone()),
            config,
            accounts: Default::default(),
            claims: Default::default(),
            last_update_time: 0,
            groups: Default::default(),
            journal: None,
            transaction: Vec::new(),
            compacted_size: 0,
        }
    }

    /// Replays the journal at `path` (creating it when missing).
    pub fn open(config: LedgerConfig, path: &Path, now: Timestamp) -> crate::Result<Self> {
        let (journal, entries) = LedgerJournal::open(path).map_err(|error| match error {
            MatchmakerError::Io(error) => MatchmakerError::Config(format!(
                "Cannot open ledger journal {}: {error}",
                path.display()
            )),
            error => error,
        })?;
        let mut ledger = Self::new(config);
        let entries = committed_entries(entries);
        log::debug!("Replaying {} ledger journal entries", entries.len());
        ledger.replay(entries);
        ledger.journal = Some(journal);
        if ledger.last_update_time == 0 {
            ledger.begin();
            ledger.set_last_update_time(now);
            ledger.commit()?;
        }
        ledger.check_claim_counters()?;
        ledger.reload_limits();
        log::info!(
            "Ledger loaded: {} accounts, {} claims",
            ledger.accounts.len(),
            ledger.claims.len()
        );
        Ok(ledger)
    }

    /// Replays the journal at `path` without taking it over. Changes made to
    /// the returned ledger are not persisted.
    pub fn load(config: LedgerConfig, path: &Path) -> crate::Result<Self> {
        let entries = LedgerJournal::read(path)?;
        let mut ledger = Self::new(config);
        ledger.replay(committed_entries(entries));
        ledger.check_claim_counters()?;
        ledger.reload_limits();
        Ok(ledger)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: LedgerConfig) {
        self.limits.set_config(config.limits.clone());
        self.config = config;
    }

    pub fn groups(&self) -> &GroupResolver {
        &self.groups
    }

    /// Replaces the group resolver; invalidates cached group assignments.
    pub fn set_groups(&mut self, groups: GroupResolver) {
        self.groups = groups;
    }

    pub fn last_update_time(&self) -> Timestamp {
        self.last_update_time
    }

    pub fn limits(&self) -> &ConcurrencyLimits {
        &self.limits
    }

    pub fn journal_size(&self) -> Option<u64> {
        self.journal.as_ref().map(|j| j.size())
    }

    /// Journal size that triggers a compaction: the configured maximum, but at
    /// least twice the size of the last compacted journal.
    pub fn log_size_limit(&self) -> u64 {
        self.config.max_log_size.max(self.compacted_size * 2)
    }

    pub fn account(&self, name: &str) -> Option<&ConsumerAccount> {
        self.accounts.get(name)
    }

    pub fn accounts(&self) -> impl Iterator<Item = (&str, &ConsumerAccount)> {
        self.accounts.iter().map(|(name, a)| (name.as_str(), a))
    }

    pub fn claim(&self, resource: &str) -> Option<&ResourceClaim> {
        self.claims.get(resource)
    }

    pub fn claims(&self) -> impl Iterator<Item = (&str, &ResourceClaim)> {
        self.claims.iter().map(|(name, c)| (name.as_str(), c))
    }

    pub fn resources_used(&self, name: &str) -> u32 {
        self.accounts.get(name).map_or(0, |a| a.resources_used)
    }

    pub fn weighted_resources_used(&self, name: &str) -> f64 {
        self.accounts.get(name).map_or(0.0, |a| a.weighted_resources_used)
    }

    pub fn ceiling(&self, name: &str) -> Option<f64> {
        self.accounts.get(name).and_then(|a| a.ceiling)
    }

    pub fn floor(&self, name: &str) -> f64 {
        self.accounts.get(name).map_or(0.0, |a| a.floor)
    }

    /// Effective priority: stored priority (at least the minimum) times the
    /// priority factor. Does not modify the ledger.
    pub fn priority(&self, name: &str) -> f64 {
        let min = self.config.min_priority;
        let stored = self.accounts.get(name).map_or(min, |a| a.priority);
        stored.max(min) * self.priority_factor(name)
    }

    pub fn priority_factor(&self, name: &str) -> f64 {
        match self.accounts.get(name) {
            Some(account) if account.priority_factor >= MIN_PRIORITY_FACTOR => {
                account.priority_factor
            }
            _ => self.compute_priority_factor(name),
        }
    }

    fn compute_priority_factor(&self, name: &str) -> f64 {
        if name.starts_with(&self.config.nice_user_prefix) {
            return self.config.nice_user_priority_factor;
        }
        let group = self.groups.resolve(name);
        if let Some(factor) = self.groups.group_factor(&group) {
            return factor;
        }
        if let Some(local) = &self.config.local_domain {
            if get_domain(name).is_some_and(|domain| domain != local) {
                return self.config.effective_remote_factor();
            }
        }
        self.config.default_priority_factor
    }

    /// Creates the account when it is missing and persists a corrected
    /// priority and priority factor. Returns the effective priority.
    pub fn ensure_materialized(&mut self, name: &str) -> crate::Result<f64> {
        let min = self.config.min_priority;
        let factor = self.priority_factor(name);
        self.begin();
        self.update_account(name, |account| {
            if account.priority < min {
                account.priority = min;
            }
            if account.priority_factor < MIN_PRIORITY_FACTOR {
                account.priority_factor = factor;
            }
        });
        self.commit()?;
        Ok(self.priority(name))
    }

    pub fn set_priority(&mut self, name: &str, priority: f64) -> crate::Result<()> {
        log::debug!("Setting priority of {name} to {priority}");
        self.begin();
        self.update_account(name, |account| account.priority = priority);
        self.commit()
    }

    pub fn set_priority_factor(&mut self, name: &str, factor: f64) -> crate::Result<()> {
        let factor = if factor < MIN_PRIORITY_FACTOR || factor.is_nan() {
            log::warn!(
                "Priority factor {factor} of {name} is below {MIN_PRIORITY_FACTOR}, using {MIN_PRIORITY_FACTOR}"
            );
            MIN_PRIORITY_FACTOR
        } else {
            factor
        };
        self.begin();
        self.update_account(name, |account| {
            account.priority_factor = factor;
            account.factor_override = true;
        });
        self.commit()
    }

    /// A negative ceiling removes the ceiling.
    pub fn set_ceiling(&mut self, name: &str, ceiling: f64) -> crate::Result<()> {
        self.begin();
        self.update_account(name, |account| {
            account.ceiling = (ceiling >= 0.0).then_some(ceiling)
        });
        self.commit()
    }

    pub fn set_floor(&mut self, name: &str, floor: f64) -> crate::Result<()> {
        self.begin();
        self.update_account(name, |account| account.floor = non_negative(floor));
        self.commit()
    }

    pub fn set_accumulated_usage(&mut self, name: &str, usage: f64) -> crate::Result<()> {
        self.begin();
        self.update_account(name, |account| {
            account.accumulated_usage = non_negative(usage);
            account.weighted_accumulated_usage = non_negative(usage);
        });
        self.commit()
    }

    pub fn set_begin_usage_time(&mut self, name: &str, time: Timestamp) -> crate::Result<()> {
        self.begin();
        self.update_account(name, |account| account.begin_usage_time = time);
        self.commit()
    }

    pub fn set_last_usage_time(&mut self, name: &str, time: Timestamp) -> crate::Result<()> {
        self.begin();
        self.update_account(name, |account| account.last_usage_time = time);
        self.commit()
    }

    /// Resets priority and accumulated usage of one consumer.
    pub fn reset_usage(&mut self, name: &str, now: Timestamp) -> crate::Result<()> {
        if !self.accounts.contains_key(name) {
            return Ok(());
        }
        let min = self.config.min_priority;
        self.begin();
        self.update_existing(name, |account| reset_account(account, min, now));
        self.commit()
    }

    pub fn reset_all_usage(&mut self, now: Timestamp) -> crate::Result<()> {
        let min = self.config.min_priority;
        let names = self.sorted_account_names();
        self.begin();
        for name in &names {
            self.update_existing(name, |account| reset_account(account, min, now));
        }
        self.commit()
    }

    pub fn reset_accumulated_usage(&mut self, name: &str, now: Timestamp) -> crate::Result<()> {
        self.begin();
        self.update_existing(name, |account| {
            account.accumulated_usage = 0.0;
            account.weighted_accumulated_usage = 0.0;
            account.begin_usage_time = now;
        });
        self.commit()
    }

    /// Removes the account of a consumer. Returns false if it did not exist.
    pub fn delete_record(&mut self, name: &str) -> crate::Result<bool> {
        if !self.accounts.contains_key(name) {
            return Ok(false);
        }
        self.begin();
        self.destroy_account(name);
        self.commit()?;
        Ok(true)
    }

    /// Records that `resource` was matched to `consumer` at `time`.
    ///
    /// An identical claim is left untouched; a claim of a different consumer
    /// is released in the same transaction. Nothing changes when the
    /// concurrency limits cannot be parsed.
    pub fn add_match(
        &mut self,
        consumer: &str,
        resource: &str,
        slot_weight: f64,
        concurrency_limits: Option<&str>,
        time: Timestamp,
    ) -> crate::Result<()> {
        if self
            .claims
            .get(resource)
            .is_some_and(|claim| claim.consumer == consumer)
        {
            return Ok(());
        }
        let limits = match concurrency_limits {
            Some(spec) => parse_limits(spec)?,
            None => LimitRequest::new(),
        };
        let group = self.groups.resolve(consumer);
        let gap = if time > self.last_update_time {
            (time - self.last_update_time) as f64
        } else {
            0.0
        };

        self.begin();
        let released = self.release_claim(resource, time);
        let charge = |account: &mut ConsumerAccount| {
            account.resources_used += 1;
            account.weighted_resources_used += slot_weight;
            account.uncharged_time -= gap;
            account.weighted_uncharged_time -= gap * slot_weight;
        };
        self.update_account(consumer, charge);
        if group != consumer {
            self.update_account(&group, charge);
        }
        for part in group_path(&group) {
            self.update_account(part, |account| {
                account.hier_weighted_resources_used += slot_weight
            });
        }
        let claim = ResourceClaim {
            consumer: consumer.to_string(),
            start_time: time,
            slot_weight,
            concurrency_limits: concurrency_limits.map(|s| s.to_string()),
        };
        self.put_claim(resource, claim);
        self.commit()?;
        if let Some(previous) = released {
            self.release_limits(resource, &previous);
            log::debug!(
                "Claim of {} on {resource} handed over to {consumer}",
                previous.consumer
            );
        }
        self.limits.increment(&limits);
        log::debug!("Added match between {consumer} and {resource} (weight {slot_weight})");
        Ok(())
    }

    /// Releases the claim on `resource`; a missing claim is a no-op.
    pub fn remove_match(&mut self, resource: &str, time: Timestamp) -> crate::Result<()> {
        self.begin();
        let released = self.release_claim(resource, time);
        self.commit()?;
        if let Some(claim) = released {
            self.release_limits(resource, &claim);
            log::debug!(
                "Removed match between {} and {resource}",
                claim.consumer
            );
        }
        Ok(())
    }

    /// Removes the claim on `resource` and its charges within the open
    /// transaction.
    fn release_claim(&mut self, resource: &str, time: Timestamp) -> Option<ResourceClaim> {
        let claim = self.claims.get(resource).cloned()?;
        let start = claim.start_time.max(self.last_update_time);
        let uncharged = if time > start {
            (time - start) as f64
        } else {
            0.0
        };
        let weight = claim.slot_weight;
        let group = self.groups.resolve(&claim.consumer);

        let release = |account: &mut ConsumerAccount| {
            account.resources_used = account.resources_used.saturating_sub(1);
            account.weighted_resources_used = non_negative(account.weighted_resources_used - weight);
            account.uncharged_time += uncharged;
            account.weighted_uncharged_time += uncharged * weight;
        };
        self.update_existing(&claim.consumer, release);
        if group != claim.consumer {
            self.update_existing(&group, release);
        }
        for part in group_path(&group) {
            self.update_existing(part, |account| {
                account.hier_weighted_resources_used =
                    non_negative(account.hier_weighted_resources_used - weight)
            });
        }
        self.destroy_claim(resource);
        Some(claim)
    }

    fn release_limits(&mut self, resource: &str, claim: &ResourceClaim) {
        if let Some(spec) = &claim.concurrency_limits {
            match parse_limits(spec) {
                Ok(limits) => self.limits.decrement(&limits),
                Err(error) => log::warn!("Claim on {resource} has invalid limits: {error}"),
            }
        }
    }

    /// Decays all priorities towards recent usage and folds uncharged time
    /// into accumulated usage.
    pub fn update_priorities(&mut self, now: Timestamp) -> crate::Result<()> {
        let elapsed = now - self.last_update_time;
        if elapsed == 0 {
            return Ok(());
        }
        if elapsed < 0 {
            log::warn!(
                "Clock went backwards by {}s since the last priority update, skipping update",
                -elapsed
            );
            self.begin();
            self.set_last_update_time(now);
            return self.commit();
        }
        let elapsed_secs = elapsed as f64;
        let aging = 0.5f64.powf(elapsed_secs / self.config.priority_half_life);
        let min = self.config.min_priority;
        log::debug!("Updating priorities: elapsed={elapsed}s, aging factor={aging}");

        trace_time!("ledger", "update_priorities", {
            self.begin();
            self.set_last_update_time(now);
            for name in self.sorted_account_names() {
                let Some(before) = self.accounts.get(&name).cloned() else {
                    continue;
                };
                let mut account = before.clone();
                age_account(&mut account, elapsed_secs, aging, min, now);
                if account.priority <= min
                    && account.resources_used == 0
                    && account.accumulated_usage == 0.0
                    && !account.factor_override
                    && account.ceiling.is_none()
                    && account.floor <= 0.0
                {
                    log::debug!("Removing idle account {name}");
                    self.destroy_account(&name);
                } else {
                    self.log_changes(&name, &account, &before);
                    self.accounts.insert(name, account);
                }
            }
            self.commit()?;
        });
        self.compact_journal_if_needed()
    }

    /// Brings the claims in line with the claims reported by the offers.
    pub fn reconcile(&mut self, offers: &[Offer], now: Timestamp) -> crate::Result<()> {
        let live: Map<&str, &Offer> = offers.iter().map(|o| (o.name.as_str(), o)).collect();
        let mut stale: Vec<String> = self
            .claims
            .iter()
            .filter(|(resource, claim)| {
                live.get(resource.as_str())
                    .and_then(|offer| offer.remote_user())
                    != Some(claim.consumer.as_str())
            })
            .map(|(resource, _)| resource.clone())
            .collect();
        stale.sort_unstable();
        for resource in stale {
            log::debug!("Claim on {resource} is no longer reported, releasing it");
            self.remove_match(&resource, now)?;
        }
        for offer in offers {
            let Some(claim) = &offer.claim else {
                continue;
            };
            if self
                .claims
                .get(&offer.name)
                .is_some_and(|c| c.consumer == claim.remote_user)
            {
                continue;
            }
            log::debug!(
                "Offer {} is claimed by {}, recording the claim",
                offer.name,
                claim.remote_user
            );
            match self.add_match(
                &claim.remote_user,
                &offer.name,
                offer.slot_weight,
                claim.concurrency_limits.as_deref(),
                now,
            ) {
                Ok(()) => {}
                Err(error) if error.is_recoverable() => {
                    log::warn!("Cannot record claim on {}: {error}", offer.name);
                }
                Err(error) => return Err(error),
            }
        }
        self.reload_limits();
        Ok(())
    }

    /// Aggregate report, sorted by name. With `rollup`, group rows include
    /// the usage of their subgroups.
    pub fn report(&self, rollup: bool) -> Vec<AccountReport> {
        let mut rows: Vec<AccountReport> = self
            .accounts
            .iter()
            .map(|(name, account)| AccountReport {
                name: name.clone(),
                is_group: account.is_group,
                effective_priority: self.priority(name),
                priority: account.priority,
                priority_factor: self.priority_factor(name),
                resources_used: account.resources_used,
                weighted_resources_used: account.weighted_resources_used,
                accumulated_usage: account.accumulated_usage,
                weighted_accumulated_usage: account.weighted_accumulated_usage,
                begin_usage_time: account.begin_usage_time,
                last_usage_time: account.last_usage_time,
                ceiling: account.ceiling,
                floor: account.floor,
            })
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        if rollup {
            let groups: Vec<(String, u32, f64, f64, f64)> = rows
                .iter()
                .filter(|row| row.is_group)
                .map(|row| {
                    (
                        row.name.clone(),
                        row.resources_used,
                        row.weighted_resources_used,
                        row.accumulated_usage,
                        row.weighted_accumulated_usage,
                    )
                })
                .collect();
            for row in rows.iter_mut().filter(|row| row.is_group) {
                for (name, used, weighted, accum, weighted_accum) in &groups {
                    if is_descendant_group(name, &row.name) {
                        row.resources_used += used;
                        row.weighted_resources_used += weighted;
                        row.accumulated_usage += accum;
                        row.weighted_accumulated_usage += weighted_accum;
                    }
                }
            }
        }
        rows
    }

    pub fn claims_of(&self, consumer: &str) -> Vec<ClaimReport> {
        let mut claims: Vec<ClaimReport> = self
            .claims
            .iter()
            .filter(|(_, claim)| claim.consumer == consumer)
            .map(|(resource, claim)| ClaimReport {
                resource: resource.clone(),
                start_time: claim.start_time,
                slot_weight: claim.slot_weight,
                concurrency_limits: claim.concurrency_limits.clone(),
            })
            .collect();
        claims.sort_by(|a, b| a.resource.cmp(&b.resource));
        claims
    }

    fn sorted_account_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.accounts.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Recomputes per-consumer resource counters from the claims.
    fn check_claim_counters(&mut self) -> crate::Result<()> {
        let mut counted: Map<String, (u32, f64)> = Map::default();
        for claim in self.claims.values() {
            let entry = counted.entry(claim.consumer.clone()).or_default();
            entry.0 += 1;
            entry.1 += claim.slot_weight;
        }
        let mut fixes: Vec<(String, u32, f64)> = Vec::new();
        for (name, account) in &self.accounts {
            if account.is_group {
                continue;
            }
            let (count, weight) = counted.remove(name).unwrap_or_default();
            if account.resources_used != count
                || (account.weighted_resources_used - weight).abs() > 1e-6
            {
                fixes.push((name.clone(), count, weight));
            }
        }
        fixes.extend(counted.into_iter().map(|(name, (count, weight))| (name, count, weight)));
        if fixes.is_empty() {
            return Ok(());
        }
        fixes.sort_by(|a, b| a.0.cmp(&b.0));
        self.begin();
        for (name, count, weight) in fixes {
            log::warn!(
                "Fixing resource counters of {name}: recorded claims give {count} resources (weight {weight})"
            );
            self.update_account(&name, |account| {
                account.resources_used = count;
                account.weighted_resources_used = weight;
            });
        }
        self.commit()
    }

    fn reload_limits(&mut self) {
        self.limits.clear();
        for (resource, claim) in &self.claims {
            if let Some(spec) = &claim.concurrency_limits {
                match parse_limits(spec) {
                    Ok(limits) => self.limits.increment(&limits),
                    Err(error) => log::warn!("Claim on {resource} has invalid limits: {error}"),
                }
            }
        }
    }

    fn replay(&mut self, entries: Vec<LogEntry>) {
        for entry in entries {
            match entry {
                LogEntry::Create(RecordKey::Accountant) => {}
                LogEntry::Create(RecordKey::Customer(name)) => {
                    self.accounts
                        .insert(name, ConsumerAccount::new(self.config.min_priority, false));
                }
                LogEntry::Create(RecordKey::Resource(name)) => {
                    self.claims.insert(name, ResourceClaim::default());
                }
                LogEntry::Destroy(RecordKey::Accountant) => self.last_update_time = 0,
                LogEntry::Destroy(RecordKey::Customer(name)) => {
                    self.accounts.remove(&name);
                }
                LogEntry::Destroy(RecordKey::Resource(name)) => {
                    self.claims.remove(&name);
                }
                LogEntry::SetAttribute(RecordKey::Accountant, attr, value) => {
                    if attr == ATTR_LAST_UPDATE_TIME {
                        self.last_update_time = value.as_i64().unwrap_or(0);
                    }
                }
                LogEntry::SetAttribute(RecordKey::Customer(name), attr, value) => {
                    let min = self.config.min_priority;
                    self.accounts
                        .entry(name)
                        .or_insert_with(|| ConsumerAccount::new(min, false))
                        .apply_attribute(&attr, &value);
                }
                LogEntry::SetAttribute(RecordKey::Resource(name), attr, value) => {
                    self.claims
                        .entry(name)
                        .or_default()
                        .apply_attribute(&attr, &value);
                }
                LogEntry::BeginTransaction | LogEntry::CommitTransaction => {}
            }
        }
    }

    fn snapshot_entries(&self) -> Vec<LogEntry> {
        let mut entries = vec![
            LogEntry::Create(RecordKey::Accountant),
            LogEntry::SetAttribute(
                RecordKey::Accountant,
                ATTR_LAST_UPDATE_TIME.to_string(),
                AttrValue::Int(self.last_update_time),
            ),
        ];
        for name in self.sorted_account_names() {
            let key = RecordKey::Customer(name.clone());
            entries.push(LogEntry::Create(key.clone()));
            for (attr, value) in self.accounts[&name].attributes() {
                entries.push(LogEntry::SetAttribute(key.clone(), attr.to_string(), value));
            }
        }
        let mut resources: Vec<&String> = self.claims.keys().collect();
        resources.sort_unstable();
        for resource in resources {
            let key = RecordKey::Resource(resource.clone());
            entries.push(LogEntry::Create(key.clone()));
            for (attr, value) in self.claims[resource].attributes() {
                entries.push(LogEntry::SetAttribute(key.clone(), attr.to_string(), value));
            }
        }
        entries
    }

    fn compact_journal_if_needed(&mut self) -> crate::Result<()> {
        let Some(size) = self.journal_size() else {
            return Ok(());
        };
        if size <= self.log_size_limit() {
            return Ok(());
        }
        let entries = self.snapshot_entries();
        let Some(journal) = self.journal.as_mut() else {
            return Ok(());
        };
        journal.compact(&entries).map_err(persistence_error)?;
        let new_size = journal.size();
        log::info!("Ledger journal compacted from {size} to {new_size} bytes");
        self.compacted_size = new_size;
        if new_size * 2 > self.config.max_log_size {
            log::debug!("Ledger journal size limit raised to {}", new_size * 2);
        }
        Ok(())
    }

    fn begin(&mut self) {
        debug_assert!(self.transaction.is_empty());
        self.transaction.clear();
    }

    fn commit(&mut self) -> crate::Result<()> {
        let entries = std::mem::take(&mut self.transaction);
        let Some(journal) = self.journal.as_mut() else {
            return Ok(());
        };
        if entries.is_empty() {
            return Ok(());
        }
        let mut batch = Vec::with_capacity(entries.len() + 2);
        batch.push(LogEntry::BeginTransaction);
        batch.extend(entries);
        batch.push(LogEntry::CommitTransaction);
        journal.store_all(&batch).map_err(persistence_error)
    }

    fn set_last_update_time(&mut self, time: Timestamp) {
        self.last_update_time = time;
        self.transaction.push(LogEntry::SetAttribute(
            RecordKey::Accountant,
            ATTR_LAST_UPDATE_TIME.to_string(),
            AttrValue::Int(time),
        ));
    }

    /// Applies `f` to the account, creating it first if needed.
    fn update_account<F: FnOnce(&mut ConsumerAccount)>(&mut self, name: &str, f: F) {
        let before = match self.accounts.get(name) {
            Some(account) => account.clone(),
            None => {
                let account =
                    ConsumerAccount::new(self.config.min_priority, self.groups.is_group(name));
                let key = RecordKey::Customer(name.to_string());
                self.transaction.push(LogEntry::Create(key.clone()));
                for (attr, value) in account.attributes() {
                    self.transaction
                        .push(LogEntry::SetAttribute(key.clone(), attr.to_string(), value));
                }
                self.accounts.insert(name.to_string(), account.clone());
                account
            }
        };
        let mut account = before.clone();
        f(&mut account);
        self.log_changes(name, &account, &before);
        self.accounts.insert(name.to_string(), account);
    }

    /// Applies `f` only if the account exists.
    fn update_existing<F: FnOnce(&mut ConsumerAccount)>(&mut self, name: &str, f: F) {
        if self.accounts.contains_key(name) {
            self.update_account(name, f);
        }
    }

    fn log_changes(&mut self, name: &str, account: &ConsumerAccount, before: &ConsumerAccount) {
        for (attr, value) in account.changed_attributes(before) {
            self.transaction.push(LogEntry::SetAttribute(
                RecordKey::Customer(name.to_string()),
                attr.to_string(),
                value,
            ));
        }
    }

    fn destroy_account(&mut self, name: &str) {
        self.accounts.remove(name);
        self.transaction
            .push(LogEntry::Destroy(RecordKey::Customer(name.to_string())));
    }

    fn put_claim(&mut self, resource: &str, claim: ResourceClaim) {
        let key = RecordKey::Resource(resource.to_string());
        self.transaction.push(LogEntry::Create(key.clone()));
        for (attr, value) in claim.attributes() {
            self.transaction
                .push(LogEntry::SetAttribute(key.clone(), attr.to_string(), value));
        }
        self.claims.insert(resource.to_string(), claim);
    }

    fn destroy_claim(&mut self, resource: &str) {
        self.claims.remove(resource);
        self.transaction
            .push(LogEntry::Destroy(RecordKey::Resource(resource.to_string())));
    }
}

fn persistence_error(error: MatchmakerError) -> MatchmakerError {
    log::error!("Cannot write ledger journal: {error}");
    MatchmakerError::Persistence(error.to_string())
}

fn reset_account(account: &mut ConsumerAccount, min_priority: f64, now: Timestamp) {
    account.priority = min_priority;
    account.accumulated_usage = 0.0;
    account.weighted_accumulated_usage = 0.0;
    account.begin_usage_time = now;
    account.last_usage_time = now;
}

fn age_account(
    account: &mut ConsumerAccount,
    elapsed: f64,
    aging: f64,
    min_priority: f64,
    now: Timestamp,
) {
    let recent = account.resources_used as f64 + account.uncharged_time / elapsed;
    let mut weighted_recent =
        account.weighted_resources_used + account.weighted_uncharged_time / elapsed;
    if account.hier_weighted_resources_used > 0.0 {
        weighted_recent = account.hier_weighted_resources_used;
    }
    let priority = account.priority.max(min_priority);
    account.priority =
        (priority * aging + weighted_recent * (1.0 - aging)).max(min_priority);

    account.accumulated_usage +=
        non_negative(account.resources_used as f64 * elapsed + account.uncharged_time);
    account.weighted_accumulated_usage += non_negative(
        account.weighted_resources_used * elapsed + account.weighted_uncharged_time,
    );
    if account.accumulated_usage > 0.0 && account.begin_usage_time == 0 {
        account.begin_usage_time = now;
    }
    if recent > 0.0 {
        account.last_usage_time = now;
    }
    account.uncharged_time = 0.0;
    account.weighted_uncharged_time = 0.0;
}

/// True if `group` lies strictly below `ancestor` in the group hierarchy.
fn is_descendant_group(group: &str, ancestor: &str) -> bool {
    if ancestor == ROOT_GROUP_NAME {
        return group != ROOT_GROUP_NAME;
    }
    group.len() > ancestor.len()
        && group.starts_with(ancestor)
        && group.as_bytes()[ancestor.len()] == b'.'
}

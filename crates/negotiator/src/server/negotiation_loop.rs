use std::path::{Path, PathBuf};

use matchmaker::ledger::UsageLedger;
use matchmaker::negotiation::{CycleRecord, Negotiator};
use tokio::signal::unix::{SignalKind, signal};
use tokio::time::Instant;

use crate::admin::edits::apply_edits;
use crate::config::DaemonConfig;
use crate::server::comm::LocalComm;
use crate::server::evaluator::StructuredEvaluator;
use crate::server::inventory::PoolDir;
use crate::server::statedir::{DaemonGuard, StateDir};

pub fn now_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Negotiator bound to a pool directory and a state directory.
pub struct NegotiatorServer {
    negotiator: Negotiator,
    comm: LocalComm,
    evaluator: StructuredEvaluator,
    config_path: Option<PathBuf>,
    state_dir: StateDir,
    _guard: DaemonGuard,
}

impl NegotiatorServer {
    pub fn open(
        config: DaemonConfig,
        config_path: Option<PathBuf>,
        pool_dir: &Path,
        state_dir: &Path,
    ) -> crate::Result<Self> {
        std::fs::create_dir_all(state_dir)?;
        let state_dir = StateDir::new(state_dir);
        let guard = state_dir.acquire()?;
        let ledger_path = state_dir.ledger_path();
        log::info!("Loading accounting ledger from {}", ledger_path.display());
        let ledger = UsageLedger::open(config.ledger, &ledger_path, now_timestamp())?;
        let negotiator = Negotiator::new(config.negotiator, config.quota, ledger)?;
        let mut server = NegotiatorServer {
            negotiator,
            comm: LocalComm::new(PoolDir::new(pool_dir))?,
            evaluator: StructuredEvaluator::new(config.evaluator),
            config_path,
            state_dir,
            _guard: guard,
        };
        server.apply_admin_edits()?;
        Ok(server)
    }

    /// Applies ledger edits queued by `userprio` since the last call.
    pub fn apply_admin_edits(&mut self) -> crate::Result<usize> {
        let edits = self.state_dir.take_edits()?;
        if edits.is_empty() {
            return Ok(0);
        }
        log::info!("Applying {} queued admin edits", edits.len());
        Ok(apply_edits(
            &edits,
            self.negotiator.ledger_mut(),
            now_timestamp(),
        ))
    }

    pub fn negotiator(&self) -> &Negotiator {
        &self.negotiator
    }

    pub fn run_cycle(&mut self) -> crate::Result<CycleRecord> {
        self.apply_admin_edits()?;
        let record = self
            .negotiator
            .run_cycle(&mut self.comm, &self.evaluator, now_timestamp())?;
        match &record.aborted {
            None => log::info!(
                "Cycle finished in {:?}: {} matches ({} preempting), {} rejections",
                record.duration,
                record.matches,
                record.preemptions,
                self.comm.rejections_in_cycle()
            ),
            Some(reason) => log::warn!("Cycle abandoned: {reason}"),
        }
        Ok(record)
    }

    /// Reloads the configuration file. A broken file keeps the current
    /// configuration.
    pub fn reload_config(&mut self) {
        let Some(path) = self.config_path.clone() else {
            log::info!("No configuration file to reload");
            return;
        };
        log::info!("Reloading configuration from {}", path.display());
        let config = match DaemonConfig::load(Some(&path)) {
            Ok(config) => config,
            Err(error) => {
                log::error!("Configuration was not reloaded: {error}");
                return;
            }
        };
        if let Err(error) = self.negotiator.reconfigure(config.reconfiguration()) {
            log::error!("Configuration was not applied: {error}");
            return;
        }
        self.evaluator = StructuredEvaluator::new(config.evaluator);
    }
}

/// Runs cycles until Ctrl-C.
///
/// SIGUSR1 starts the next cycle early, but never sooner than `cycle_delay`
/// after the previous one finished. SIGHUP reloads the configuration.
pub async fn run_negotiation_loop(server: &mut NegotiatorServer) -> crate::Result<()> {
    let mut renegotiate = signal(SignalKind::user_defined1())?;
    let mut reload = signal(SignalKind::hangup())?;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let started = Instant::now();
        server.run_cycle()?;
        let finished = Instant::now();
        let config = server.negotiator().config();
        let earliest = finished + config.cycle_delay;
        let mut next = finished + config.next_cycle_delay(finished - started);
        log::debug!("Next cycle in {:?}", next - finished);

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next) => break,
                _ = renegotiate.recv() => {
                    log::info!("Received SIGUSR1, negotiating as soon as possible");
                    next = next.min(earliest);
                }
                _ = reload.recv() => {
                    log::info!("Received SIGHUP");
                    server.reload_config();
                }
                _ = &mut ctrl_c => {
                    log::info!("Received SIGINT, stopping negotiator");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::NegotiatorServer;
    use crate::admin::edits::LedgerEdit;
    use crate::config::DaemonConfig;
    use crate::server::statedir::StateDir;
    use std::fs;
    use tempfile::TempDir;

    fn write_pool(pool: &std::path::Path) {
        fs::create_dir_all(pool.join("jobs")).unwrap();
        fs::write(
            pool.join("offers.json"),
            r#"[{"name": "slot1", "attributes": {"arch": "x86"}},
                {"name": "slot2", "attributes": {"arch": "x86"}},
                {"name": "slot3", "attributes": {"arch": "arm"}}]"#,
        )
        .unwrap();
        fs::write(
            pool.join("submitters.json"),
            r#"[{"name": "alice", "idle_jobs": 2}, {"name": "bob", "idle_jobs": 1}]"#,
        )
        .unwrap();
        fs::write(
            pool.join("jobs/alice.json"),
            r#"[{"id": "a1", "attributes": {"requirements": {"arch": "x86"}}},
                {"id": "a2", "attributes": {"requirements": {"arch": "x86"}}}]"#,
        )
        .unwrap();
        fs::write(
            pool.join("jobs/bob.json"),
            r#"[{"id": "b1", "attributes": {"requirements": {"arch": "arm"}}}]"#,
        )
        .unwrap();
    }

    #[test]
    fn test_cycle_writes_matches_and_ledger() {
        let pool = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        write_pool(pool.path());

        let mut server =
            NegotiatorServer::open(DaemonConfig::default(), None, pool.path(), state.path())
                .unwrap();
        let record = server.run_cycle().unwrap();
        assert!(record.is_complete());
        assert_eq!(record.matches, 3);

        let matches = server.comm.pool().read_matches().unwrap();
        let mut pairs: Vec<_> = matches
            .iter()
            .map(|m| (m.job.as_str(), m.offer.as_str()))
            .collect();
        pairs.sort();
        assert_eq!(pairs[2], ("b1", "slot3"));
        assert_eq!(server.negotiator().ledger().resources_used("alice"), 2);
        drop(server);

        // The ledger journal survives a restart
        let server =
            NegotiatorServer::open(DaemonConfig::default(), None, pool.path(), state.path())
                .unwrap();
        assert_eq!(server.negotiator().ledger().resources_used("bob"), 1);
    }

    #[test]
    fn test_missing_pool_abandons_cycle() {
        let pool = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        let mut server =
            NegotiatorServer::open(DaemonConfig::default(), None, pool.path(), state.path())
                .unwrap();
        let record = server.run_cycle().unwrap();
        assert!(!record.is_complete());
    }

    #[test]
    fn test_reload_keeps_config_on_error() {
        let pool = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        let config_path = state.path().join("negotiator.toml");
        fs::write(&config_path, "[negotiator]\nmax_pie_spins = 5\n").unwrap();
        let config = DaemonConfig::load(Some(&config_path)).unwrap();
        let mut server =
            NegotiatorServer::open(config, Some(config_path.clone()), pool.path(), state.path())
                .unwrap();
        assert_eq!(server.negotiator().config().max_pie_spins, 5);

        fs::write(&config_path, "[negotiator]\nmax_pie_spins = 9\n").unwrap();
        server.reload_config();
        assert_eq!(server.negotiator().config().max_pie_spins, 9);

        fs::write(&config_path, "[[group]]\nname = \"a.b\"\nquota = { static = 1.0 }\n")
            .unwrap();
        server.reload_config();
        assert_eq!(server.negotiator().config().max_pie_spins, 9);
        assert!(server.negotiator().tree().is_flat());
    }

    #[test]
    fn test_queued_edits_survive_daemon_writes() {
        let pool = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        write_pool(pool.path());
        let mut server =
            NegotiatorServer::open(DaemonConfig::default(), None, pool.path(), state.path())
                .unwrap();
        let state_dir = StateDir::new(state.path());
        assert!(state_dir.daemon().unwrap().is_some());
        state_dir
            .queue_edit(&LedgerEdit::SetPriority {
                name: "carol".to_string(),
                value: 50.0,
            })
            .unwrap();

        server.run_cycle().unwrap();
        // Aged by the cycle for at most a few seconds
        let carol = server.negotiator().ledger().account("carol").unwrap().priority();
        assert!(carol > 49.9 && carol <= 50.0);
        server
            .negotiator
            .ledger_mut()
            .set_priority("dave", 4.0)
            .unwrap();
        drop(server);
        assert!(state_dir.daemon().unwrap().is_none());

        let server =
            NegotiatorServer::open(DaemonConfig::default(), None, pool.path(), state.path())
                .unwrap();
        let ledger = server.negotiator().ledger();
        assert_eq!(ledger.account("carol").unwrap().priority(), carol);
        assert_eq!(ledger.account("dave").unwrap().priority(), 4.0);
        assert_eq!(ledger.resources_used("alice"), 2);
    }

    #[test]
    fn test_edits_queued_while_stopped_are_applied_on_start() {
        let pool = TempDir::new().unwrap();
        let state = TempDir::new().unwrap();
        StateDir::new(state.path())
            .queue_edit(&LedgerEdit::SetFactor {
                name: "bob".to_string(),
                value: 20.0,
            })
            .unwrap();
        let server =
            NegotiatorServer::open(DaemonConfig::default(), None, pool.path(), state.path())
                .unwrap();
        assert_eq!(server.negotiator().ledger().priority_factor("bob"), 20.0);
    }
}

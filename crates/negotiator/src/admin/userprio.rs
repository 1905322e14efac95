use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use matchmaker::ledger::{Timestamp, UsageLedger};
use matchmaker::quota::QuotaTree;

use crate::admin::edits::LedgerEdit;
use crate::admin::output::Output;
use crate::config::DaemonConfig;
use crate::server::negotiation_loop::now_timestamp;
use crate::server::statedir::StateDir;

#[derive(Parser)]
pub struct UserprioOpts {
    /// Directory with the accounting ledger of the negotiator
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub state_dir: PathBuf,

    /// Configuration file used by the negotiator
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub subcmd: UserprioCommand,
}

#[derive(Parser)]
pub enum UserprioCommand {
    /// Show priorities and usage of all accounts
    Report {
        /// Include usage of subgroups in group rows
        #[arg(long)]
        rollup: bool,
    },
    /// List resources claimed by a consumer
    Claims {
        /// Name of the consumer
        name: String,
    },
    /// Set the stored priority of a consumer
    SetPriority {
        /// Name of the consumer
        name: String,
        /// New value
        value: f64,
    },
    /// Set the priority factor of a consumer
    SetFactor {
        /// Name of the consumer
        name: String,
        /// New value
        value: f64,
    },
    /// Set the ceiling of a consumer; a negative value removes it
    #[command(allow_negative_numbers = true)]
    SetCeiling {
        /// Name of the consumer
        name: String,
        /// New value
        value: f64,
    },
    /// Set the floor of a consumer
    SetFloor {
        /// Name of the consumer
        name: String,
        /// New value
        value: f64,
    },
    /// Set the accumulated usage of a consumer, in seconds
    SetAccum {
        /// Name of the consumer
        name: String,
        /// New value
        value: f64,
    },
    /// Set the time of the first usage (unix seconds or RFC 3339)
    SetBeginTime {
        /// Name of the consumer
        name: String,
        /// Time (unix seconds or RFC 3339)
        #[arg(value_parser = parse_time)]
        time: Timestamp,
    },
    /// Set the time of the last usage (unix seconds or RFC 3339)
    SetLastTime {
        /// Name of the consumer
        name: String,
        /// Time (unix seconds or RFC 3339)
        #[arg(value_parser = parse_time)]
        time: Timestamp,
    },
    /// Reset priority and accumulated usage
    ResetUsage {
        /// Name of the consumer
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        name: Option<String>,
        /// Reset all accounts
        #[arg(long)]
        all: bool,
    },
    /// Reset accumulated usage only
    ResetAccum {
        /// Name of the consumer
        name: String,
    },
    /// Remove the account of a consumer
    Delete {
        /// Name of the consumer
        name: String,
    },
}

fn parse_time(value: &str) -> anyhow::Result<Timestamp> {
    if let Ok(timestamp) = value.parse::<Timestamp>() {
        return Ok(timestamp);
    }
    let time = chrono::DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Invalid time '{value}'"))?;
    Ok(time.timestamp())
}

fn load_groups(ledger: &mut UsageLedger, config: &DaemonConfig) -> anyhow::Result<()> {
    let tree = QuotaTree::build(&config.quota)?;
    ledger.set_groups(tree.resolver());
    Ok(())
}

impl UserprioCommand {
    /// Ledger change made by the command; `None` for read-only commands.
    fn into_edit(self) -> Option<LedgerEdit> {
        let edit = match self {
            UserprioCommand::Report { .. } | UserprioCommand::Claims { .. } => return None,
            UserprioCommand::SetPriority { name, value } => LedgerEdit::SetPriority { name, value },
            UserprioCommand::SetFactor { name, value } => LedgerEdit::SetFactor { name, value },
            UserprioCommand::SetCeiling { name, value } => LedgerEdit::SetCeiling { name, value },
            UserprioCommand::SetFloor { name, value } => LedgerEdit::SetFloor { name, value },
            UserprioCommand::SetAccum { name, value } => LedgerEdit::SetAccum { name, value },
            UserprioCommand::SetBeginTime { name, time } => LedgerEdit::SetBeginTime { name, time },
            UserprioCommand::SetLastTime { name, time } => LedgerEdit::SetLastTime { name, time },
            UserprioCommand::ResetUsage { name, all } => LedgerEdit::ResetUsage {
                name: name.filter(|_| !all),
            },
            UserprioCommand::ResetAccum { name } => LedgerEdit::ResetAccum { name },
            UserprioCommand::Delete { name } => LedgerEdit::Delete { name },
        };
        Some(edit)
    }
}

pub fn command_userprio(opts: UserprioOpts, output: &dyn Output) -> anyhow::Result<()> {
    let config = DaemonConfig::load(opts.config.as_deref())?;
    let state_dir = StateDir::new(&opts.state_dir);
    let path = state_dir.ledger_path();
    if !path.exists() {
        anyhow::bail!("No accounting ledger found at {}", path.display());
    }

    let edit = match opts.subcmd {
        UserprioCommand::Report { rollup } => {
            let mut ledger = UsageLedger::load(config.ledger.clone(), &path)?;
            load_groups(&mut ledger, &config)?;
            output.print_report(&ledger.report(rollup));
            return Ok(());
        }
        UserprioCommand::Claims { name } => {
            let ledger = UsageLedger::load(config.ledger, &path)?;
            output.print_claims(&name, &ledger.claims_of(&name));
            return Ok(());
        }
        command => match command.into_edit() {
            Some(edit) => edit,
            None => return Ok(()),
        },
    };

    // The running negotiator owns the journal, so the edit goes through it
    if let Some(daemon) = state_dir.daemon()? {
        state_dir.queue_edit(&edit)?;
        output.print_done(&format!(
            "Edit queued for the negotiator (pid {}), it is applied before the next cycle",
            daemon.pid
        ));
        return Ok(());
    }
    let mut ledger = UsageLedger::open(config.ledger.clone(), &path, now_timestamp())
        .with_context(|| format!("Cannot open accounting ledger {}", path.display()))?;
    load_groups(&mut ledger, &config)?;
    let message = edit.apply(&mut ledger, now_timestamp())?;
    output.print_done(&message);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{UserprioCommand, UserprioOpts, command_userprio, parse_time};
    use crate::admin::edits::LedgerEdit;
    use crate::admin::output::Output;
    use crate::server::negotiation_loop::now_timestamp;
    use crate::server::statedir::StateDir;
    use matchmaker::ledger::{AccountReport, ClaimReport, LedgerConfig, UsageLedger};
    use std::cell::RefCell;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Recorder {
        reports: RefCell<Vec<Vec<AccountReport>>>,
        messages: RefCell<Vec<String>>,
    }

    impl Output for Recorder {
        fn print_report(&self, rows: &[AccountReport]) {
            self.reports.borrow_mut().push(rows.to_vec());
        }

        fn print_claims(&self, consumer: &str, claims: &[ClaimReport]) {
            self.messages
                .borrow_mut()
                .push(format!("{consumer}: {}", claims.len()));
        }

        fn print_done(&self, message: &str) {
            self.messages.borrow_mut().push(message.to_string());
        }

        fn print_error(&self, _error: anyhow::Error) {}
    }

    fn run(dir: &TempDir, subcmd: UserprioCommand, output: &Recorder) -> anyhow::Result<()> {
        command_userprio(
            UserprioOpts {
                state_dir: dir.path().to_path_buf(),
                config: None,
                subcmd,
            },
            output,
        )
    }

    fn prepare() -> TempDir {
        let dir = TempDir::new().unwrap();
        let mut ledger = UsageLedger::open(
            LedgerConfig::default(),
            &StateDir::new(dir.path()).ledger_path(),
            now_timestamp(),
        )
        .unwrap();
        ledger
            .add_match("alice", "slot1", 1.0, None, now_timestamp())
            .unwrap();
        dir
    }

    #[test]
    fn test_report_and_claims() {
        let dir = prepare();
        let output = Recorder::default();
        run(&dir, UserprioCommand::Report { rollup: false }, &output).unwrap();
        let reports = output.reports.borrow();
        assert!(reports[0].iter().any(|row| row.name == "alice"));

        run(
            &dir,
            UserprioCommand::Claims {
                name: "alice".to_string(),
            },
            &output,
        )
        .unwrap();
        assert_eq!(output.messages.borrow().last().unwrap(), "alice: 1");
    }

    #[test]
    fn test_changes_are_persisted() {
        let dir = prepare();
        let output = Recorder::default();
        run(
            &dir,
            UserprioCommand::SetFactor {
                name: "bob".to_string(),
                value: 20.0,
            },
            &output,
        )
        .unwrap();
        run(
            &dir,
            UserprioCommand::SetCeiling {
                name: "bob".to_string(),
                value: 4.0,
            },
            &output,
        )
        .unwrap();

        let ledger = UsageLedger::open(
            LedgerConfig::default(),
            &StateDir::new(dir.path()).ledger_path(),
            now_timestamp(),
        )
        .unwrap();
        assert_eq!(ledger.priority_factor("bob"), 20.0);
        assert_eq!(ledger.ceiling("bob"), Some(4.0));
    }

    #[test]
    fn test_delete_missing_account() {
        let dir = prepare();
        let output = Recorder::default();
        let result = run(
            &dir,
            UserprioCommand::Delete {
                name: "nobody".to_string(),
            },
            &output,
        );
        assert!(result.is_err());
        run(
            &dir,
            UserprioCommand::Delete {
                name: "alice".to_string(),
            },
            &output,
        )
        .unwrap();
    }

    #[test]
    fn test_missing_ledger() {
        let dir = TempDir::new().unwrap();
        let output = Recorder::default();
        assert!(run(&dir, UserprioCommand::Report { rollup: true }, &output).is_err());
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("1700000000").unwrap(), 1_700_000_000);
        assert_eq!(parse_time("1970-01-01T00:01:00Z").unwrap(), 60);
        assert!(parse_time("yesterday").is_err());
    }

    #[test]
    fn test_edits_go_through_running_daemon() {
        let dir = prepare();
        let state_dir = StateDir::new(dir.path());
        let guard = state_dir.acquire().unwrap();
        let daemon_ledger = UsageLedger::open(
            LedgerConfig::default(),
            &state_dir.ledger_path(),
            now_timestamp(),
        )
        .unwrap();
        let size = std::fs::metadata(state_dir.ledger_path()).unwrap().len();

        let output = Recorder::default();
        run(
            &dir,
            UserprioCommand::SetPriority {
                name: "bob".to_string(),
                value: 50.0,
            },
            &output,
        )
        .unwrap();
        assert!(output.messages.borrow()[0].starts_with("Edit queued"));
        assert_eq!(
            std::fs::metadata(state_dir.ledger_path()).unwrap().len(),
            size
        );

        // Reports do not write into the journal either
        run(&dir, UserprioCommand::Report { rollup: true }, &output).unwrap();
        assert_eq!(
            std::fs::metadata(state_dir.ledger_path()).unwrap().len(),
            size
        );
        drop(daemon_ledger);
        drop(guard);

        assert_eq!(
            state_dir.take_edits().unwrap(),
            vec![LedgerEdit::SetPriority {
                name: "bob".to_string(),
                value: 50.0,
            }]
        );
    }

    #[test]
    fn test_reset_all() {
        assert_eq!(
            UserprioCommand::ResetUsage {
                name: None,
                all: true
            }
            .into_edit(),
            Some(LedgerEdit::ResetUsage { name: None })
        );
        assert_eq!(
            UserprioCommand::ResetUsage {
                name: Some("alice".to_string()),
                all: false
            }
            .into_edit(),
            Some(LedgerEdit::ResetUsage {
                name: Some("alice".to_string())
            })
        );
        assert_eq!(UserprioCommand::Claims { name: "alice".to_string() }.into_edit(), None);
    }
}

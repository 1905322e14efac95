use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::admin::edits::LedgerEdit;

pub const LEDGER_FILE: &str = "accountant.log";
const DAEMON_FILE: &str = "negotiator.json";
const EDITS_FILE: &str = "edits.jsonl";

/// Directory with the persistent state of one negotiator.
///
/// ```text
/// <state>/accountant.log      accounting ledger journal
/// <state>/negotiator.json     present while a negotiator owns the ledger
/// <state>/edits.jsonl         admin edits waiting for the running negotiator
/// ```
#[derive(Debug, Clone)]
pub struct StateDir {
    path: PathBuf,
}

/// Written by the daemon when it takes ownership of the ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonRecord {
    pub pid: u32,
    pub start_date: DateTime<Utc>,
}

impl StateDir {
    pub fn new(path: &Path) -> Self {
        StateDir {
            path: path.to_path_buf(),
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.path.join(LEDGER_FILE)
    }

    fn daemon_path(&self) -> PathBuf {
        self.path.join(DAEMON_FILE)
    }

    fn edits_path(&self) -> PathBuf {
        self.path.join(EDITS_FILE)
    }

    /// Record of the negotiator owning the ledger, if any.
    pub fn daemon(&self) -> crate::Result<Option<DaemonRecord>> {
        let path = self.daemon_path();
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(path)?;
        Ok(Some(serde_json::from_reader(file)?))
    }

    /// Marks the ledger as owned by this process until the guard is dropped.
    pub fn acquire(&self) -> crate::Result<DaemonGuard> {
        if let Ok(Some(record)) = self.daemon() {
            log::warn!(
                "State directory {} is marked as used by process {} (started {}); \
                assuming it did not stop cleanly",
                self.path.display(),
                record.pid,
                record.start_date
            );
        }
        let record = DaemonRecord {
            pid: std::process::id(),
            start_date: Utc::now(),
        };
        let path = self.daemon_path();
        let file = File::create(&path)?;
        serde_json::to_writer_pretty(file, &record)?;
        Ok(DaemonGuard { path })
    }

    /// Appends an edit for the running negotiator.
    pub fn queue_edit(&self, edit: &LedgerEdit) -> crate::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.edits_path())?;
        let mut line = serde_json::to_vec(edit)?;
        line.push(b'\n');
        // A whole line per write, concurrent appends must not interleave
        file.write_all(&line)?;
        Ok(())
    }

    /// Removes and returns all queued edits, oldest first.
    ///
    /// A line that cannot be parsed is skipped with an error message.
    pub fn take_edits(&self) -> crate::Result<Vec<LedgerEdit>> {
        let path = self.edits_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut taken = path.clone().into_os_string();
        taken.push(".taken");
        let taken = PathBuf::from(taken);
        std::fs::rename(&path, &taken)?;
        let text = std::fs::read_to_string(&taken)?;
        std::fs::remove_file(&taken)?;

        let mut edits = Vec::new();
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            match serde_json::from_str(line) {
                Ok(edit) => edits.push(edit),
                Err(error) => log::error!("Ignoring invalid queued edit {line:?}: {error}"),
            }
        }
        Ok(edits)
    }
}

/// Removes the daemon record when the negotiator stops.
pub struct DaemonGuard {
    path: PathBuf,
}

impl Drop for DaemonGuard {
    fn drop(&mut self) {
        if let Err(error) = std::fs::remove_file(&self.path) {
            log::warn!("Cannot remove {}: {error}", self.path.display());
        }
    }
}

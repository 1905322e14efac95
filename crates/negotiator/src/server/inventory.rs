use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use matchmaker::records::{JobRequest, Offer, Snapshot, SubmitterAd};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

const OFFERS_FILE: &str = "offers.json";
const SUBMITTERS_FILE: &str = "submitters.json";
const JOBS_DIR: &str = "jobs";
const MATCHES_FILE: &str = "matches.jsonl";

/// Directory shared with the resource and submitter agents.
///
/// ```text
/// <pool>/offers.json          list of offers
/// <pool>/submitters.json      list of submitter demand summaries
/// <pool>/jobs/<name>.json     pending requests of one submitter, in order
/// <pool>/matches.jsonl        granted matches, appended by the negotiator
/// ```
#[derive(Debug, Clone)]
pub struct PoolDir {
    path: PathBuf,
}

/// One line of the match log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchRecord {
    pub time: chrono::DateTime<chrono::Utc>,
    pub submitter: String,
    pub job: String,
    pub offer: String,
    pub claim_token: String,
    /// Consumer whose claim was preempted by this match.
    pub preempted: Option<String>,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> matchmaker::Result<T> {
    let file = File::open(path).map_err(|error| {
        matchmaker::Error::Inventory(format!("Cannot open {}: {error}", path.display()))
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|error| {
        matchmaker::Error::Inventory(format!("Cannot parse {}: {error}", path.display()))
    })
}

impl PoolDir {
    pub fn new(path: &Path) -> Self {
        PoolDir {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn matches_path(&self) -> PathBuf {
        self.path.join(MATCHES_FILE)
    }

    fn jobs_path(&self, submitter: &str) -> matchmaker::Result<PathBuf> {
        let valid = !submitter.is_empty()
            && !submitter.starts_with('.')
            && !submitter.contains(['/', '\\']);
        if !valid {
            return Err(matchmaker::Error::Session(format!(
                "Submitter name {submitter:?} cannot be used as a file name"
            )));
        }
        Ok(self.path.join(JOBS_DIR).join(format!("{submitter}.json")))
    }

    /// Reads offers and submitter summaries. A missing or malformed file
    /// makes the whole snapshot unavailable.
    pub fn load_snapshot(&self) -> matchmaker::Result<Snapshot> {
        let offers: Vec<Offer> = read_json(&self.path.join(OFFERS_FILE))?;
        let submitters: Vec<SubmitterAd> = read_json(&self.path.join(SUBMITTERS_FILE))?;
        log::debug!(
            "Pool snapshot: {} offers, {} submitters",
            offers.len(),
            submitters.len()
        );
        Ok(Snapshot { offers, submitters })
    }

    /// Pending requests of a submitter; a missing file means no requests.
    pub fn load_jobs(&self, submitter: &str) -> matchmaker::Result<Vec<JobRequest>> {
        let path = self.jobs_path(submitter)?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_json(&path).map_err(|error| matchmaker::Error::Session(error.to_string()))
    }

    pub fn append_matches(&self, records: &[MatchRecord]) -> crate::Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.matches_path())?;
        let mut writer = BufWriter::new(file);
        for record in records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn read_matches(&self) -> crate::Result<Vec<MatchRecord>> {
        let path = self.matches_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(path)?;
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(|e| e.into()))
            .collect()
    }
}

use crate::internal::common::error::MatchmakerError;
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::ops::Deref;
use std::path::{Path, PathBuf};

const LEDGER_JOURNAL_HEADER: &[u8] = b"mmlg0001";
const LEDGER_JOURNAL_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Accountant,
    Customer(String),
    Resource(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum AttrValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Text(String),
}

impl AttrValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Float(v) => Some(*v),
            AttrValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            AttrValue::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttrValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum LogEntry {
    BeginTransaction,
    CommitTransaction,
    Create(RecordKey),
    Destroy(RecordKey),
    SetAttribute(RecordKey, String, AttrValue),
}

fn bincode_config() -> impl Options {
    bincode::DefaultOptions::new().allow_trailing_bytes()
}

/// Append-only log of ledger mutations.
pub struct LedgerJournal {
    path: PathBuf,
    file: BufWriter<File>,
    size: u64,
}

impl LedgerJournal {
    /// Opens an existing journal (returning its entries) or creates a new one.
    ///
    /// A partially written entry at the end of the file is cut off, so new
    /// entries are appended right after the last complete one.
    pub fn open(path: &Path) -> crate::Result<(Self, Vec<LogEntry>)> {
        let (entries, valid_size) = if path.exists() && std::fs::metadata(path)?.len() > 0 {
            let mut reader = JournalReader::open(path)?;
            let entries = reader.by_ref().collect::<crate::Result<Vec<_>>>()?;
            (entries, Some(reader.position()))
        } else {
            (Vec::new(), None)
        };
        let journal = Self::create_or_append(path, valid_size)?;
        Ok((journal, entries))
    }

    /// Reads all entries without opening the journal for writing.
    pub fn read(path: &Path) -> crate::Result<Vec<LogEntry>> {
        JournalReader::open(path)?.collect()
    }

    fn create_or_append(path: &Path, truncate: Option<u64>) -> crate::Result<Self> {
        let mut raw_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let length = raw_file.metadata()?.len();
        let position = match truncate {
            Some(size) if size < length => {
                log::warn!(
                    "Ledger journal {} ends with {} bytes of an incomplete entry, removing them",
                    path.display(),
                    length - size
                );
                raw_file.set_len(size)?;
                size
            }
            _ => length,
        };
        raw_file.seek(SeekFrom::Start(position))?;
        let mut file = BufWriter::new(raw_file);
        let size = if position == 0 {
            Self::write_header(&mut file)?
        } else {
            position
        };
        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
        })
    }

    fn write_header(file: &mut BufWriter<File>) -> crate::Result<u64> {
        file.write_all(LEDGER_JOURNAL_HEADER)?;
        bincode_config().serialize_into(&mut *file, &LEDGER_JOURNAL_VERSION)?;
        file.flush()?;
        Ok(LEDGER_JOURNAL_HEADER.len() as u64
            + bincode_config().serialized_size(&LEDGER_JOURNAL_VERSION)?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the journal in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Writes all entries and flushes them to the file.
    pub fn store_all(&mut self, entries: &[LogEntry]) -> crate::Result<()> {
        for entry in entries {
            bincode_config().serialize_into(&mut self.file, entry)?;
            self.size += bincode_config().serialized_size(entry)?;
        }
        self.file.flush()?;
        Ok(())
    }

    /// Rewrites the journal so that it contains only `entries`.
    ///
    /// The new content is written into a temporary file which then replaces
    /// the journal, so a crash leaves either the old or the new journal.
    pub fn compact(&mut self, entries: &[LogEntry]) -> crate::Result<()> {
        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);
        {
            let mut file = BufWriter::new(File::create(&tmp_path)?);
            Self::write_header(&mut file)?;
            for entry in entries {
                bincode_config().serialize_into(&mut file, entry)?;
            }
            file.flush()?;
            file.get_ref().sync_all()?;
        }
        self.file.flush()?;
        std::fs::rename(&tmp_path, &self.path)?;
        *self = Self::create_or_append(&self.path, None)?;
        Ok(())
    }
}

/// Streams entries from a journal file.
pub struct JournalReader {
    source: BufReader<File>,
    /// Offset right after the last complete entry.
    position: u64,
}

impl JournalReader {
    pub fn open(path: &Path) -> crate::Result<Self> {
        let mut file = BufReader::new(File::open(path)?);
        let mut header = [0u8; 8];
        file.read_exact(&mut header).map_err(|_| {
            MatchmakerError::Config(format!(
                "Ledger journal {} has no valid header",
                path.display()
            ))
        })?;
        if header != LEDGER_JOURNAL_HEADER {
            return Err(MatchmakerError::Config(format!(
                "Invalid ledger journal format: {}",
                path.display()
            )));
        }
        let version: u32 = bincode_config().deserialize_from(&mut file).map_err(|error| {
            MatchmakerError::Config(format!("Cannot load ledger journal header: {error:?}"))
        })?;
        if version != LEDGER_JOURNAL_VERSION {
            return Err(MatchmakerError::Config(format!(
                "Version of ledger journal {version} does not match with {LEDGER_JOURNAL_VERSION}"
            )));
        }
        let position = LEDGER_JOURNAL_HEADER.len() as u64
            + bincode_config().serialized_size(&LEDGER_JOURNAL_VERSION)?;
        Ok(Self {
            source: file,
            position,
        })
    }

    pub fn position(&self) -> u64 {
        self.position
    }
}

impl Iterator for JournalReader {
    type Item = crate::Result<LogEntry>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        match bincode_config().deserialize_from::<_, LogEntry>(&mut self.source) {
            Ok(entry) => match bincode_config().serialized_size(&entry) {
                Ok(size) => {
                    self.position += size;
                    Some(Ok(entry))
                }
                Err(error) => Some(Err(error.into())),
            },
            Err(error) => match error.deref() {
                bincode::ErrorKind::Io(e)
                    if matches!(e.kind(), std::io::ErrorKind::UnexpectedEof) =>
                {
                    None
                }
                _ => Some(Err(error.into())),
            },
        }
    }
}

/// Keeps only the entries of committed transactions.
///
/// Entries outside of any transaction are kept as they are. A transaction
/// without its commit marker (a crash during a write) is dropped.
pub fn committed_entries(entries: Vec<LogEntry>) -> Vec<LogEntry> {
    let mut result = Vec::with_capacity(entries.len());
    let mut transaction: Option<Vec<LogEntry>> = None;
    for entry in entries {
        match entry {
            LogEntry::BeginTransaction => {
                if transaction.is_some() {
                    log::warn!("Nested transaction in ledger journal, dropping the outer one");
                }
                transaction = Some(Vec::new());
            }
            LogEntry::CommitTransaction => match transaction.take() {
                Some(entries) => result.extend(entries),
                None => log::warn!("Commit without a transaction in ledger journal"),
            },
            entry => match &mut transaction {
                Some(entries) => entries.push(entry),
                None => result.push(entry),
            },
        }
    }
    if let Some(entries) = transaction {
        log::warn!(
            "Dropping {} entries of an unfinished transaction in ledger journal",
            entries.len()
        );
    }
    result
}

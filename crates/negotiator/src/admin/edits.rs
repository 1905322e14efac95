use matchmaker::ledger::{Timestamp, UsageLedger};
use serde::{Deserialize, Serialize};

/// Change of the accounting ledger requested by an administrator.
///
/// Applied directly when no negotiator runs, otherwise queued in the state
/// directory and applied by the negotiator before its next cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LedgerEdit {
    SetPriority { name: String, value: f64 },
    SetFactor { name: String, value: f64 },
    SetCeiling { name: String, value: f64 },
    SetFloor { name: String, value: f64 },
    SetAccum { name: String, value: f64 },
    SetBeginTime { name: String, time: Timestamp },
    SetLastTime { name: String, time: Timestamp },
    /// `None` resets all accounts
    ResetUsage { name: Option<String> },
    ResetAccum { name: String },
    Delete { name: String },
}

impl LedgerEdit {
    /// Applies the edit and returns a message describing the result.
    pub fn apply(&self, ledger: &mut UsageLedger, now: Timestamp) -> crate::Result<String> {
        let message = match self {
            LedgerEdit::SetPriority { name, value } => {
                ledger.set_priority(name, *value)?;
                format!("Priority of {name} set to {value}")
            }
            LedgerEdit::SetFactor { name, value } => {
                ledger.set_priority_factor(name, *value)?;
                format!(
                    "Priority factor of {name} set to {}",
                    ledger.priority_factor(name)
                )
            }
            LedgerEdit::SetCeiling { name, value } => {
                ledger.set_ceiling(name, *value)?;
                match ledger.ceiling(name) {
                    Some(ceiling) => format!("Ceiling of {name} set to {ceiling}"),
                    None => format!("Ceiling of {name} removed"),
                }
            }
            LedgerEdit::SetFloor { name, value } => {
                ledger.set_floor(name, *value)?;
                format!("Floor of {name} set to {}", ledger.floor(name))
            }
            LedgerEdit::SetAccum { name, value } => {
                ledger.set_accumulated_usage(name, *value)?;
                format!("Accumulated usage of {name} set to {value}")
            }
            LedgerEdit::SetBeginTime { name, time } => {
                ledger.set_begin_usage_time(name, *time)?;
                format!("Begin usage time of {name} set to {time}")
            }
            LedgerEdit::SetLastTime { name, time } => {
                ledger.set_last_usage_time(name, *time)?;
                format!("Last usage time of {name} set to {time}")
            }
            LedgerEdit::ResetUsage { name: Some(name) } => {
                ledger.reset_usage(name, now)?;
                format!("Usage of {name} reset")
            }
            LedgerEdit::ResetUsage { name: None } => {
                ledger.reset_all_usage(now)?;
                "Usage of all accounts reset".to_string()
            }
            LedgerEdit::ResetAccum { name } => {
                ledger.reset_accumulated_usage(name, now)?;
                format!("Accumulated usage of {name} reset")
            }
            LedgerEdit::Delete { name } => {
                if !ledger.delete_record(name)? {
                    return Err(format!("Account {name} does not exist").into());
                }
                format!("Account {name} deleted")
            }
        };
        Ok(message)
    }
}

/// Applies edits in order. A failing edit is reported and skipped.
pub fn apply_edits(edits: &[LedgerEdit], ledger: &mut UsageLedger, now: Timestamp) -> usize {
    let mut applied = 0;
    for edit in edits {
        match edit.apply(ledger, now) {
            Ok(message) => {
                log::info!("Admin edit applied: {message}");
                applied += 1;
            }
            Err(error) => log::error!("Admin edit {edit:?} failed: {error}"),
        }
    }
    applied
}

#[cfg(test)]
mod tests {
    use super::{LedgerEdit, apply_edits};
    use matchmaker::ledger::{LedgerConfig, UsageLedger};
    use tempfile::TempDir;

    #[test]
    fn test_wire_format() {
        let edit = LedgerEdit::SetCeiling {
            name: "bob".to_string(),
            value: -1.0,
        };
        let text = serde_json::to_string(&edit).unwrap();
        assert_eq!(text, r#"{"op":"set_ceiling","name":"bob","value":-1.0}"#);
        let edit: LedgerEdit = serde_json::from_str(r#"{"op":"reset_usage","name":null}"#).unwrap();
        assert_eq!(edit, LedgerEdit::ResetUsage { name: None });
    }

    #[test]
    fn test_failed_edit_does_not_stop_the_rest() {
        let dir = TempDir::new().unwrap();
        let mut ledger =
            UsageLedger::open(LedgerConfig::default(), &dir.path().join("log"), 100).unwrap();
        let edits = vec![
            LedgerEdit::Delete {
                name: "nobody".to_string(),
            },
            LedgerEdit::SetFactor {
                name: "bob".to_string(),
                value: 20.0,
            },
        ];
        assert_eq!(apply_edits(&edits, &mut ledger, 100), 1);
        assert_eq!(ledger.priority_factor("bob"), 20.0);
    }
}

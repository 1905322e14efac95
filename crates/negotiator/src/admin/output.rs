use cli_table::format::{Justify, Separator};
use cli_table::{Cell, CellStruct, ColorChoice, Style, Table, TableStruct, print_stdout};

use chrono::{DateTime, Local};
use matchmaker::ledger::{AccountReport, ClaimReport, Timestamp};

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum Outputs {
    CLI,
    JSON,
}

pub trait Output {
    fn print_report(&self, rows: &[AccountReport]);
    fn print_claims(&self, consumer: &str, claims: &[ClaimReport]);
    fn print_done(&self, message: &str);
    fn print_error(&self, error: anyhow::Error);
}

pub fn make_output(outputs: Outputs, color_policy: ColorChoice) -> Box<dyn Output> {
    match outputs {
        Outputs::CLI => Box::new(CliOutput::new(color_policy)),
        Outputs::JSON => Box::new(JsonOutput),
    }
}

fn format_timestamp(timestamp: Timestamp) -> String {
    if timestamp <= 0 {
        return "-".to_string();
    }
    DateTime::from_timestamp(timestamp, 0)
        .map(|time| {
            time.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
        })
        .unwrap_or_else(|| timestamp.to_string())
}

fn format_hours(seconds: f64) -> String {
    format!("{:.2}", seconds / 3600.0)
}

pub struct CliOutput {
    color_policy: ColorChoice,
}

impl CliOutput {
    pub fn new(color_policy: ColorChoice) -> CliOutput {
        CliOutput { color_policy }
    }

    fn print_horizontal_table(&self, rows: Vec<Vec<CellStruct>>, header: Vec<CellStruct>) {
        let table = rows
            .table()
            .separator(
                Separator::builder()
                    .title(Some(Default::default()))
                    .column(Some(Default::default()))
                    .build(),
            )
            .title(header);
        self.print_table(table);
    }

    fn print_table(&self, table: TableStruct) {
        let table = table.color_choice(self.color_policy);
        if let Err(e) = print_stdout(table) {
            log::error!("Cannot print table to stdout: {e:?}");
        }
    }
}

impl Output for CliOutput {
    fn print_report(&self, rows: &[AccountReport]) {
        if rows.is_empty() {
            log::info!("There are no accounts");
            return;
        }
        let header = vec![
            "Name".cell().bold(true),
            "Effective priority".cell().bold(true),
            "Factor".cell().bold(true),
            "In use".cell().bold(true),
            "Weighted in use".cell().bold(true),
            "Usage (h)".cell().bold(true),
            "Ceiling".cell().bold(true),
            "Floor".cell().bold(true),
            "Last usage".cell().bold(true),
        ];
        let rows = rows
            .iter()
            .map(|row| {
                let name = if row.is_group {
                    format!("{} (group)", row.name)
                } else {
                    row.name.clone()
                };
                vec![
                    name.cell(),
                    format!("{:.2}", row.effective_priority)
                        .cell()
                        .justify(Justify::Right),
                    format!("{:.2}", row.priority_factor)
                        .cell()
                        .justify(Justify::Right),
                    row.resources_used.cell().justify(Justify::Right),
                    format!("{:.2}", row.weighted_resources_used)
                        .cell()
                        .justify(Justify::Right),
                    format_hours(row.weighted_accumulated_usage)
                        .cell()
                        .justify(Justify::Right),
                    row.ceiling
                        .map_or_else(|| "-".to_string(), |c| format!("{c:.2}"))
                        .cell(),
                    format!("{:.2}", row.floor).cell(),
                    format_timestamp(row.last_usage_time).cell(),
                ]
            })
            .collect();
        self.print_horizontal_table(rows, header);
    }

    fn print_claims(&self, consumer: &str, claims: &[ClaimReport]) {
        if claims.is_empty() {
            log::info!("{consumer} has no claims");
            return;
        }
        let header = vec![
            "Resource".cell().bold(true),
            "Since".cell().bold(true),
            "Weight".cell().bold(true),
            "Concurrency limits".cell().bold(true),
        ];
        let rows = claims
            .iter()
            .map(|claim| {
                vec![
                    claim.resource.as_str().cell(),
                    format_timestamp(claim.start_time).cell(),
                    format!("{:.2}", claim.slot_weight)
                        .cell()
                        .justify(Justify::Right),
                    claim.concurrency_limits.as_deref().unwrap_or("-").cell(),
                ]
            })
            .collect();
        self.print_horizontal_table(rows, header);
    }

    fn print_done(&self, message: &str) {
        println!("{message}");
    }

    fn print_error(&self, error: anyhow::Error) {
        eprintln!("{error:?}");
    }
}

pub struct JsonOutput;

impl JsonOutput {
    fn print(&self, value: serde_json::Value) {
        println!("{}", serde_json::to_string_pretty(&value).unwrap_or_default());
    }
}

impl Output for JsonOutput {
    fn print_report(&self, rows: &[AccountReport]) {
        self.print(serde_json::json!(rows));
    }

    fn print_claims(&self, consumer: &str, claims: &[ClaimReport]) {
        self.print(serde_json::json!({
            "consumer": consumer,
            "claims": claims,
        }));
    }

    fn print_done(&self, message: &str) {
        self.print(serde_json::json!({ "result": message }));
    }

    fn print_error(&self, error: anyhow::Error) {
        self.print(serde_json::json!({ "error": format!("{error:?}") }));
    }
}

use std::path::PathBuf;

use clap::Parser;
use cli_table::ColorChoice;

use crate::admin::output::Outputs;
use crate::admin::userprio::UserprioOpts;

#[derive(clap::ValueEnum, Clone, Copy)]
pub enum ColorPolicy {
    /// Use colors if the stdout is detected to be a terminal.
    Auto,
    /// Always use colors.
    Always,
    /// Never use colors.
    Never,
}

impl From<ColorPolicy> for ColorChoice {
    fn from(policy: ColorPolicy) -> Self {
        match policy {
            ColorPolicy::Auto => {
                if std::io::IsTerminal::is_terminal(&std::io::stdout()) {
                    ColorChoice::Auto
                } else {
                    ColorChoice::Never
                }
            }
            ColorPolicy::Always => ColorChoice::AlwaysAnsi,
            ColorPolicy::Never => ColorChoice::Never,
        }
    }
}

// Common CLI options
#[derive(Parser)]
pub struct CommonOpts {
    /// Sets console color policy
    #[arg(
        long,
        default_value_t = ColorPolicy::Auto,
        value_enum,
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub colors: ColorPolicy,

    /// Sets output formatting
    #[arg(
        long,
        env = "NEGOTIATOR_OUTPUT_MODE",
        default_value_t = Outputs::CLI,
        value_enum,
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub output_mode: Outputs,

    /// Enables more detailed log output
    #[arg(
        long,
        env = "NEGOTIATOR_DEBUG",
        global = true,
        help_heading("GLOBAL OPTIONS"),
        hide_short_help(true)
    )]
    pub debug: bool,
}

// Root CLI options
#[derive(Parser)]
#[command(
    author,
    about,
    version(crate::NEGOTIATOR_VERSION),
    disable_help_subcommand(true),
    help_expected(true)
)]
pub struct RootOptions {
    #[clap(flatten)]
    pub common: CommonOpts,

    #[clap(subcommand)]
    pub subcmd: SubCommand,
}

#[derive(Parser)]
pub enum SubCommand {
    /// Run the negotiator
    Run(RunOpts),
    /// Inspect and modify the accounting ledger
    Userprio(UserprioOpts),
}

#[derive(Parser)]
pub struct RunOpts {
    /// Configuration file (TOML)
    #[arg(long, value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Directory with offers, submitter summaries and pending requests
    #[arg(long, value_hint = clap::ValueHint::DirPath)]
    pub pool: PathBuf,

    /// Directory where the accounting ledger is stored
    #[arg(long, value_hint = clap::ValueHint::DirPath)]
    pub state: PathBuf,

    /// Run a single negotiation cycle and exit
    #[arg(long)]
    pub once: bool,
}

#[cfg(test)]
mod tests {
    use super::{RootOptions, SubCommand};
    use crate::admin::userprio::UserprioCommand;
    use clap::{CommandFactory, Parser};

    #[test]
    fn test_cli_is_consistent() {
        RootOptions::command().debug_assert();
    }

    #[test]
    fn test_parse_userprio() {
        let opts = RootOptions::try_parse_from([
            "negotiator",
            "userprio",
            "/tmp/state",
            "set-ceiling",
            "alice",
            "-1",
        ])
        .unwrap();
        let SubCommand::Userprio(opts) = opts.subcmd else {
            panic!("Expected userprio");
        };
        assert!(matches!(
            opts.subcmd,
            UserprioCommand::SetCeiling { value, .. } if value == -1.0
        ));
    }

    #[test]
    fn test_parse_run() {
        let opts = RootOptions::try_parse_from([
            "negotiator", "run", "--pool", "/pool", "--state", "/state", "--once",
        ])
        .unwrap();
        let SubCommand::Run(opts) = opts.subcmd else {
            panic!("Expected run");
        };
        assert!(opts.once);
        assert!(opts.config.is_none());
    }
}

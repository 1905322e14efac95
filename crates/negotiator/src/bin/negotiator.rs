use clap::{CommandFactory, FromArgMatches};

use negotiator::admin::output::make_output;
use negotiator::admin::userprio::command_userprio;
use negotiator::common::cli::{RootOptions, RunOpts, SubCommand};
use negotiator::common::setup::setup_logging;
use negotiator::config::DaemonConfig;
use negotiator::server::negotiation_loop::{NegotiatorServer, run_negotiation_loop};

async fn command_run(opts: RunOpts) -> anyhow::Result<()> {
    let config = DaemonConfig::load(opts.config.as_deref())?;
    let mut server = NegotiatorServer::open(config, opts.config, &opts.pool, &opts.state)?;
    if opts.once {
        server.run_cycle()?;
        return Ok(());
    }
    log::info!("Negotiator started, pool at {}", opts.pool.display());
    run_negotiation_loop(&mut server).await?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> negotiator::Result<()> {
    let matches = RootOptions::command().get_matches();
    let top_opts = match RootOptions::from_arg_matches(&matches) {
        Ok(opts) => opts,
        Err(error) => error.exit(),
    };

    setup_logging(top_opts.common.debug);

    let output = make_output(top_opts.common.output_mode, top_opts.common.colors.into());

    let result = match top_opts.subcmd {
        SubCommand::Run(opts) => command_run(opts).await,
        SubCommand::Userprio(opts) => command_userprio(opts, output.as_ref()),
    };

    if let Err(e) = result {
        output.print_error(e);
        std::process::exit(1);
    }

    Ok(())
}

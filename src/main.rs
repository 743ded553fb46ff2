use std::io;
use std::process;
use std::sync::Arc;

use anyhow::Result;
use clap::CommandFactory;
use clap_complete::generate;
use tracing::error;

use rshypervisor::cli;
use rshypervisor::executor::RealCommandExecutor;

fn main() -> Result<()> {
    let args = cli::parse_args()?;

    if let Some(log_level) = args.command.log_level() {
        rshypervisor::init_logging(log_level)?;
    }

    let result = match &args.command {
        cli::Commands::Apply(opts) => {
            let executor = Arc::new(RealCommandExecutor {
                dry_run: opts.dry_run,
            });
            rshypervisor::run_apply(opts, executor)
        }
        cli::Commands::Validate(opts) => rshypervisor::run_validate(opts),
        cli::Commands::Backends(_) => {
            rshypervisor::run_backends();
            Ok(())
        }
        cli::Commands::Completions(opts) => {
            let mut cmd = cli::Cli::command();
            let name = cmd.get_name().to_string();
            generate(opts.shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        error!("{:#}", e);
        process::exit(1);
    }

    Ok(())
}

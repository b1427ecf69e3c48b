#![deny(clippy::all, warnings)]

use clap::Parser;
use color_eyre::eyre::eyre;
use color_eyre::Result;

mod cli;
mod dispatch;

use cli::StratumCli;

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = StratumCli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let code = dispatch::dispatch_command(&cli.command).map_err(|err| eyre!("{err:?}"))?;
    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = if quiet {
        "warn"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter =
        format!("stratum={level},stratum_cli={level},stratum_core={level},stratum_domain={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "stratum", version, about = "Container-image vulnerability scanner tooling")]
pub struct StratumCli {
    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: CommandCli,
}

#[derive(Debug, Subcommand)]
pub enum CommandCli {
    /// Produce a full vulnerability dump from the registered sources.
    GenerateDump(GenerateDumpArgs),
    /// Apply a dump archive to a ledger once.
    ImportDump(ImportDumpArgs),
    /// Run a single updater cycle against a dump URL.
    Update(UpdateArgs),
}

#[derive(Debug, Args)]
pub struct GenerateDumpArgs {
    /// File to write the dump to; must end in `.zip`.
    #[arg(long, default_value = "./dump.zip")]
    pub out_file: PathBuf,

    /// Directory of JSON vulnerability records; repeatable, one source per
    /// directory, named after its basename.
    #[arg(long = "source-dir")]
    pub source_dirs: Vec<PathBuf>,

    /// Directory of pre-parsed NVD record files.
    #[arg(long)]
    pub nvd_dir: Option<PathBuf>,

    /// Accept sources that deliver no records.
    #[arg(long)]
    pub allow_empty_sources: bool,
}

#[derive(Debug, Args)]
pub struct ImportDumpArgs {
    /// Ledger database path.
    #[arg(long)]
    pub db: PathBuf,

    /// Dump archive to apply.
    #[arg(long)]
    pub dump: PathBuf,
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    /// Ledger database path.
    #[arg(long)]
    pub db: PathBuf,

    /// Diff-dump URL to fetch.
    #[arg(long)]
    pub url: String,

    /// Scratch directory for the download.
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,

    /// Fetch timeout in seconds.
    #[arg(long, default_value_t = 300)]
    pub timeout_seconds: u64,

    /// Treat 404 responses as "no dump published yet".
    #[arg(long)]
    pub from_central: bool,
}

impl UpdateArgs {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_generate_dump_defaults() {
        let cli = StratumCli::try_parse_from(["stratum", "generate-dump"]).unwrap();
        match cli.command {
            CommandCli::GenerateDump(args) => {
                assert_eq!(args.out_file, PathBuf::from("./dump.zip"));
                assert!(args.source_dirs.is_empty());
            }
            other => panic!("expected generate-dump, got {other:?}"),
        }
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(StratumCli::try_parse_from(["stratum", "-q", "-v", "generate-dump"]).is_err());
    }
}

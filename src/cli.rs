use anyhow::Result;
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

#[derive(Parser, Debug)]
#[command(
    name = env!("CARGO_PKG_NAME"),
    version = env!("CARGO_PKG_VERSION"),
    author = env!("CARGO_PKG_AUTHORS"),
    about = env!("CARGO_PKG_DESCRIPTION"),
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision and configure the hosts of the given profile
    Apply(ApplyArgs),

    /// Validate the given YAML profile
    Validate(ValidateArgs),

    /// List the known hypervisor identifiers
    Backends(BackendsArgs),

    /// Generate shell completion scripts
    Completions(CompletionsArgs),
}

#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Path to the YAML file defining the profile
    #[arg(short, long, default_value = "hosts.yml")]
    pub file: Utf8PathBuf,

    /// Set the log level
    #[arg(short, long, default_value = "info")]
    pub log_level: LogLevel,
}

#[derive(Args, Debug)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Do not run, just show what would be done
    #[arg(long)]
    pub dry_run: bool,

    /// Leave the provisioned hosts running after the run
    #[arg(long)]
    pub no_cleanup: bool,
}

#[derive(Args, Debug)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub common: CommonArgs,
}

#[derive(Args, Debug)]
pub struct BackendsArgs {
    /// Set the log level
    #[arg(short, long, default_value = "info")]
    pub log_level: LogLevel,
}

#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: Shell,
}

/// Represents log levels for controlling the verbosity of logging output.
///
/// Maps directly to the `tracing` levels. `--log-level debug` additionally
/// shows every step gate decision and every command line before it runs.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Commands {
    /// Log level requested by the subcommand, if it logs at all.
    pub fn log_level(&self) -> Option<LogLevel> {
        match self {
            Self::Apply(opts) => Some(opts.common.log_level),
            Self::Validate(opts) => Some(opts.common.log_level),
            Self::Backends(opts) => Some(opts.log_level),
            Self::Completions(_) => None,
        }
    }
}

pub fn parse_args() -> Result<Cli> {
    Ok(Cli::parse())
}

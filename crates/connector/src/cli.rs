//! `clap` derive CLI, mirroring `bootstrap::cli`'s `--config` flag and
//! `completions` subcommand but expressed with the modern derive API.

use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};

use connector_telemetry::ConsoleLogging;

#[derive(Parser, Debug)]
#[command(name = "connector", about = "Trace/workflow synchronizing connector")]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Console log format.
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log: LogFormat,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate shell completions and exit.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    Off,
    #[default]
    Pretty,
    Json,
}

impl From<LogFormat> for ConsoleLogging {
    fn from(value: LogFormat) -> Self {
        match value {
            LogFormat::Off => ConsoleLogging::Off,
            LogFormat::Pretty => ConsoleLogging::Pretty,
            LogFormat::Json => ConsoleLogging::Json,
        }
    }
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
}

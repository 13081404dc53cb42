//! CLI command implementations

mod convert;
mod inspect;


use crate::cli::{init_tracing, LogLevel};
use crate::config::{Cli, Command};

/// Execute a CLI command based on the parsed arguments
pub fn run_command(cli: Cli) -> Result<(), String> {
    let log_level = LogLevel::from_flags(cli.verbose, cli.quiet);
    init_tracing(log_level);

    match cli.command {
        Command::Convert(args) => convert::run_convert(args, log_level),
        Command::Inspect(args) => inspect::run_inspect(args, log_level),
    }
}

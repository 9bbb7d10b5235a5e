use clap::{CommandFactory, FromArgMatches, Parser};

use crate::commands;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "netprecheck",
    version,
    about = "Checks network prerequisites of controller deployments and emulates their listeners"
)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error). RUST_LOG overrides it.
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Command to run; see the list below
    pub command: String,

    /// Command arguments
    #[arg(value_name = "KEY=VALUE", trailing_var_arg = true)]
    pub args: Vec<String>,
}

impl Cli {
    /// Parse process arguments, with the command table appended to `--help`.
    pub fn parse() -> Self {
        let matches = Cli::command().after_help(commands::usage()).get_matches();
        match Cli::from_arg_matches(&matches) {
            Ok(cli) => cli,
            Err(e) => e.exit(),
        }
    }
}

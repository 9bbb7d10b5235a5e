pub mod checks;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod listeners;
pub mod logging;
pub mod netutils;
pub mod orchestrator;
pub mod probes;
pub mod types;

use tracing::debug;

use crate::cli::Cli;
use crate::commands::Handler;
use crate::config::Settings;
use crate::error::ConfigError;
use crate::orchestrator::{termination_signal, Outcome, Supervisor};
use crate::probes::ProbeSet;

/// Resolve the command line and run it to completion or interruption.
pub async fn run(cli: &Cli) -> Result<Outcome, ConfigError> {
    let invocation = commands::resolve(&cli.command, &cli.args)?;
    debug!(command = invocation.command.name, args = ?invocation.args.redacted(), "Resolved command");

    let supervisor = Supervisor::new(Settings::from_env());
    match invocation.command.handler {
        Handler::Check(scenario) => {
            supervisor
                .check_until(scenario, &invocation.args, &ProbeSet::network(), termination_signal())
                .await
        }
        Handler::Serve(role) => {
            supervisor
                .serve_until(role, &invocation.args, termination_signal())
                .await
        }
    }
}

use std::process::ExitCode;

use anyhow::{Context, Result};
use colored::*;
use netprecheck::cli::Cli;
use netprecheck::commands;
use netprecheck::logging::init_tracing;
use netprecheck::orchestrator::Outcome;

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("could not start the async runtime")?;

    let code = match runtime.block_on(netprecheck::run(&cli)) {
        Ok(outcome) => {
            print_summary(&outcome);
            outcome.exit_code()
        }
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            eprintln!();
            eprintln!("{}", commands::usage());
            1
        }
    };
    Ok(ExitCode::from(code as u8))
}

fn print_summary(outcome: &Outcome) {
    match outcome {
        Outcome::Completed(report) if report.is_clean() => {
            println!("{} {} checks passed", "OK".green().bold(), report.invoked());
        }
        Outcome::Completed(report) => {
            println!(
                "{} {} of {} checks failed",
                "FAILED".red().bold(),
                report.failures(),
                report.invoked()
            );
        }
        Outcome::Interrupted => println!("{}", "Stopped".yellow()),
        Outcome::StartupFailed => println!("{}", "FAILED no listener could start".red().bold()),
    }
}

//! CLI command definitions and dispatch.

pub mod plan;
pub mod run;
pub mod spec;

use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgMatches, Parser, Subcommand};

/// Run a command in isolated Linux namespaces.
#[derive(Parser, Debug)]
#[command(name = "burrow", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Log setup steps at debug level (overridden by `RUST_LOG`).
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Set up the container and exec a command inside it.
    Run(run::RunArgs),
    /// Show what `run` would set up, without touching the kernel.
    Plan(plan::PlanArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// `matches` are the matches `cli` was built from; handlers need them to
/// recover the relative order of repeated mount flags.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli, matches: &ArgMatches) -> anyhow::Result<ExitCode> {
    let (_, sub) = matches.subcommand().context("no subcommand given")?;
    match cli.command {
        Command::Run(args) => run::execute(args, sub),
        Command::Plan(args) => plan::execute(args, sub).map(|()| ExitCode::SUCCESS),
    }
}

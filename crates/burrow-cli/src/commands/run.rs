//! `burrow run`: set up the container and exec a command inside it.

use std::process::ExitCode;

use clap::{ArgMatches, Args};

use super::spec::SpecArgs;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Container spec file and flags.
    #[command(flatten)]
    pub spec: SpecArgs,

    /// Program and arguments to exec once setup succeeds.
    #[arg(required = true, trailing_var_arg = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

/// Executes the `run` command.
///
/// The exit code is the program's own. Setup failures exit with 125 and
/// exec failures with 127, after the error is printed.
///
/// # Errors
///
/// Returns an error if the spec is invalid or the process harness itself
/// fails (pipe, fork, wait).
#[cfg(target_os = "linux")]
pub fn execute(args: RunArgs, matches: &ArgMatches) -> anyhow::Result<ExitCode> {
    use anyhow::Context;
    use burrow_common::constants::{APP_NAME, EXEC_FAILED_EXIT_CODE, SETUP_FAILED_EXIT_CODE};
    use burrow_common::error::SpawnError;
    use burrow_common::types::SetupStage;

    let spec = args.spec.resolve(matches)?;
    tracing::debug!(command = ?args.command, namespaces = ?spec.effective_namespace().enabled(), "running");

    match burrow_core::process::spawn(spec, &args.command) {
        Ok(code) => Ok(exit_code(code)),
        Err(SpawnError::Setup(err)) => {
            eprintln!("{APP_NAME}: {err}");
            let code = if err.stage() == SetupStage::Exec {
                EXEC_FAILED_EXIT_CODE
            } else {
                SETUP_FAILED_EXIT_CODE
            };
            Ok(exit_code(code))
        }
        Err(e) => Err(e).context("failed to run container"),
    }
}

/// Executes the `run` command.
///
/// # Errors
///
/// Always returns an error on non-Linux platforms.
#[cfg(not(target_os = "linux"))]
pub fn execute(args: RunArgs, matches: &ArgMatches) -> anyhow::Result<ExitCode> {
    let spec = args.spec.resolve(matches)?;
    burrow_core::setup_container(spec)?;
    anyhow::bail!("burrow run requires Linux")
}

#[cfg(target_os = "linux")]
fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}

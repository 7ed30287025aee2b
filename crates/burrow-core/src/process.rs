//! Fork, set up, report, exec.
//!
//! The parent forks a child, the child runs [`setup_container`] and writes
//! the outcome to the control pipe, then replaces itself with the target
//! program. The parent learns whether setup worked before relaying the
//! program's exit status.
//!
//! A new PID namespace only takes effect for children of the process that
//! unshared it. With `pid` set the child forks once more: the grandchild
//! is PID 1 of the namespace and execs the program, the intermediate
//! process waits for it and exits with its status.

#![allow(unsafe_code)]

use std::ffi::CString;

use burrow_common::constants::{EXEC_FAILED_EXIT_CODE, SETUP_FAILED_EXIT_CODE};
use burrow_common::error::SpawnError;
use burrow_common::types::{ContainerSpec, SetupStage};
use nix::errno::Errno;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, execvp, fork};

use crate::report::{SetupReport, SetupReporter, control_pipe};
use crate::setup_container;

/// Runs `command` in a child configured by `spec` and returns its exit code.
///
/// A child killed by a signal yields `128 + signo`, the shell convention.
///
/// # Errors
///
/// Returns [`SpawnError::Setup`] with a [`SetupError::Reported`] if the
/// child's setup or exec failed, and the other [`SpawnError`] variants for
/// failures of the harness itself.
///
/// [`SetupError::Reported`]: burrow_common::error::SetupError::Reported
pub fn spawn(spec: ContainerSpec, command: &[String]) -> Result<i32, SpawnError> {
    let argv = to_argv(command)?;
    let (reader, reporter) = control_pipe()?;

    // SAFETY: the child only runs container setup and then calls
    // `execvp(3)` or `_exit(2)`; it never returns into the caller's stack.
    match unsafe { fork() }.map_err(SpawnError::Fork)? {
        ForkResult::Child => {
            drop(reader);
            run_child(spec, &argv, reporter)
        }
        ForkResult::Parent { child } => {
            drop(reporter);
            tracing::debug!(pid = %child, "child forked");
            let report = reader.wait();
            let code = wait_for(child)?;
            report?.into_outcome()?;
            tracing::info!(pid = %child, code, "child exited");
            Ok(code)
        }
    }
}

fn to_argv(command: &[String]) -> Result<Vec<CString>, SpawnError> {
    if command.is_empty() {
        return Err(SpawnError::InvalidCommand {
            message: "no program given".into(),
        });
    }
    command
        .iter()
        .map(|arg| {
            CString::new(arg.as_bytes()).map_err(|_| SpawnError::InvalidCommand {
                message: format!("argument {arg:?} contains a NUL byte"),
            })
        })
        .collect()
}

fn run_child(spec: ContainerSpec, argv: &[CString], mut reporter: SetupReporter) -> ! {
    let pid_namespace = spec.effective_namespace().pid;
    let outcome = setup_container(spec);
    // A parent that stopped listening cannot be told anything; exit codes
    // still carry the outcome.
    let _ = reporter.send(&SetupReport::from_outcome(&outcome));
    if outcome.is_err() {
        exit_now(SETUP_FAILED_EXIT_CODE);
    }

    if pid_namespace {
        // SAFETY: this process is the single-threaded child of `spawn`.
        // The grandchild execs and the intermediate waits and `_exit`s;
        // neither returns into the caller's stack.
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {}
            Ok(ForkResult::Parent { child }) => {
                drop(reporter);
                let code = wait_for(child).unwrap_or(SETUP_FAILED_EXIT_CODE);
                exit_now(code);
            }
            Err(errno) => {
                let _ = reporter.send(&SetupReport::Failed {
                    stage: SetupStage::Namespace,
                    message: format!("fork into PID namespace failed: {errno}"),
                    errno: Some(errno as i32),
                });
                exit_now(SETUP_FAILED_EXIT_CODE);
            }
        }
    }

    let Err(errno) = execvp(&argv[0], argv);
    let _ = reporter.send(&SetupReport::ExecFailed { errno: errno as i32 });
    exit_now(EXEC_FAILED_EXIT_CODE)
}

/// Terminates the forked process without running atexit handlers or
/// flushing stdio buffers inherited from the parent.
fn exit_now(code: i32) -> ! {
    // SAFETY: `_exit(2)` takes no pointers and never returns.
    unsafe { libc::_exit(code) }
}

fn wait_for(child: Pid) -> Result<i32, SpawnError> {
    loop {
        match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                tracing::warn!(pid = %child, ?signal, "child killed by signal");
                return Ok(128 + signal as i32);
            }
            Ok(_) | Err(Errno::EINTR) => {}
            Err(errno) => return Err(SpawnError::Wait(errno)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_common::error::SetupError;

    fn cmd(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = spawn(ContainerSpec::default(), &[]).unwrap_err();
        assert!(matches!(err, SpawnError::InvalidCommand { .. }));
    }

    #[test]
    fn nul_byte_is_rejected() {
        let err = spawn(ContainerSpec::default(), &cmd(&["echo", "a\0b"])).unwrap_err();
        assert!(matches!(err, SpawnError::InvalidCommand { .. }));
    }

    #[test]
    fn exit_code_is_relayed() {
        let code = spawn(ContainerSpec::default(), &cmd(&["sh", "-c", "exit 3"])).unwrap();
        assert_eq!(code, 3);
    }

    #[test]
    fn signal_death_maps_to_shell_convention() {
        let code = spawn(ContainerSpec::default(), &cmd(&["sh", "-c", "kill -9 $$"])).unwrap();
        assert_eq!(code, 128 + 9);
    }

    #[test]
    fn missing_program_is_an_exec_failure() {
        let err = spawn(
            ContainerSpec::default(),
            &cmd(&["/nonexistent/burrow-test-binary"]),
        )
        .unwrap_err();
        let SpawnError::Setup(setup) = err else {
            panic!("expected setup error, got {err}");
        };
        assert_eq!(setup.stage(), SetupStage::Exec);
        assert_eq!(setup.errno(), Some(libc::ENOENT));
    }

    #[test]
    fn invalid_spec_is_reported_by_the_child() {
        let spec = ContainerSpec {
            root: Some("relative/root".into()),
            ..ContainerSpec::default()
        };
        let err = spawn(spec, &cmd(&["true"])).unwrap_err();
        assert!(matches!(
            err,
            SpawnError::Setup(SetupError::Reported {
                stage: SetupStage::Validate,
                ..
            })
        ));
    }
}

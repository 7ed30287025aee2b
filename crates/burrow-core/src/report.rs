//! Setup outcome reporting from child to parent.
//!
//! The child writes newline-delimited JSON [`SetupReport`]s to the write end
//! of a close-on-exec pipe. A successful `execvp(3)` closes that end, so
//! the parent simply reads to EOF and acts on the last report.

use std::fs::File;
use std::io::{self, Read, Write};

use burrow_common::error::{SetupError, SpawnError};
use burrow_common::types::SetupStage;
use nix::fcntl::OFlag;
use nix::unistd::pipe2;
use serde::{Deserialize, Serialize};

/// One message on the control pipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SetupReport {
    /// Setup finished; exec is next.
    Ready,
    /// Setup failed; the child exits without exec.
    Failed {
        /// Stage that failed.
        stage: SetupStage,
        /// Rendered error chain.
        message: String,
        /// Raw errno, if any.
        errno: Option<i32>,
    },
    /// Setup finished but `execvp(3)` failed.
    ExecFailed {
        /// Raw errno from exec.
        errno: i32,
    },
}

impl SetupReport {
    /// Builds the report for a setup outcome.
    #[must_use]
    pub fn from_outcome(outcome: &Result<(), SetupError>) -> Self {
        match outcome {
            Ok(()) => Self::Ready,
            Err(e) => Self::Failed {
                stage: e.stage(),
                message: e.to_string(),
                errno: e.errno(),
            },
        }
    }

    /// Turns a report back into a setup outcome on the parent side.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::Reported`] for failures.
    pub fn into_outcome(self) -> Result<(), SetupError> {
        match self {
            Self::Ready => Ok(()),
            Self::Failed {
                stage,
                message,
                errno,
            } => Err(SetupError::Reported {
                stage,
                message,
                errno,
            }),
            Self::ExecFailed { errno } => Err(SetupError::Reported {
                stage: SetupStage::Exec,
                message: io::Error::from_raw_os_error(errno).to_string(),
                errno: Some(errno),
            }),
        }
    }
}

/// Creates the control pipe. Both ends are close-on-exec.
///
/// # Errors
///
/// Returns [`SpawnError::Pipe`] if `pipe2(2)` fails.
pub fn control_pipe() -> Result<(ReportReader, SetupReporter), SpawnError> {
    let (read, write) = pipe2(OFlag::O_CLOEXEC).map_err(SpawnError::Pipe)?;
    Ok((
        ReportReader {
            file: File::from(read),
        },
        SetupReporter {
            file: File::from(write),
        },
    ))
}

/// Child-side write end.
#[derive(Debug)]
pub struct SetupReporter {
    file: File,
}

impl SetupReporter {
    /// Writes one report line.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipe write fails.
    pub fn send(&mut self, report: &SetupReport) -> io::Result<()> {
        let mut line = serde_json::to_vec(report).map_err(io::Error::other)?;
        line.push(b'\n');
        self.file.write_all(&line)
    }
}

/// Parent-side read end.
#[derive(Debug)]
pub struct ReportReader {
    file: File,
}

impl ReportReader {
    /// Reads until every write end is closed and returns the last report.
    ///
    /// The parent must drop its own [`SetupReporter`] first, or this never
    /// sees EOF.
    ///
    /// # Errors
    ///
    /// Returns [`SpawnError::NoReport`] if the child wrote nothing and
    /// [`SpawnError::Report`] if the stream is unreadable or malformed.
    pub fn wait(mut self) -> Result<SetupReport, SpawnError> {
        let mut raw = String::new();
        let _ = self
            .file
            .read_to_string(&mut raw)
            .map_err(|e| SpawnError::Report(e.to_string()))?;
        parse_last(&raw)
    }
}

fn parse_last(raw: &str) -> Result<SetupReport, SpawnError> {
    let line = raw
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or(SpawnError::NoReport)?;
    serde_json::from_str(line).map_err(|e| SpawnError::Report(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_common::error::{MountError, RollbackFailure, SpecError};
    use burrow_common::types::MountKind;
    use nix::errno::Errno;

    #[test]
    fn ready_round_trips_through_a_pipe() {
        let (reader, mut reporter) = control_pipe().unwrap();
        reporter.send(&SetupReport::Ready).unwrap();
        drop(reporter);
        assert_eq!(reader.wait().unwrap(), SetupReport::Ready);
    }

    #[test]
    fn last_report_wins() {
        let (reader, mut reporter) = control_pipe().unwrap();
        reporter.send(&SetupReport::Ready).unwrap();
        reporter
            .send(&SetupReport::ExecFailed {
                errno: libc::ENOENT,
            })
            .unwrap();
        drop(reporter);

        let err = reader.wait().unwrap().into_outcome().unwrap_err();
        assert_eq!(err.stage(), SetupStage::Exec);
        assert_eq!(err.errno(), Some(libc::ENOENT));
    }

    #[test]
    fn silent_child_is_no_report() {
        let (reader, reporter) = control_pipe().unwrap();
        drop(reporter);
        assert!(matches!(reader.wait(), Err(SpawnError::NoReport)));
    }

    #[test]
    fn failures_keep_stage_and_message() {
        let outcome = Err(SetupError::from(SpecError::HostnameWithoutUts));
        let report = SetupReport::from_outcome(&outcome);
        assert!(matches!(
            &report,
            SetupReport::Failed { stage: SetupStage::Validate, errno: None, .. }
        ));

        let err = report.into_outcome().unwrap_err();
        assert_eq!(err.stage(), SetupStage::Validate);
        assert!(err.to_string().contains("UTS"));
    }

    #[test]
    fn rollback_failures_survive_the_pipe() {
        let outcome = Err(SetupError::Mount {
            index: 2,
            target: "/mnt".into(),
            source: MountError::Syscall {
                kind: MountKind::Bind,
                op: "bind",
                target: "/mnt".into(),
                errno: Errno::EPERM,
            },
            rollback_failures: vec![RollbackFailure {
                mount_point: "/data".into(),
                kind: MountKind::Tmpfs,
                errno: Errno::EBUSY,
            }],
        });

        let (reader, mut reporter) = control_pipe().unwrap();
        reporter.send(&SetupReport::from_outcome(&outcome)).unwrap();
        drop(reporter);

        let err = reader.wait().unwrap().into_outcome().unwrap_err();
        assert_eq!(err.stage(), SetupStage::Mount);
        assert_eq!(err.errno(), Some(libc::EPERM));
        let text = err.to_string();
        assert!(text.contains("rollback: 1 unmount(s) failed"), "{text}");
        assert!(text.contains("/data"), "{text}");
    }

    #[test]
    fn garbage_is_a_report_error() {
        assert!(matches!(parse_last("not json\n"), Err(SpawnError::Report(_))));
    }

    #[test]
    fn wire_format_is_tagged_by_status() {
        let json = serde_json::to_string(&SetupReport::Failed {
            stage: SetupStage::Mount,
            message: "boom".into(),
            errno: Some(1),
        })
        .unwrap();
        assert_eq!(
            json,
            r#"{"status":"failed","stage":"mount","message":"boom","errno":1}"#
        );
    }
}

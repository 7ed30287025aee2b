//! Error taxonomy for container setup.
//!
//! Each setup stage has its own error type. [`SetupError`] wraps them with
//! enough context (mount index, namespace names, pivot step) to tell the
//! spawn layer which stage failed and why.

use std::fmt;
use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

use crate::types::{MountKind, PivotState, SetupStage};

/// The container spec is malformed.
#[derive(Debug, Error)]
pub enum SpecError {
    /// A mount target is not absolute.
    #[error("mount #{index}: target {target} must be absolute")]
    RelativeTarget {
        /// Position in the mount list.
        index: usize,
        /// Offending target.
        target: PathBuf,
    },

    /// A mount target contains `..`.
    #[error("mount #{index}: target {target} must not contain `..`")]
    TraversalTarget {
        /// Position in the mount list.
        index: usize,
        /// Offending target.
        target: PathBuf,
    },

    /// A bind source or overlay directory is not absolute.
    #[error("mount #{index}: host path {path} must be absolute")]
    RelativeHostPath {
        /// Position in the mount list.
        index: usize,
        /// Offending path.
        path: PathBuf,
    },

    /// An overlay has no lower directory.
    #[error("mount #{index}: overlay needs at least one lower directory")]
    EmptyLowerDirs {
        /// Position in the mount list.
        index: usize,
    },

    /// The replacement root is not absolute.
    #[error("root {root} must be absolute")]
    RelativeRoot {
        /// Offending root.
        root: PathBuf,
    },

    /// A hostname was given without a UTS namespace.
    #[error("hostname requires a UTS namespace")]
    HostnameWithoutUts,
}

/// Broad classification of a [`NamespaceError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespaceErrorKind {
    /// The caller lacks the privilege to create the namespace.
    PermissionDenied,
    /// The running kernel does not support a requested namespace.
    NotSupported,
    /// A per-user namespace limit was hit.
    LimitReached,
    /// Anything else.
    Other,
}

/// Namespace creation or configuration failed.
#[derive(Debug, Error)]
pub enum NamespaceError {
    /// `unshare(2)` was rejected.
    #[error("unshare({namespaces}) failed: {errno}")]
    Unshare {
        /// Comma-separated namespace names that were requested.
        namespaces: String,
        /// Kernel error.
        errno: Errno,
    },

    /// Remounting `/` as recursively private failed.
    #[error("failed to make the mount table private: {errno}")]
    Propagation {
        /// Kernel error.
        errno: Errno,
    },

    /// `sethostname(2)` failed.
    #[error("failed to set hostname {hostname:?}: {errno}")]
    Hostname {
        /// Requested hostname.
        hostname: String,
        /// Kernel error.
        errno: Errno,
    },
}

impl NamespaceError {
    /// The underlying kernel error.
    #[must_use]
    pub const fn errno(&self) -> Errno {
        match self {
            Self::Unshare { errno, .. } | Self::Propagation { errno } | Self::Hostname { errno, .. } => {
                *errno
            }
        }
    }

    /// Classifies the failure.
    #[must_use]
    pub const fn kind(&self) -> NamespaceErrorKind {
        match self.errno() {
            Errno::EPERM | Errno::EACCES => NamespaceErrorKind::PermissionDenied,
            Errno::EINVAL => NamespaceErrorKind::NotSupported,
            Errno::ENOSPC | Errno::EUSERS => NamespaceErrorKind::LimitReached,
            _ => NamespaceErrorKind::Other,
        }
    }
}

/// Writing a UID/GID map (or the `setgroups` guard) failed.
#[derive(Debug, Error)]
#[error("failed to write {path}: {source}")]
pub struct IdentityMappingError {
    /// Procfs file that rejected the write.
    pub path: PathBuf,
    /// Underlying I/O error.
    pub source: io::Error,
}

/// Broad classification of a [`MountError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountErrorKind {
    /// Missing privilege, or a read-only filesystem.
    PermissionDenied,
    /// The kernel rejected the arguments.
    InvalidArgument,
    /// A filesystem constraint does not hold.
    ConstraintViolated,
    /// A path does not exist.
    NotFound,
    /// The mount point is busy.
    Busy,
    /// Anything else.
    Other,
}

impl MountErrorKind {
    const fn from_errno(errno: Errno) -> Self {
        match errno {
            Errno::EPERM | Errno::EACCES | Errno::EROFS => Self::PermissionDenied,
            Errno::EINVAL => Self::InvalidArgument,
            Errno::ENOENT | Errno::ENOTDIR => Self::NotFound,
            Errno::EBUSY => Self::Busy,
            Errno::EXDEV => Self::ConstraintViolated,
            _ => Self::Other,
        }
    }
}

/// A single mount driver failed.
#[derive(Debug, Error)]
pub enum MountError {
    /// The mount point could not be created.
    #[error("failed to prepare mount point {path}: {source}")]
    MountPoint {
        /// Path being created.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// A host path the mount depends on does not exist.
    #[error("{kind} mount needs {path}, which does not exist")]
    MissingPath {
        /// Mount type.
        kind: MountKind,
        /// Missing path.
        path: PathBuf,
    },

    /// A filesystem constraint is violated.
    #[error("{kind} mount at {target}: {reason}")]
    Constraint {
        /// Mount type.
        kind: MountKind,
        /// Mount point.
        target: PathBuf,
        /// What does not hold.
        reason: String,
    },

    /// `mount(2)` returned an error.
    #[error("{kind} {op} at {target} failed: {errno}")]
    Syscall {
        /// Mount type.
        kind: MountKind,
        /// Which call in the driver's sequence failed.
        op: &'static str,
        /// Mount point.
        target: PathBuf,
        /// Kernel error.
        errno: Errno,
    },
}

impl MountError {
    /// The kernel error behind this failure, if any.
    #[must_use]
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Self::MountPoint { source, .. } => source.raw_os_error().map(Errno::from_raw),
            Self::MissingPath { .. } => Some(Errno::ENOENT),
            Self::Constraint { .. } => None,
            Self::Syscall { errno, .. } => Some(*errno),
        }
    }

    /// Classifies the failure.
    #[must_use]
    pub fn kind(&self) -> MountErrorKind {
        match self {
            Self::Constraint { .. } => MountErrorKind::ConstraintViolated,
            Self::MissingPath { .. } => MountErrorKind::NotFound,
            Self::MountPoint { .. } | Self::Syscall { .. } => self
                .errno()
                .map_or(MountErrorKind::Other, MountErrorKind::from_errno),
        }
    }
}

/// An unmount issued during rollback failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackFailure {
    /// Mount point that could not be unmounted.
    pub mount_point: PathBuf,
    /// Mount type.
    pub kind: MountKind,
    /// Kernel error.
    pub errno: Errno,
}

impl fmt::Display for RollbackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "unmount of {} at {} failed: {}",
            self.kind,
            self.mount_point.display(),
            self.errno
        )
    }
}

/// Renders rollback failures as a suffix for the error they accompany.
fn rollback_note(failures: &[RollbackFailure]) -> String {
    if failures.is_empty() {
        return String::new();
    }
    let details = failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    format!("; rollback: {} unmount(s) failed: {details}", failures.len())
}

/// Individual actions performed by the root pivot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivotStep {
    /// Checking that the new root is a directory.
    Inspect,
    /// Bind-mounting the new root onto itself.
    SelfBind,
    /// Changing the working directory.
    ChangeDir,
    /// Creating the put-old directory.
    CreatePutOld,
    /// The `pivot_root(2)` call.
    PivotRoot,
    /// Lazily unmounting the old root.
    DetachOldRoot,
    /// Removing the put-old directory.
    RemovePutOld,
}

impl fmt::Display for PivotStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Inspect => "inspect new root",
            Self::SelfBind => "self bind mount",
            Self::ChangeDir => "chdir",
            Self::CreatePutOld => "create put-old directory",
            Self::PivotRoot => "pivot_root",
            Self::DetachOldRoot => "detach old root",
            Self::RemovePutOld => "remove put-old directory",
        };
        f.write_str(name)
    }
}

/// A root pivot transition failed.
#[derive(Debug, Error)]
#[error("{step} on {path} failed (state {state}): {source}")]
pub struct PivotError {
    /// Last state reached before the failure.
    pub state: PivotState,
    /// Action that failed.
    pub step: PivotStep,
    /// Path the action operated on.
    pub path: PathBuf,
    /// Underlying error.
    pub source: io::Error,
}

/// Umbrella error returned by container setup.
#[derive(Debug, Error)]
pub enum SetupError {
    /// Non-empty spec on a platform without namespaces.
    #[error("container setup is not supported on this platform ({platform})")]
    Unsupported {
        /// Target OS name.
        platform: &'static str,
    },

    /// The spec failed validation.
    #[error("invalid container spec: {0}")]
    InvalidSpec(#[from] SpecError),

    /// Namespace creation or configuration failed.
    #[error("namespace setup failed: {0}")]
    Namespace(#[from] NamespaceError),

    /// UID/GID mapping failed.
    #[error("identity mapping failed: {0}")]
    IdentityMapping(#[from] IdentityMappingError),

    /// A mount failed; earlier mounts were rolled back.
    #[error("mount #{index} at {target} failed: {source}{}", rollback_note(.rollback_failures))]
    Mount {
        /// Position in the mount list.
        index: usize,
        /// Container-side target of the failing mount.
        target: PathBuf,
        /// The driver error.
        source: MountError,
        /// Unmounts that failed during rollback.
        rollback_failures: Vec<RollbackFailure>,
    },

    /// Root replacement failed.
    #[error("root pivot failed: {0}")]
    Pivot(#[from] PivotError),

    /// Failure reported by a child over the control pipe.
    #[error("{stage} failed in child: {message}")]
    Reported {
        /// Stage that failed.
        stage: SetupStage,
        /// Rendered error message.
        message: String,
        /// Raw errno, if the failure had one.
        errno: Option<i32>,
    },
}

impl SetupError {
    /// The stage that failed.
    #[must_use]
    pub const fn stage(&self) -> SetupStage {
        match self {
            Self::Unsupported { .. } => SetupStage::Platform,
            Self::InvalidSpec(_) => SetupStage::Validate,
            Self::Namespace(NamespaceError::Unshare { .. }) => SetupStage::Namespace,
            Self::Namespace(NamespaceError::Propagation { .. }) => SetupStage::Propagation,
            Self::Namespace(NamespaceError::Hostname { .. }) => SetupStage::Hostname,
            Self::IdentityMapping(_) => SetupStage::IdentityMapping,
            Self::Mount { .. } => SetupStage::Mount,
            Self::Pivot(_) => SetupStage::Pivot,
            Self::Reported { stage, .. } => *stage,
        }
    }

    /// Raw errno behind the failure, if any.
    #[must_use]
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Unsupported { .. } | Self::InvalidSpec(_) => None,
            Self::Namespace(e) => Some(e.errno() as i32),
            Self::IdentityMapping(e) => e.source.raw_os_error(),
            Self::Mount { source, .. } => source.errno().map(|e| e as i32),
            Self::Pivot(e) => e.source.raw_os_error(),
            Self::Reported { errno, .. } => *errno,
        }
    }
}

/// Loading a spec file failed.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Spec file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },

    /// The file is not a valid spec.
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// Spec file path.
        path: PathBuf,
        /// Underlying parse error.
        source: serde_json::Error,
    },
}

/// Spawning a contained process failed.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// The command line is empty or contains a NUL byte.
    #[error("invalid command: {message}")]
    InvalidCommand {
        /// What is wrong with it.
        message: String,
    },

    /// Creating the control pipe failed.
    #[error("failed to create control pipe: {0}")]
    Pipe(Errno),

    /// `fork(2)` failed.
    #[error("fork failed: {0}")]
    Fork(Errno),

    /// `waitpid(2)` failed.
    #[error("waiting for child failed: {0}")]
    Wait(Errno),

    /// The control pipe could not be read or decoded.
    #[error("malformed setup report: {0}")]
    Report(String),

    /// The child exited without reporting.
    #[error("child exited before reporting setup outcome")]
    NoReport,

    /// The child reported a setup failure.
    #[error(transparent)]
    Setup(#[from] SetupError),
}

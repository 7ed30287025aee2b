//! Container setup model: namespaces, mounts, and root replacement.
//!
//! Everything here is plain data. A [`ContainerSpec`] is built by the
//! spawn layer, moved into the child after `fork(2)`, and consumed by
//! `burrow_core::setup::setup_container`.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::SpecError;

/// Which namespaces the child unshares before any mount work.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceSpec {
    /// New user namespace; the caller is mapped to UID/GID 0 inside it.
    pub user: bool,
    /// New PID namespace (takes effect for children of the caller).
    pub pid: bool,
    /// New mount namespace.
    pub mount: bool,
    /// New network namespace.
    pub net: bool,
    /// New IPC namespace.
    pub ipc: bool,
    /// New UTS namespace.
    pub uts: bool,
    /// New cgroup namespace.
    pub cgroup: bool,
    /// Hostname applied inside the UTS namespace.
    pub hostname: Option<String>,
}

impl NamespaceSpec {
    /// Returns `true` when no namespace is requested.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        !(self.user || self.pid || self.mount || self.net || self.ipc || self.uts || self.cgroup)
    }

    /// Short kernel names of the enabled namespaces, in unshare order.
    #[must_use]
    pub fn enabled(&self) -> Vec<&'static str> {
        [
            (self.user, "user"),
            (self.pid, "pid"),
            (self.mount, "mnt"),
            (self.net, "net"),
            (self.ipc, "ipc"),
            (self.uts, "uts"),
            (self.cgroup, "cgroup"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect()
    }
}

/// Discriminant of a [`MountSpec`], used in logs and error context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountKind {
    /// Anonymous tmpfs.
    Tmpfs,
    /// Bind mount of a host path.
    Bind,
    /// Overlay of lower directories with a writable upper directory.
    Overlay,
}

impl fmt::Display for MountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Tmpfs => "tmpfs",
            Self::Bind => "bind",
            Self::Overlay => "overlay",
        })
    }
}

/// Anonymous tmpfs mounted at `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TmpfsMount {
    /// Mount point as seen inside the container.
    pub target: PathBuf,
    /// Size limit in bytes; the kernel default applies when absent.
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

/// Host path `source` bound onto `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    /// Host path to expose.
    pub source: PathBuf,
    /// Mount point as seen inside the container.
    pub target: PathBuf,
    /// Remount read-only after binding.
    #[serde(default)]
    pub readonly: bool,
}

/// Overlay of `lower_dirs` with `upper_dir` as the writable layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayMount {
    /// Read-only layers, topmost first.
    pub lower_dirs: Vec<PathBuf>,
    /// Writable layer.
    pub upper_dir: PathBuf,
    /// Scratch directory on the same filesystem as `upper_dir`.
    pub work_dir: PathBuf,
    /// Mount point as seen inside the container.
    pub target: PathBuf,
}

/// One mount operation. The set of mount types is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MountSpec {
    /// See [`TmpfsMount`].
    Tmpfs(TmpfsMount),
    /// See [`BindMount`].
    Bind(BindMount),
    /// See [`OverlayMount`].
    Overlay(OverlayMount),
}

impl MountSpec {
    /// Mount point as seen inside the container.
    #[must_use]
    pub fn target(&self) -> &Path {
        match self {
            Self::Tmpfs(m) => &m.target,
            Self::Bind(m) => &m.target,
            Self::Overlay(m) => &m.target,
        }
    }

    /// The mount type.
    #[must_use]
    pub const fn kind(&self) -> MountKind {
        match self {
            Self::Tmpfs(_) => MountKind::Tmpfs,
            Self::Bind(_) => MountKind::Bind,
            Self::Overlay(_) => MountKind::Overlay,
        }
    }

    /// Path the mount is attached to during setup. Without a replacement
    /// root this is the target itself; with one, the target is placed under
    /// the new root.
    #[must_use]
    pub fn mount_point(&self, root: Option<&Path>) -> PathBuf {
        let target = self.target();
        match root {
            Some(root) => root.join(target.strip_prefix("/").unwrap_or(target)),
            None => target.to_path_buf(),
        }
    }

    /// Host paths this mount reads from.
    fn host_paths(&self) -> Vec<&Path> {
        match self {
            Self::Tmpfs(_) => Vec::new(),
            Self::Bind(m) => vec![&m.source],
            Self::Overlay(m) => m
                .lower_dirs
                .iter()
                .map(PathBuf::as_path)
                .chain([m.upper_dir.as_path(), m.work_dir.as_path()])
                .collect(),
        }
    }
}

/// Everything the child needs to build its private view before exec.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSpec {
    /// Namespaces to unshare.
    pub namespace: NamespaceSpec,
    /// Mounts, in application order.
    pub mounts: Vec<MountSpec>,
    /// Directory that becomes `/` via `pivot_root(2)`.
    pub root: Option<PathBuf>,
}

impl ContainerSpec {
    /// Returns `true` when the spec asks for no isolation at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.namespace.is_empty() && self.mounts.is_empty() && self.root.is_none()
    }

    /// The namespace set with `mount` forced on whenever any mount or
    /// root replacement is requested.
    #[must_use]
    pub fn effective_namespace(&self) -> NamespaceSpec {
        let mut ns = self.namespace.clone();
        if !self.mounts.is_empty() || self.root.is_some() {
            ns.mount = true;
        }
        ns
    }

    /// Checks the shape of the spec before any syscall is attempted.
    ///
    /// # Errors
    ///
    /// Returns a [`SpecError`] describing the first offending field.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.namespace.hostname.is_some() && !self.namespace.uts {
            return Err(SpecError::HostnameWithoutUts);
        }
        if let Some(root) = &self.root {
            if !root.is_absolute() {
                return Err(SpecError::RelativeRoot { root: root.clone() });
            }
        }
        for (index, mount) in self.mounts.iter().enumerate() {
            let target = mount.target();
            if !target.is_absolute() {
                return Err(SpecError::RelativeTarget {
                    index,
                    target: target.to_path_buf(),
                });
            }
            if target.components().any(|c| c == Component::ParentDir) {
                return Err(SpecError::TraversalTarget {
                    index,
                    target: target.to_path_buf(),
                });
            }
            if let MountSpec::Overlay(overlay) = mount {
                if overlay.lower_dirs.is_empty() {
                    return Err(SpecError::EmptyLowerDirs { index });
                }
            }
            if let Some(path) = mount.host_paths().into_iter().find(|p| !p.is_absolute()) {
                return Err(SpecError::RelativeHostPath {
                    index,
                    path: path.to_path_buf(),
                });
            }
        }
        Ok(())
    }
}

/// Phase of container setup, reported across the control pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupStage {
    /// Platform gate before any namespace work.
    Platform,
    /// Spec validation.
    Validate,
    /// `unshare(2)`.
    Namespace,
    /// UID/GID map writes.
    IdentityMapping,
    /// Making the new mount table private.
    Propagation,
    /// Setting the UTS hostname.
    Hostname,
    /// Applying the mount list.
    Mount,
    /// Root replacement.
    Pivot,
    /// Executing the target program.
    Exec,
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Platform => "platform check",
            Self::Validate => "spec validation",
            Self::Namespace => "namespace creation",
            Self::IdentityMapping => "identity mapping",
            Self::Propagation => "mount propagation",
            Self::Hostname => "hostname",
            Self::Mount => "mount",
            Self::Pivot => "root pivot",
            Self::Exec => "exec",
        };
        f.write_str(name)
    }
}

/// States of the root pivot, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PivotState {
    /// Nothing has been done yet.
    NotStarted,
    /// The new root is bind-mounted onto itself.
    SelfBindMounted,
    /// `pivot_root(2)` succeeded; the old root is under the put-old directory.
    Pivoted,
    /// The old root is detached and its directory removed.
    OldRootDetached,
}

impl fmt::Display for PivotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not-started"),
            Self::SelfBindMounted => write!(f, "self-bind-mounted"),
            Self::Pivoted => write!(f, "pivoted"),
            Self::OldRootDetached => write!(f, "old-root-detached"),
        }
    }
}

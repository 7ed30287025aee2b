//! Filesystem view construction for container setup.
//!
//! Provides the tmpfs, bind, and overlay drivers, the planner that applies
//! a mount list in order with reverse-order rollback, and the root pivot.

pub mod mount;
pub mod overlayfs;
pub mod pivot_root;
pub mod planner;
pub mod tmpfs;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use burrow_common::error::{MountError, RollbackFailure};
use burrow_common::types::{MountKind, MountSpec};
use nix::mount::{MntFlags, umount2};

/// Bookkeeping for one mount that is currently live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMountRecord {
    /// Position of the spec in the mount list.
    pub index: usize,
    /// Mount type.
    pub kind: MountKind,
    /// Target as seen inside the container.
    pub target: PathBuf,
    /// Path the mount was attached to in the setup-time view.
    pub mount_point: PathBuf,
    /// Host entries created for the mount point, outermost first. Removed
    /// again after the mount is undone.
    pub created: Vec<PathBuf>,
}

/// Applies one mount spec with the driver for its type.
///
/// # Errors
///
/// Returns the driver's [`MountError`]. A driver that fails never leaves
/// a half-applied mount behind.
pub fn apply(
    index: usize,
    spec: &MountSpec,
    root: Option<&Path>,
) -> Result<AppliedMountRecord, MountError> {
    let mount_point = spec.mount_point(root);
    let created = match spec {
        MountSpec::Tmpfs(m) => tmpfs::mount_tmpfs(m, &mount_point)?,
        MountSpec::Bind(m) => mount::bind_mount(m, &mount_point)?,
        MountSpec::Overlay(m) => overlayfs::mount_overlay(m, &mount_point)?,
    };
    Ok(AppliedMountRecord {
        index,
        kind: spec.kind(),
        target: spec.target().to_path_buf(),
        mount_point,
        created,
    })
}

/// Detaches a previously applied mount and removes the mount-point entries
/// it created.
///
/// # Errors
///
/// Returns a [`RollbackFailure`] if `umount2(2)` fails. The created
/// entries are then left alone, since they are still covered.
pub fn unmount(record: &AppliedMountRecord) -> Result<(), RollbackFailure> {
    umount2(&record.mount_point, MntFlags::MNT_DETACH).map_err(|errno| RollbackFailure {
        mount_point: record.mount_point.clone(),
        kind: record.kind,
        errno,
    })?;
    tracing::debug!(
        kind = %record.kind,
        mount_point = %record.mount_point.display(),
        "unmounted"
    );
    remove_created(&record.created);
    Ok(())
}

/// Creates `path` as a directory if it does not exist yet and returns
/// the directories that had to be created, outermost first.
pub(crate) fn prepare_dir(path: &Path) -> Result<Vec<PathBuf>, MountError> {
    let created = missing_ancestors(path);
    fs::create_dir_all(path).map_err(|e| {
        remove_created(&created);
        MountError::MountPoint {
            path: path.to_path_buf(),
            source: e,
        }
    })?;
    Ok(created)
}

/// Creates `path` as an empty regular file if it does not exist yet and
/// returns every entry that had to be created, outermost first.
pub(crate) fn prepare_file(path: &Path) -> Result<Vec<PathBuf>, MountError> {
    if path.exists() {
        return Ok(Vec::new());
    }
    let mut created = path.parent().map(missing_ancestors).unwrap_or_default();
    let result = path
        .parent()
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|()| {
            fs::OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
                .map(drop)
        });
    if let Err(e) = result {
        remove_created(&created);
        return Err(MountError::MountPoint {
            path: path.to_path_buf(),
            source: e,
        });
    }
    created.push(path.to_path_buf());
    Ok(created)
}

/// Removes entries returned by [`prepare_dir`] or [`prepare_file`],
/// innermost first. Failures are logged and skipped.
pub(crate) fn remove_created(created: &[PathBuf]) {
    for path in created.iter().rev() {
        let removed = if path.is_dir() {
            fs::remove_dir(path)
        } else {
            fs::remove_file(path)
        };
        match removed {
            Ok(()) => tracing::debug!(path = %path.display(), "removed mount point"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove mount point"),
        }
    }
}

fn missing_ancestors(path: &Path) -> Vec<PathBuf> {
    let mut missing: Vec<PathBuf> = path
        .ancestors()
        .take_while(|p| !p.as_os_str().is_empty() && fs::symlink_metadata(p).is_err())
        .map(Path::to_path_buf)
        .collect();
    missing.reverse();
    missing
}

//! Bind mounts of host paths.
//!
//! `MS_BIND` ignores `MS_RDONLY`, so a read-only bind is always two calls:
//! the bind itself, then a remount of the same mount point with the
//! read-only flag added. Skipping the second call yields a writable mount.
//! The bind is recursive, and a remount only changes the mount it names,
//! so every submount carried along is remounted read-only as well.

use std::io;
use std::path::{Path, PathBuf};

use burrow_common::constants::PROC_SELF;
use burrow_common::error::MountError;
use burrow_common::types::{BindMount, MountKind};
use nix::errno::Errno;
use nix::mount::{MntFlags, MsFlags, mount, umount2};
use nix::sys::statvfs::{FsFlags, statvfs};

/// Binds `spec.source` onto `mount_point`, then remounts the whole bound
/// tree read-only when requested. Returns the host entries that had to be
/// created for the mount point.
///
/// A regular-file source gets a file mount point; anything else gets a
/// directory. If a read-only remount fails the bind is detached again,
/// so a failed call never leaves a writable mount behind.
///
/// # Errors
///
/// Returns an error if the source is missing, the mount point cannot be
/// created, or any `mount(2)` call fails.
pub fn bind_mount(spec: &BindMount, mount_point: &Path) -> Result<Vec<PathBuf>, MountError> {
    let metadata = std::fs::metadata(&spec.source).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => MountError::MissingPath {
            kind: MountKind::Bind,
            path: spec.source.clone(),
        },
        _ => MountError::MountPoint {
            path: spec.source.clone(),
            source: e,
        },
    })?;
    let created = if metadata.is_file() {
        super::prepare_file(mount_point)?
    } else {
        super::prepare_dir(mount_point)?
    };

    if let Err(errno) = mount(
        Some(&spec.source),
        mount_point,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REC,
        None::<&str>,
    ) {
        super::remove_created(&created);
        return Err(syscall_error("bind", mount_point, errno));
    }

    if spec.readonly {
        if let Err((failed_at, errno)) = remount_tree_readonly(mount_point) {
            if let Err(detach) = umount2(mount_point, MntFlags::MNT_DETACH) {
                tracing::warn!(
                    mount_point = %mount_point.display(),
                    error = %detach,
                    "failed to detach bind after readonly remount failure"
                );
            } else {
                super::remove_created(&created);
            }
            return Err(syscall_error("readonly remount", &failed_at, errno));
        }
    }

    tracing::info!(
        source = %spec.source.display(),
        mount_point = %mount_point.display(),
        readonly = spec.readonly,
        "bind mount created"
    );
    Ok(created)
}

/// Remounts `mount_point` and every mount below it read-only. On failure
/// returns the mount that refused.
fn remount_tree_readonly(mount_point: &Path) -> Result<(), (PathBuf, Errno)> {
    remount_readonly(mount_point).map_err(|errno| (mount_point.to_path_buf(), errno))?;

    let mountinfo = Path::new(PROC_SELF).join("mountinfo");
    let table = std::fs::read_to_string(&mountinfo).map_err(|e| {
        let errno = e.raw_os_error().map_or(Errno::EIO, Errno::from_raw);
        (mountinfo.clone(), errno)
    })?;
    let top = std::fs::canonicalize(mount_point).unwrap_or_else(|_| mount_point.to_path_buf());

    for sub in submounts(&table, &top) {
        remount_readonly(&sub).map_err(|errno| (sub.clone(), errno))?;
        tracing::debug!(submount = %sub.display(), "submount remounted readonly");
    }
    Ok(())
}

fn remount_readonly(mount_point: &Path) -> nix::Result<()> {
    mount(
        None::<&str>,
        mount_point,
        None::<&str>,
        MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY | locked_flags(mount_point),
        None::<&str>,
    )
}

/// Mount points strictly below `top` in a `/proc/self/mountinfo` table,
/// parents before children.
#[must_use]
pub fn submounts(mountinfo: &str, top: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = mountinfo
        .lines()
        .filter_map(|line| line.split(' ').nth(4))
        .map(|field| PathBuf::from(unescape_mountinfo(field)))
        .filter(|point| point != top && point.starts_with(top))
        .collect();
    found.sort_by(|a, b| {
        a.components()
            .count()
            .cmp(&b.components().count())
            .then_with(|| a.cmp(b))
    });
    found.dedup();
    found
}

/// Decodes the octal escapes (`\040` for a space, and so on) the kernel
/// uses for whitespace and backslashes in mountinfo paths.
fn unescape_mountinfo(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = std::str::from_utf8(&bytes[i + 1..i + 4]).ok();
            if let Some(value) = digits.and_then(|d| u8::from_str_radix(d, 8).ok()) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Flags already set on the mount that a remount must repeat.
///
/// Inside a user namespace the kernel locks `nosuid`, `nodev`, and
/// `noexec` inherited from a more privileged mount; a remount that drops
/// them fails with `EPERM`.
fn locked_flags(mount_point: &Path) -> MsFlags {
    statvfs(mount_point).map_or(MsFlags::empty(), |stat| remount_flags(stat.flags()))
}

/// Maps `statvfs` flags to the `MsFlags` a remount must carry over.
#[must_use]
pub fn remount_flags(flags: FsFlags) -> MsFlags {
    let mut out = MsFlags::empty();
    if flags.contains(FsFlags::ST_NOSUID) {
        out |= MsFlags::MS_NOSUID;
    }
    if flags.contains(FsFlags::ST_NODEV) {
        out |= MsFlags::MS_NODEV;
    }
    if flags.contains(FsFlags::ST_NOEXEC) {
        out |= MsFlags::MS_NOEXEC;
    }
    out
}

fn syscall_error(op: &'static str, mount_point: &Path, errno: Errno) -> MountError {
    MountError::Syscall {
        kind: MountKind::Bind,
        op,
        target: mount_point.to_path_buf(),
        errno,
    }
}

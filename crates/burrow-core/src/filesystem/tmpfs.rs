//! Anonymous tmpfs mounts.

use std::path::{Path, PathBuf};

use burrow_common::constants::TMPFS_FSTYPE;
use burrow_common::error::MountError;
use burrow_common::types::{MountKind, TmpfsMount};
use nix::mount::{MsFlags, mount};

/// Builds the tmpfs data string. `None` keeps the kernel default size.
#[must_use]
pub fn tmpfs_options(size_bytes: Option<u64>) -> Option<String> {
    size_bytes.map(|bytes| format!("size={bytes}"))
}

/// Mounts a fresh tmpfs at `mount_point`, creating the directory first.
/// Returns the host entries that had to be created.
///
/// # Errors
///
/// Returns an error if the mount point cannot be created or `mount(2)`
/// fails.
pub fn mount_tmpfs(spec: &TmpfsMount, mount_point: &Path) -> Result<Vec<PathBuf>, MountError> {
    let created = super::prepare_dir(mount_point)?;

    let options = tmpfs_options(spec.size_bytes);
    mount(
        Some(TMPFS_FSTYPE),
        mount_point,
        Some(TMPFS_FSTYPE),
        MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
        options.as_deref(),
    )
    .map_err(|errno| {
        super::remove_created(&created);
        MountError::Syscall {
            kind: MountKind::Tmpfs,
            op: "mount",
            target: mount_point.to_path_buf(),
            errno,
        }
    })?;

    tracing::info!(
        mount_point = %mount_point.display(),
        size_bytes = ?spec.size_bytes,
        "tmpfs mounted"
    );
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_option_is_formatted_in_bytes() {
        assert_eq!(
            tmpfs_options(Some(10 * 1024 * 1024)).as_deref(),
            Some("size=10485760")
        );
    }

    #[test]
    fn no_size_means_kernel_default() {
        assert!(tmpfs_options(None).is_none());
    }
}

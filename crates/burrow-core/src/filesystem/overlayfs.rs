//! `OverlayFS` mounts.
//!
//! Stacks read-only lower directories under a writable upper directory.
//! Unprivileged overlay mounts need kernel 5.11 or a vendor patch; any
//! kernel refusal is returned as a permission-class [`MountError`].

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use burrow_common::constants::OVERLAY_FSTYPE;
use burrow_common::error::MountError;
use burrow_common::types::{MountKind, OverlayMount};
use nix::mount::{MsFlags, mount};

/// Builds the overlay data string: colon-joined lower directories followed
/// by the upper and work directories.
#[must_use]
pub fn overlay_options(spec: &OverlayMount) -> String {
    let lowers = spec
        .lower_dirs
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(":");
    format!(
        "lowerdir={},upperdir={},workdir={}",
        lowers,
        spec.upper_dir.display(),
        spec.work_dir.display()
    )
}

/// Checks what the kernel would otherwise reject with a bare `EINVAL`:
/// every directory exists, `upper_dir` and `work_dir` share a filesystem,
/// and neither is nested in the other.
///
/// # Errors
///
/// Returns [`MountError::MissingPath`] or [`MountError::Constraint`].
pub fn validate_overlay(spec: &OverlayMount, mount_point: &Path) -> Result<(), MountError> {
    for dir in spec
        .lower_dirs
        .iter()
        .chain([&spec.upper_dir, &spec.work_dir])
    {
        if !dir.is_dir() {
            return Err(MountError::MissingPath {
                kind: MountKind::Overlay,
                path: dir.clone(),
            });
        }
    }

    let constraint = |reason: String| MountError::Constraint {
        kind: MountKind::Overlay,
        target: mount_point.to_path_buf(),
        reason,
    };

    let device = |dir: &Path| {
        std::fs::metadata(dir)
            .map(|m| m.dev())
            .map_err(|e| MountError::MountPoint {
                path: dir.to_path_buf(),
                source: e,
            })
    };
    if device(spec.upper_dir.as_path())? != device(spec.work_dir.as_path())? {
        return Err(constraint(format!(
            "upper {} and work {} are on different filesystems",
            spec.upper_dir.display(),
            spec.work_dir.display()
        )));
    }

    if spec.work_dir.starts_with(&spec.upper_dir) || spec.upper_dir.starts_with(&spec.work_dir) {
        return Err(constraint(format!(
            "upper {} and work {} must not be nested",
            spec.upper_dir.display(),
            spec.work_dir.display()
        )));
    }
    Ok(())
}

/// Mounts an overlay at `mount_point`, creating the directory first.
/// Returns the host entries that had to be created.
///
/// # Errors
///
/// Returns an error if validation fails, the mount point cannot be
/// created, or `mount(2)` fails.
pub fn mount_overlay(spec: &OverlayMount, mount_point: &Path) -> Result<Vec<PathBuf>, MountError> {
    validate_overlay(spec, mount_point)?;
    let created = super::prepare_dir(mount_point)?;

    let options = overlay_options(spec);
    mount(
        Some(OVERLAY_FSTYPE),
        mount_point,
        Some(OVERLAY_FSTYPE),
        MsFlags::empty(),
        Some(options.as_str()),
    )
    .map_err(|errno| {
        super::remove_created(&created);
        MountError::Syscall {
            kind: MountKind::Overlay,
            op: "mount",
            target: mount_point.to_path_buf(),
            errno,
        }
    })?;

    tracing::info!(mount_point = %mount_point.display(), "overlayfs mounted");
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_common::error::MountErrorKind;

    fn spec(base: &Path, lowers: &[&str]) -> OverlayMount {
        OverlayMount {
            lower_dirs: lowers.iter().map(|l| base.join(l)).collect(),
            upper_dir: base.join("upper"),
            work_dir: base.join("work"),
            target: "/merged".into(),
        }
    }

    #[test]
    fn options_join_lowers_with_colons() {
        let spec = OverlayMount {
            lower_dirs: vec![PathBuf::from("/l1"), PathBuf::from("/l2")],
            upper_dir: "/u".into(),
            work_dir: "/w".into(),
            target: "/m".into(),
        };
        assert_eq!(
            overlay_options(&spec),
            "lowerdir=/l1:/l2,upperdir=/u,workdir=/w"
        );
    }

    #[test]
    fn missing_lower_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("upper")).unwrap();
        std::fs::create_dir(dir.path().join("work")).unwrap();
        let spec = spec(dir.path(), &["lower"]);

        let err = validate_overlay(&spec, Path::new("/merged")).unwrap_err();
        assert_eq!(err.kind(), MountErrorKind::NotFound);
    }

    #[test]
    fn nested_work_dir_violates_constraint() {
        let dir = tempfile::tempdir().unwrap();
        for d in ["lower", "upper", "upper/work"] {
            std::fs::create_dir(dir.path().join(d)).unwrap();
        }
        let mut spec = spec(dir.path(), &["lower"]);
        spec.work_dir = dir.path().join("upper/work");

        let err = validate_overlay(&spec, Path::new("/merged")).unwrap_err();
        assert_eq!(err.kind(), MountErrorKind::ConstraintViolated);
    }

    #[test]
    fn sibling_dirs_on_one_filesystem_pass() {
        let dir = tempfile::tempdir().unwrap();
        for d in ["l1", "l2", "upper", "work"] {
            std::fs::create_dir(dir.path().join(d)).unwrap();
        }
        let spec = spec(dir.path(), &["l1", "l2"]);
        assert!(validate_overlay(&spec, Path::new("/merged")).is_ok());
    }
}

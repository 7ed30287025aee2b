//! Ordered application of a mount list.
//!
//! The kernel has no multi-mount transaction, so the planner keeps an
//! explicit undo stack: each successful mount pushes a record, and the
//! first failure pops and unmounts them last-in first-out before the
//! original error is returned.

use std::path::{Path, PathBuf};

use burrow_common::error::{MountError, RollbackFailure, SetupError};
use burrow_common::types::MountSpec;

use super::AppliedMountRecord;

/// Applies [`MountSpec`]s strictly in list order and undoes them on failure.
#[derive(Debug, Default)]
pub struct MountPlanner {
    root: Option<PathBuf>,
    applied: Vec<AppliedMountRecord>,
}

impl MountPlanner {
    /// Creates a planner. With a `root`, every target is mounted under it.
    #[must_use]
    pub fn new(root: Option<&Path>) -> Self {
        Self {
            root: root.map(Path::to_path_buf),
            applied: Vec::new(),
        }
    }

    /// Applies every spec with its driver.
    ///
    /// Targets nested under an earlier target are created only when their
    /// turn comes, which is after the earlier mount is live.
    ///
    /// # Errors
    ///
    /// Returns [`SetupError::Mount`] for the first failing spec, after all
    /// previously applied mounts were unmounted in reverse order. Rollback
    /// failures are attached to the error, never substituted for it.
    pub fn apply_all(self, list: &[MountSpec]) -> Result<Vec<AppliedMountRecord>, SetupError> {
        self.apply_with(list, super::apply, super::unmount)
    }

    fn apply_with<A, U>(
        mut self,
        list: &[MountSpec],
        mut apply: A,
        mut undo: U,
    ) -> Result<Vec<AppliedMountRecord>, SetupError>
    where
        A: FnMut(usize, &MountSpec, Option<&Path>) -> Result<AppliedMountRecord, MountError>,
        U: FnMut(&AppliedMountRecord) -> Result<(), RollbackFailure>,
    {
        for (index, spec) in list.iter().enumerate() {
            tracing::debug!(index, kind = %spec.kind(), target = %spec.target().display(), "applying mount");
            match apply(index, spec, self.root.as_deref()) {
                Ok(record) => self.applied.push(record),
                Err(source) => {
                    tracing::error!(index, error = %source, "mount failed, rolling back");
                    let rollback_failures = self.rollback(&mut undo);
                    return Err(SetupError::Mount {
                        index,
                        target: spec.target().to_path_buf(),
                        source,
                        rollback_failures,
                    });
                }
            }
        }
        tracing::info!(count = self.applied.len(), "mount list applied");
        Ok(self.applied)
    }

    fn rollback<U>(&mut self, undo: &mut U) -> Vec<RollbackFailure>
    where
        U: FnMut(&AppliedMountRecord) -> Result<(), RollbackFailure>,
    {
        let mut failures = Vec::new();
        while let Some(record) = self.applied.pop() {
            if let Err(failure) = undo(&record) {
                tracing::warn!(%failure, "rollback unmount failed");
                failures.push(failure);
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_common::types::{MountKind, TmpfsMount};
    use nix::errno::Errno;

    fn tmpfs(target: &str) -> MountSpec {
        MountSpec::Tmpfs(TmpfsMount {
            target: target.into(),
            size_bytes: None,
        })
    }

    fn record(index: usize, spec: &MountSpec, root: Option<&Path>) -> AppliedMountRecord {
        AppliedMountRecord {
            index,
            kind: spec.kind(),
            target: spec.target().to_path_buf(),
            mount_point: spec.mount_point(root),
            created: Vec::new(),
        }
    }

    fn failure(index: usize) -> MountError {
        MountError::Syscall {
            kind: MountKind::Tmpfs,
            op: "mount",
            target: format!("/m{index}").into(),
            errno: Errno::EPERM,
        }
    }

    #[test]
    fn applies_in_order_and_returns_every_record() {
        let list = [tmpfs("/a"), tmpfs("/a/b"), tmpfs("/c")];
        let mut seen = Vec::new();
        let records = MountPlanner::new(None)
            .apply_with(
                &list,
                |i, s, r| {
                    seen.push(i);
                    Ok(record(i, s, r))
                },
                |_| panic!("no rollback expected"),
            )
            .unwrap();

        assert_eq!(seen, vec![0, 1, 2]);
        let targets: Vec<_> = records.iter().map(|r| r.target.clone()).collect();
        assert_eq!(
            targets,
            vec![PathBuf::from("/a"), PathBuf::from("/a/b"), PathBuf::from("/c")]
        );
    }

    #[test]
    fn failure_unmounts_earlier_mounts_in_reverse() {
        let list = [tmpfs("/tmp"), tmpfs("/tmp/inner"), tmpfs("/mnt"), tmpfs("/never")];
        let mut undone = Vec::new();
        let err = MountPlanner::new(None)
            .apply_with(
                &list,
                |i, s, r| if i == 2 { Err(failure(i)) } else { Ok(record(i, s, r)) },
                |rec| {
                    undone.push(rec.index);
                    Ok(())
                },
            )
            .unwrap_err();

        assert_eq!(undone, vec![1, 0]);
        match err {
            SetupError::Mount {
                index,
                target,
                source,
                rollback_failures,
            } => {
                assert_eq!(index, 2);
                assert_eq!(target, PathBuf::from("/mnt"));
                assert_eq!(source.errno(), Some(Errno::EPERM));
                assert!(rollback_failures.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rollback_errors_are_attached_not_substituted() {
        let list = [tmpfs("/a"), tmpfs("/b"), tmpfs("/c")];
        let err = MountPlanner::new(None)
            .apply_with(
                &list,
                |i, s, r| if i == 2 { Err(failure(i)) } else { Ok(record(i, s, r)) },
                |rec| {
                    if rec.index == 1 {
                        Err(RollbackFailure {
                            mount_point: rec.mount_point.clone(),
                            kind: rec.kind,
                            errno: Errno::EBUSY,
                        })
                    } else {
                        Ok(())
                    }
                },
            )
            .unwrap_err();

        let SetupError::Mount {
            index,
            source,
            rollback_failures,
            ..
        } = err
        else {
            panic!("expected mount error");
        };
        assert_eq!(index, 2);
        assert_eq!(source.errno(), Some(Errno::EPERM));
        assert_eq!(rollback_failures.len(), 1);
        assert_eq!(rollback_failures[0].mount_point, PathBuf::from("/b"));
    }

    #[test]
    fn first_mount_failure_has_nothing_to_roll_back() {
        let list = [tmpfs("/a"), tmpfs("/b")];
        let mut undo_calls = 0;
        let err = MountPlanner::new(None)
            .apply_with(
                &list,
                |i, _, _| Err(failure(i)),
                |_| {
                    undo_calls += 1;
                    Ok(())
                },
            )
            .unwrap_err();
        assert_eq!(undo_calls, 0);
        assert!(matches!(err, SetupError::Mount { index: 0, .. }));
    }

    #[test]
    fn targets_resolve_under_new_root() {
        let list = [tmpfs("/tmp")];
        let records = MountPlanner::new(Some(Path::new("/srv/rootfs")))
            .apply_with(&list, |i, s, r| Ok(record(i, s, r)), |_| Ok(()))
            .unwrap();
        assert_eq!(records[0].mount_point, PathBuf::from("/srv/rootfs/tmp"));
        assert_eq!(records[0].target, PathBuf::from("/tmp"));
    }

    #[test]
    fn empty_list_applies_nothing() {
        let records = MountPlanner::new(None).apply_all(&[]).unwrap();
        assert!(records.is_empty());
    }
}

//! Root filesystem replacement via `pivot_root(2)`.
//!
//! More thorough than `chroot` because it actually changes the root mount
//! and detaches the old one, leaving nothing of the host tree reachable.
//! Must only run inside a private mount namespace.

use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use burrow_common::constants::PIVOT_OLD_DIR;
use burrow_common::error::{PivotError, PivotStep};
use burrow_common::types::PivotState;
use nix::mount::{MntFlags, MsFlags, mount, umount2};
use nix::unistd::{chdir, pivot_root};

/// Drives the pivot through `NotStarted → SelfBindMounted → Pivoted →
/// OldRootDetached`.
#[derive(Debug)]
pub struct RootPivoter {
    new_root: PathBuf,
    state: PivotState,
}

impl RootPivoter {
    /// Creates a pivoter for `new_root`. Nothing happens until [`Self::pivot`].
    #[must_use]
    pub fn new(new_root: impl Into<PathBuf>) -> Self {
        Self {
            new_root: new_root.into(),
            state: PivotState::NotStarted,
        }
    }

    /// The last state reached.
    #[must_use]
    pub const fn state(&self) -> PivotState {
        self.state
    }

    /// Runs the remaining transitions.
    ///
    /// On failure the process is left in a consistent but partially pivoted
    /// private namespace; the caller is expected to exit without exec.
    ///
    /// # Errors
    ///
    /// Returns a [`PivotError`] naming the failed step and the state reached.
    pub fn pivot(&mut self) -> Result<(), PivotError> {
        loop {
            match self.state {
                PivotState::NotStarted => self.self_bind()?,
                PivotState::SelfBindMounted => self.swap_root()?,
                PivotState::Pivoted => self.detach_old_root()?,
                PivotState::OldRootDetached => {
                    tracing::info!(new_root = %self.new_root.display(), "root pivoted");
                    return Ok(());
                }
            }
            tracing::debug!(state = %self.state, "pivot transition");
        }
    }

    /// `pivot_root(2)` requires the new root to be a mount point. The bind
    /// is recursive so mounts already placed under the new root survive.
    fn self_bind(&mut self) -> Result<(), PivotError> {
        let metadata = std::fs::metadata(&self.new_root)
            .map_err(|e| self.fail(PivotStep::Inspect, &self.new_root, e))?;
        if !metadata.is_dir() {
            return Err(self.fail(
                PivotStep::Inspect,
                &self.new_root,
                io::Error::from_raw_os_error(libc::ENOTDIR),
            ));
        }

        mount(
            Some(&self.new_root),
            &self.new_root,
            None::<&str>,
            MsFlags::MS_BIND | MsFlags::MS_REC,
            None::<&str>,
        )
        .map_err(|errno| self.fail(PivotStep::SelfBind, &self.new_root, errno.into()))?;

        self.state = PivotState::SelfBindMounted;
        Ok(())
    }

    fn swap_root(&mut self) -> Result<(), PivotError> {
        chdir(&self.new_root)
            .map_err(|errno| self.fail(PivotStep::ChangeDir, &self.new_root, errno.into()))?;

        let put_old = self.new_root.join(PIVOT_OLD_DIR);
        match std::fs::DirBuilder::new().mode(0o700).create(&put_old) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(self.fail(PivotStep::CreatePutOld, &put_old, e)),
        }

        pivot_root(".", PIVOT_OLD_DIR)
            .map_err(|errno| self.fail(PivotStep::PivotRoot, &self.new_root, errno.into()))?;

        self.state = PivotState::Pivoted;
        Ok(())
    }

    /// Processes may still reference the old root, so it is detached lazily.
    fn detach_old_root(&mut self) -> Result<(), PivotError> {
        let root = Path::new("/");
        chdir(root).map_err(|errno| self.fail(PivotStep::ChangeDir, root, errno.into()))?;

        let put_old = root.join(PIVOT_OLD_DIR);
        umount2(&put_old, MntFlags::MNT_DETACH)
            .map_err(|errno| self.fail(PivotStep::DetachOldRoot, &put_old, errno.into()))?;
        std::fs::remove_dir(&put_old).map_err(|e| self.fail(PivotStep::RemovePutOld, &put_old, e))?;

        self.state = PivotState::OldRootDetached;
        Ok(())
    }

    fn fail(&self, step: PivotStep, path: &Path, source: io::Error) -> PivotError {
        tracing::error!(state = %self.state, %step, path = %path.display(), error = %source, "pivot failed");
        PivotError {
            state: self.state,
            step,
            path: path.to_path_buf(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_not_started() {
        assert_eq!(RootPivoter::new("/srv/rootfs").state(), PivotState::NotStarted);
    }

    #[test]
    fn missing_root_fails_before_any_mount() {
        let dir = tempfile::tempdir().unwrap();
        let mut pivoter = RootPivoter::new(dir.path().join("absent"));
        let err = pivoter.pivot().unwrap_err();
        assert_eq!(err.step, PivotStep::Inspect);
        assert_eq!(err.state, PivotState::NotStarted);
        assert_eq!(err.source.raw_os_error(), Some(libc::ENOENT));
        assert_eq!(pivoter.state(), PivotState::NotStarted);
    }

    #[test]
    fn file_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("rootfs.img");
        std::fs::write(&file, b"").unwrap();
        let err = RootPivoter::new(&file).pivot().unwrap_err();
        assert_eq!(err.step, PivotStep::Inspect);
        assert_eq!(err.source.raw_os_error(), Some(libc::ENOTDIR));
    }
}

//! Mount namespace isolation.
//!
//! A fresh mount namespace starts as a copy of the parent's mount table,
//! including its propagation settings. Remounting `/` recursively private
//! stops every later mount and unmount from reaching the host's peer
//! groups, and is a precondition of `pivot_root(2)`.

use burrow_common::error::NamespaceError;
use nix::mount::{MsFlags, mount};

/// Marks every mount in the calling namespace `MS_PRIVATE`.
///
/// # Errors
///
/// Returns [`NamespaceError::Propagation`] if the remount fails.
pub fn make_mounts_private() -> Result<(), NamespaceError> {
    mount(
        None::<&str>,
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|errno| NamespaceError::Propagation { errno })?;
    tracing::debug!("mounted `/` with MS_REC | MS_PRIVATE");
    Ok(())
}

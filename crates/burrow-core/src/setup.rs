//! Container setup entry point.
//!
//! Called in the child between `fork(2)` and `exec(2)`. The order is fixed:
//! namespaces, identity maps, mount propagation, hostname, mounts, pivot.

use burrow_common::error::SetupError;
use burrow_common::types::ContainerSpec;

/// Builds the child's private view described by `spec`.
///
/// Returning `Ok(())` is the only signal that exec may proceed. The spec is
/// taken by value: it belongs to this child alone.
///
/// # Errors
///
/// Returns the first failing stage's error. Mounts applied before a mount
/// failure are unmounted first; everything else is discarded with the
/// namespaces when the child exits.
#[cfg(target_os = "linux")]
pub fn setup_container(spec: ContainerSpec) -> Result<(), SetupError> {
    use crate::filesystem::pivot_root::RootPivoter;
    use crate::filesystem::planner::MountPlanner;
    use crate::namespace;

    spec.validate()?;
    if spec.is_empty() {
        tracing::debug!("empty container spec, nothing to set up");
        return Ok(());
    }

    let ns = spec.effective_namespace();
    // Read before unshare: an unmapped user namespace reports the overflow IDs.
    let host_uid = nix::unistd::getuid();
    let host_gid = nix::unistd::getgid();

    namespace::configure(&ns)?;
    if ns.user {
        namespace::user::map_identities(host_uid, host_gid)?;
    }
    if ns.mount {
        namespace::mount::make_mounts_private()?;
    }
    if let Some(hostname) = ns.hostname.as_deref() {
        namespace::set_hostname(hostname)?;
    }

    let records = MountPlanner::new(spec.root.as_deref()).apply_all(&spec.mounts)?;
    tracing::debug!(mounts = records.len(), "mounts live");

    if let Some(root) = spec.root {
        RootPivoter::new(root).pivot()?;
    }

    tracing::info!(namespaces = ?ns.enabled(), "container setup complete");
    Ok(())
}

/// Stub for non-Linux platforms.
///
/// # Errors
///
/// Returns [`SetupError::Unsupported`] for any non-empty spec, before any
/// other work.
#[cfg(not(target_os = "linux"))]
pub fn setup_container(spec: ContainerSpec) -> Result<(), SetupError> {
    if spec.is_empty() {
        return Ok(());
    }
    Err(SetupError::Unsupported {
        platform: std::env::consts::OS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_common::types::{MountSpec, SetupStage, TmpfsMount};

    #[test]
    fn empty_spec_is_a_no_op() {
        assert!(setup_container(ContainerSpec::default()).is_ok());
    }

    #[test]
    fn invalid_spec_fails_before_any_syscall() {
        let spec = ContainerSpec {
            mounts: vec![MountSpec::Tmpfs(TmpfsMount {
                target: "relative/tmp".into(),
                size_bytes: None,
            })],
            ..ContainerSpec::default()
        };
        let err = setup_container(spec).unwrap_err();
        #[cfg(target_os = "linux")]
        assert_eq!(err.stage(), SetupStage::Validate);
        #[cfg(not(target_os = "linux"))]
        assert_eq!(err.stage(), SetupStage::Platform);
    }
}

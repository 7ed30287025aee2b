//! Linux namespace management for container setup.
//!
//! Provides the single `unshare(2)` that moves the child into its new
//! namespaces, plus the follow-up steps that only make sense inside them:
//! UID/GID mapping, private mount propagation, and the UTS hostname.

pub mod mount;
pub mod user;

use burrow_common::error::NamespaceError;
use burrow_common::types::NamespaceSpec;
use nix::sched::{CloneFlags, unshare};

/// Translates a namespace set into `CLONE_NEW*` flags.
#[must_use]
pub fn clone_flags(spec: &NamespaceSpec) -> CloneFlags {
    let mut flags = CloneFlags::empty();
    if spec.user {
        flags |= CloneFlags::CLONE_NEWUSER;
    }
    if spec.pid {
        flags |= CloneFlags::CLONE_NEWPID;
    }
    if spec.mount {
        flags |= CloneFlags::CLONE_NEWNS;
    }
    if spec.net {
        flags |= CloneFlags::CLONE_NEWNET;
    }
    if spec.ipc {
        flags |= CloneFlags::CLONE_NEWIPC;
    }
    if spec.uts {
        flags |= CloneFlags::CLONE_NEWUTS;
    }
    if spec.cgroup {
        flags |= CloneFlags::CLONE_NEWCGROUP;
    }
    flags
}

/// Unshares every requested namespace in one call.
///
/// The kernel creates the user namespace first when `CLONE_NEWUSER` is
/// combined with other flags, so the remaining namespaces are owned by it.
/// A new PID namespace applies to children of the caller, not the caller.
///
/// # Errors
///
/// Returns [`NamespaceError::Unshare`] if the kernel rejects the call.
pub fn configure(spec: &NamespaceSpec) -> Result<(), NamespaceError> {
    let flags = clone_flags(spec);
    if flags.is_empty() {
        tracing::debug!("no namespaces requested");
        return Ok(());
    }

    let namespaces = spec.enabled().join(",");
    unshare(flags).map_err(|errno| {
        tracing::error!(namespaces = %namespaces, error = %errno, "unshare failed");
        NamespaceError::Unshare {
            namespaces: namespaces.clone(),
            errno,
        }
    })?;

    if spec.pid {
        tracing::debug!("PID namespace will apply to child processes");
    }
    tracing::info!(namespaces = %namespaces, "namespaces created");
    Ok(())
}

/// Sets the hostname inside the new UTS namespace.
///
/// # Errors
///
/// Returns [`NamespaceError::Hostname`] if `sethostname(2)` fails.
pub fn set_hostname(hostname: &str) -> Result<(), NamespaceError> {
    nix::unistd::sethostname(hostname).map_err(|errno| NamespaceError::Hostname {
        hostname: hostname.to_owned(),
        errno,
    })?;
    tracing::debug!(hostname, "hostname set");
    Ok(())
}

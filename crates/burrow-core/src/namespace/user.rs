//! User namespace identity mapping.
//!
//! Maps UID/GID 0 inside the namespace to the caller's real IDs on the
//! host, which is what lets an unprivileged caller perform tmpfs and bind
//! mounts inside its own mount namespace.

use std::path::Path;

use burrow_common::constants::PROC_SELF;
use burrow_common::error::IdentityMappingError;
use nix::unistd::{Gid, Uid};

/// Formats a single-entry `uid_map`/`gid_map` line.
#[must_use]
pub fn id_map_line(inside: u32, outside: u32) -> String {
    format!("{inside} {outside} 1\n")
}

/// Writes the identity maps for the calling process.
///
/// `host_uid` and `host_gid` must be captured before `unshare(2)`; inside a
/// fresh user namespace with no map the caller reads back as the overflow
/// ID. The `setgroups` guard is written before `gid_map`, as the kernel
/// requires for unprivileged writers.
///
/// # Errors
///
/// Returns an error if any procfs write is rejected, for example when the
/// maps were already written or the caller lacks `CAP_SETUID`/`CAP_SETGID`
/// over the parent namespace.
pub fn map_identities(host_uid: Uid, host_gid: Gid) -> Result<(), IdentityMappingError> {
    let proc_self = Path::new(PROC_SELF);

    write_proc(&proc_self.join("setgroups"), "deny\n")?;
    write_proc(
        &proc_self.join("uid_map"),
        &id_map_line(0, host_uid.as_raw()),
    )?;
    write_proc(
        &proc_self.join("gid_map"),
        &id_map_line(0, host_gid.as_raw()),
    )?;

    tracing::debug!(
        host_uid = host_uid.as_raw(),
        host_gid = host_gid.as_raw(),
        "wrote UID/GID map"
    );
    Ok(())
}

fn write_proc(path: &Path, contents: &str) -> Result<(), IdentityMappingError> {
    std::fs::write(path, contents).map_err(|e| IdentityMappingError {
        path: path.to_path_buf(),
        source: e,
    })
}

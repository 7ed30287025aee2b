//! System-wide constants and well-known paths.

/// Name of the transient directory that receives the old root during `pivot_root(2)`.
pub const PIVOT_OLD_DIR: &str = ".pivot_old";

/// Procfs entry for the calling process.
pub const PROC_SELF: &str = "/proc/self";

/// Filesystem type passed to `mount(2)` for tmpfs mounts.
pub const TMPFS_FSTYPE: &str = "tmpfs";

/// Filesystem type passed to `mount(2)` for overlay mounts.
pub const OVERLAY_FSTYPE: &str = "overlay";

/// Exit code used by a child whose container setup failed.
pub const SETUP_FAILED_EXIT_CODE: i32 = 125;

/// Exit code used by a child whose `execvp(3)` failed.
pub const EXEC_FAILED_EXIT_CODE: i32 = 127;

/// Application name used in CLI output.
pub const APP_NAME: &str = "burrow";

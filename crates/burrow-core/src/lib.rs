//! # burrow-core
//!
//! Builds a child process's private view of the system between `fork(2)`
//! and `exec(2)`:
//! - **Namespaces**: one `unshare(2)` for the requested set, followed by
//!   UID/GID mapping for user namespaces and private mount propagation.
//! - **Filesystem**: tmpfs, bind, and overlay drivers applied in order by
//!   the mount planner with reverse-order rollback, then an optional
//!   `pivot_root(2)`.
//! - **Reporting**: a close-on-exec control pipe that tells the parent
//!   whether setup succeeded before the target program runs.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! `// SAFETY:` documentation.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

#[cfg(target_os = "linux")]
pub mod filesystem;
#[cfg(target_os = "linux")]
pub mod namespace;
#[cfg(target_os = "linux")]
pub mod process;
#[cfg(target_os = "linux")]
pub mod report;
pub mod setup;

pub use setup::setup_container;

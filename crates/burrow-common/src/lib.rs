//! # burrow-common
//!
//! Shared types, error definitions, spec-file loading, and constants
//! used across the Burrow workspace.
//!
//! This crate is the leaf of the dependency graph. It describes what a
//! container setup should do; it never performs a syscall itself.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # watcher-platform
//!
//! The hosting platform as seen by the repository watcher.
//!
//! [`PlatformClient`] is the seam the reconciler talks through. Two
//! implementations ship with the crate:
//!
//! - [`GiteeClient`]: Gitee v5 REST API over `reqwest`
//! - [`InMemoryPlatform`]: a process-local platform that records every call,
//!   used by tests and `--dry-run`
//!
//! Every write operation is expected to be safe to repeat: the reconciler
//! re-issues a correction on every cycle until it sticks.

pub mod client;
pub mod config;
pub mod error;
pub mod memory;
pub mod types;

pub use client::{GiteeClient, PlatformClient};
pub use config::GiteeConfig;
pub use error::{Error, Result};
pub use memory::InMemoryPlatform;
pub use types::{Branch, CreateRepoParams, RepoInfo, RepoPatch, ReviewerSettings};

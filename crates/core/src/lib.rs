#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # watcher-core
//!
//! Shared building blocks for the repository watcher:
//!
//! - [`WatcherConfig`]: the YAML configuration and its validation rules
//! - [`ProjectTemplate`]: the compiled descriptor template used when a new
//!   repository is registered in the OBS meta repository
//! - [`Error`]/[`Result`]: configuration-time errors

pub mod config;
pub mod error;
pub mod result;
pub mod template;

pub use config::{
    LoadedConfig, ObsMetaProject, Permission, PlatformSettings, RepoBranch, ReviewerConfig,
    WatcherConfig, WatchingFiles,
};
pub use error::Error;
pub use result::{Result, ResultExt};
pub use template::ProjectTemplate;

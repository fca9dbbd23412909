//! Level-triggered reconciliation of governed repositories.
//!
//! This crate keeps repositories on the hosting platform in line with the
//! governance files of a community:
//!
//! - **Desired State**: rebuilt from governance files every cycle
//!   ([`governance`])
//! - **Observed State**: what the watcher last saw or made true, one
//!   [`ResourceActor`] per repository, held in a [`Registry`]
//! - **Diff**: [`Reconciler`] compares the two for one repository
//! - **Actions**: platform calls that close the gap, recorded in a
//!   [`ReconcileResult`]
//!
//! # Key Concepts
//!
//! ## Cycles
//!
//! [`ReconciliationLoop`] repeatedly:
//! 1. Builds the desired set
//! 2. Sweeps actors of repositories that left it
//! 3. Queues one convergence task per repository on the [`WorkerPool`]
//!
//! Every cycle is a full re-diff, so a failed call is simply retried on the
//! next pass.
//!
//! ## Actions
//!
//! - `CreateRepo` - Create a missing repository (alone, in its own pass)
//! - `CreateBranch` / `ProtectBranch` / `UnprotectBranch` - Branch layout
//! - `AddMember` / `RemoveMember` - Owners from the sig OWNERS files
//! - `UpdateProperty` - Description, visibility and comment settings
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use watcher_platform::InMemoryPlatform;
//! use watcher_reconciler::{
//!     FsGovernanceSource, GovernanceBuilder, LoopConfig, ReconcilerBuilder,
//!     ReconciliationLoop, Registry, WorkerPool,
//! };
//!
//! #[tokio::main]
//! async fn main() -> watcher_reconciler::Result<()> {
//!     let platform = Arc::new(InMemoryPlatform::new());
//!     let reconciler = Arc::new(ReconcilerBuilder::new().with_client(platform.clone()).build()?);
//!     let source = Arc::new(FsGovernanceSource::new("./community"));
//!     let builder = Arc::new(GovernanceBuilder::new(source, &config.watching_files));
//!     let registry = Arc::new(Registry::load_from_platform(platform.as_ref(), "openeuler").await?);
//!
//!     let loop_runner = ReconciliationLoop::new(
//!         reconciler,
//!         builder,
//!         registry,
//!         WorkerPool::new(4, 1024)?,
//!         LoopConfig::default(),
//!     );
//!     loop_runner.run().await
//! }
//! ```

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod actor;
pub mod descriptor;
pub mod error;
pub mod governance;
pub mod r#loop;
pub mod pool;
pub mod reconciler;
pub mod registry;
pub mod types;

// Re-export main types
pub use actor::ResourceActor;
pub use descriptor::DescriptorPublisher;
pub use error::{Error, Result};
pub use governance::{FsGovernanceSource, GovernanceBuilder, GovernanceSource, PlatformGovernanceSource};
pub use r#loop::{
    CycleStats, DesiredStateProvider, InMemoryDesiredStateProvider, LoopConfig, LoopStopper,
    ReconciliationLoop,
};
pub use pool::{Job, WorkerPool};
pub use reconciler::{Reconciler, ReconcilerBuilder, ReconcilerConfig};
pub use registry::Registry;
pub use types::{
    DesiredBranch, DesiredRepository, DesiredState, ObservedState, Protection, ReconcileAction,
    ReconcileResult, RepoProperty,
};

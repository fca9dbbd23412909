#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # repo-watcher
//!
//! Keeps repositories on the hosting platform in line with community
//! governance files.
//!
//! The reconciliation engine lives in `watcher-reconciler`; this crate holds
//! the command line and the webhook ingress.

pub mod cli;
pub mod ingress;

//! buildtree - Included build registry and execution controller
//!
//! This library coordinates a build tree: a root build plus the builds
//! included into it, directly or through dependencies. It registers each
//! build once, discovers the work of every build before any of them runs,
//! and tears the tree down again.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`core`] - Registry, controllers and tree lifecycle
//! - [`infra`] - Infrastructure layer (filesystem, worker threads)
//! - [`config`] - Configuration constants
//! - [`error`] - Error types and handling

pub mod config;
pub mod core;
pub mod error;
pub mod infra;

pub use crate::core::controllers::BuildControllers;
pub use crate::core::registry::BuildRegistry;
pub use crate::core::tree::BuildTree;

#[cfg(test)]
pub mod test_utils;

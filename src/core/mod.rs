//! Core build tree logic
//!
//! Registration of included builds and coordination of their execution.
//! Thread and filesystem access live in [`crate::infra`].
//!
//! # Submodules
//!
//! - [`identity`] - Build identifiers, definitions and project paths
//! - [`settings`] - Root build settings
//! - [`build_state`] - Included build participants and their factory
//! - [`project_paths`] - Tree-wide project namespace
//! - [`substitution`] - Dependency substitution rules
//! - [`stoppable`] - Aggregate teardown
//! - [`registry`] - Included build registry
//! - [`controller`] - Per-build execution controller
//! - [`controllers`] - Controller orchestration
//! - [`tree`] - Build tree lifecycle
//! - [`tree_config`] - Build tree configuration

pub mod build_state;
pub mod controller;
pub mod controllers;
pub mod identity;
pub mod project_paths;
pub mod registry;
pub mod settings;
pub mod stoppable;
pub mod substitution;
pub mod tree;
pub mod tree_config;

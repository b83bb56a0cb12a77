//! Configuration constants
//!
//! - [`defaults`] - Default values for the build tree configuration

pub mod defaults;

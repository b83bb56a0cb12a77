//! Infrastructure layer
//!
//! Handles filesystem access and worker threads.

pub mod filesystem;
pub mod worker_pool;

//! Default configuration values

/// Name of the worker pool running one thread per included build
pub const WORKER_POOL_NAME: &str = "included builds";

/// Whether build root directories are canonicalized before deduplication
pub const CANONICALIZE_ROOTS: bool = true;

/// Environment variable pointing at a build tree configuration file
pub const ENV_CONFIG_PATH: &str = "BUILDTREE_CONFIG";

/// Identifier name reserved for the root build
pub const ROOT_BUILD_NAME: &str = ":";

/// Minimum proptest iterations
pub const MIN_PROPTEST_ITERATIONS: u32 = 100;

//! Filesystem operations
//!
//! Resolves build root directories to the key the registry deduplicates on.

use std::path::{Component, Path, PathBuf};

/// Resolve a build root directory to its canonical form
///
/// Existing directories are resolved through the filesystem, which follows
/// symlinks. Directories that do not exist (yet) are normalized lexically
/// against the current directory instead.
pub fn canonical_root(path: &Path) -> PathBuf {
    match std::fs::canonicalize(path) {
        Ok(canonical) => canonical,
        Err(e) => {
            tracing::debug!(
                "Cannot canonicalize '{}' ({e}), normalizing lexically",
                path.display()
            );
            normalize(path)
        }
    }
}

/// Lexically normalize a path, resolving `.` and `..` components
pub fn normalize(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

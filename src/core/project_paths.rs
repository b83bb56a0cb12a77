//! Project path namespace
//!
//! Every project of every build in the tree gets an identity path that is
//! unique across the tree. The namespace is used for cross-build addressing.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

use crate::core::build_state::BuildState;
use crate::core::identity::{BuildIdentifier, ProjectPath};
use crate::error::ProjectPathError;

/// Registers a build's projects into the tree-wide namespace
pub trait ProjectPathRegistry: Send + Sync {
    /// Register every project of `build` under its identity path
    fn register_projects(&self, build: &dyn BuildState) -> Result<(), ProjectPathError>;
}

/// A project known to the namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectEntry {
    /// Owning build
    pub build: BuildIdentifier,
    /// Path relative to the owning build
    pub project_path: ProjectPath,
    /// Whether the owning build is implicit
    pub implicit: bool,
}

/// In-memory project namespace
#[derive(Debug, Default)]
pub struct DefaultProjectPathRegistry {
    projects: RwLock<BTreeMap<ProjectPath, ProjectEntry>>,
}

impl DefaultProjectPathRegistry {
    /// Create an empty namespace
    pub fn new() -> Self {
        Self::default()
    }

    /// Project registered under an identity path
    pub fn find(&self, identity_path: &ProjectPath) -> Option<ProjectEntry> {
        self.projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity_path)
            .cloned()
    }

    /// All identity paths, sorted
    pub fn identity_paths(&self) -> Vec<ProjectPath> {
        self.projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Identity paths owned by `build`
    pub fn projects_of(&self, build: &BuildIdentifier) -> Vec<ProjectPath> {
        self.projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, entry)| &entry.build == build)
            .map(|(path, _)| path.clone())
            .collect()
    }
}

impl ProjectPathRegistry for DefaultProjectPathRegistry {
    fn register_projects(&self, build: &dyn BuildState) -> Result<(), ProjectPathError> {
        let identifier = build.build_identifier();
        let implicit = build.is_implicit_build();
        let mut projects = self
            .projects
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        // Check everything first so a rejected build leaves no partial entries.
        let mut pending = Vec::new();
        for project_path in build.projects() {
            let identity_path = build.identity_path_for_project(&project_path);
            match projects.get(&identity_path) {
                Some(existing) if existing.build == identifier => {}
                Some(existing) => {
                    return Err(ProjectPathError::Duplicate {
                        path: identity_path.to_string(),
                        existing: existing.build.to_string(),
                        build: identifier.to_string(),
                    });
                }
                None => pending.push((identity_path, project_path)),
            }
        }

        debug!(
            "Registering {} projects of build '{identifier}'",
            pending.len()
        );
        for (identity_path, project_path) in pending {
            projects.insert(
                identity_path,
                ProjectEntry {
                    build: identifier.clone(),
                    project_path,
                    implicit,
                },
            );
        }
        Ok(())
    }
}

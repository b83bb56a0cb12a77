//! Root build settings model
//!
//! The registry reads the root project name and subproject paths for
//! collision checks and publishes the visible included builds here.

use std::collections::BTreeSet;

use crate::core::identity::{IncludedBuildModel, ProjectPath};

/// Settings of the root build
#[derive(Debug, Clone, Default)]
pub struct RootSettings {
    root_project_name: String,
    projects: BTreeSet<ProjectPath>,
    included_builds: Vec<IncludedBuildModel>,
}

impl RootSettings {
    /// Create settings for a root project with the given name
    pub fn new(root_project_name: impl Into<String>) -> Self {
        let mut projects = BTreeSet::new();
        projects.insert(ProjectPath::root());
        Self {
            root_project_name: root_project_name.into(),
            projects,
            included_builds: Vec::new(),
        }
    }

    /// Add a subproject (`:app`, `:lib:core`)
    #[must_use]
    pub fn with_subproject(mut self, path: &str) -> Self {
        self.include(path);
        self
    }

    /// Add a subproject in place
    pub fn include(&mut self, path: &str) {
        self.projects.insert(ProjectPath::parse(path));
    }

    /// Name of the root project
    pub fn root_project_name(&self) -> &str {
        &self.root_project_name
    }

    /// Whether a project exists at `path`
    pub fn find_project(&self, path: &ProjectPath) -> bool {
        self.projects.contains(path)
    }

    /// All projects of the root build, root project first
    pub fn projects(&self) -> impl Iterator<Item = &ProjectPath> {
        self.projects.iter()
    }

    /// Included builds visible from the root build
    pub fn included_builds(&self) -> &[IncludedBuildModel] {
        &self.included_builds
    }

    /// Replace the included builds visible from the root build
    pub fn set_included_builds(&mut self, builds: Vec<IncludedBuildModel>) {
        self.included_builds = builds;
    }
}

//! Build identities
//!
//! Identifiers, definitions and project paths that tell one build
//! participant apart from another.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::defaults::ROOT_BUILD_NAME;

/// Project path separator
const SEPARATOR: char = ':';

/// Stable identity of a registered build
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BuildIdentifier {
    name: String,
}

impl BuildIdentifier {
    /// Create an identifier for the build with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Identifier of the root build
    pub fn root() -> Self {
        Self::new(ROOT_BUILD_NAME)
    }

    /// Build name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this identifies the root build
    pub fn is_root(&self) -> bool {
        self.name == ROOT_BUILD_NAME
    }
}

impl fmt::Display for BuildIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Colon-separated project path (`:`, `:lib`, `:lib:core`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectPath {
    segments: Vec<String>,
}

impl ProjectPath {
    /// The root project path `:`
    pub fn root() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    /// Parse a path; empty segments are ignored so `lib` and `:lib` are equal
    pub fn parse(path: &str) -> Self {
        Self {
            segments: path
                .split(SEPARATOR)
                .filter(|segment| !segment.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }

    /// Path of a direct child project
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self { segments }
    }

    /// Append another path below this one
    #[must_use]
    pub fn append(&self, other: &ProjectPath) -> Self {
        let mut segments = self.segments.clone();
        segments.extend(other.segments.iter().cloned());
        Self { segments }
    }

    /// Last segment, `None` for the root path
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Whether this is the root path
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for ProjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "{SEPARATOR}");
        }
        for segment in &self.segments {
            write!(f, "{SEPARATOR}{segment}")?;
        }
        Ok(())
    }
}

/// A task within one build (`:jar`, `:core:compile`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskPath {
    project: ProjectPath,
    name: String,
}

impl TaskPath {
    /// Task `name` of the project at `project`
    pub fn new(project: ProjectPath, name: impl Into<String>) -> Self {
        Self {
            project,
            name: name.into(),
        }
    }

    /// Parse a task path; the last segment is the task name
    pub fn parse(path: &str) -> Self {
        let mut project = ProjectPath::parse(path);
        let name = project.segments.pop().unwrap_or_default();
        Self { project, name }
    }

    /// Owning project
    pub fn project(&self) -> &ProjectPath {
        &self.project
    }

    /// Task name
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TaskPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.project.is_root() {
            write!(f, "{SEPARATOR}{}", self.name)
        } else {
            write!(f, "{}{SEPARATOR}{}", self.project, self.name)
        }
    }
}

/// Descriptor of a build participant requested for registration
///
/// The root directory is the deduplication key; the registry canonicalizes
/// it before use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDefinition {
    root_dir: PathBuf,
    name: String,
    projects: Vec<ProjectPath>,
}

impl BuildDefinition {
    /// Create a definition for the build rooted at `root_dir`
    pub fn new(root_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            root_dir: root_dir.into(),
            name: name.into(),
            projects: Vec::new(),
        }
    }

    /// Create a definition named after the last component of `root_dir`
    pub fn from_root_dir(root_dir: impl Into<PathBuf>) -> Self {
        let root_dir = root_dir.into();
        let name = root_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(root_dir, name)
    }

    /// Declare a project of this build besides the root project
    #[must_use]
    pub fn with_project(mut self, path: &str) -> Self {
        let path = ProjectPath::parse(path);
        if !path.is_root() && !self.projects.contains(&path) {
            self.projects.push(path);
        }
        self
    }

    /// Same definition rooted at another directory
    #[must_use]
    pub fn with_root_dir(mut self, root_dir: impl Into<PathBuf>) -> Self {
        self.root_dir = root_dir.into();
        self
    }

    /// Build root directory as given
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Build name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared projects, including the root project first
    pub fn projects(&self) -> Vec<ProjectPath> {
        std::iter::once(ProjectPath::root())
            .chain(self.projects.iter().cloned())
            .collect()
    }
}

/// Handle to an included build as seen from the root build's settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludedBuildModel {
    /// Build name
    pub name: String,
    /// Canonical root directory
    pub root_dir: PathBuf,
}

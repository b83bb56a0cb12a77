//! Dependency substitution
//!
//! Redirects external module coordinates onto projects of included
//! builds. Resolution itself happens elsewhere; this module only records
//! which coordinate maps to which project.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use tracing::{debug, warn};

use crate::core::build_state::IncludedBuildState;
use crate::core::identity::{BuildIdentifier, ProjectPath};

/// External module coordinate (`group:name`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId {
    /// Module group
    pub group: String,
    /// Module name
    pub name: String,
}

impl ModuleId {
    /// Create a module coordinate
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.group, self.name)
    }
}

/// Target of a substitution rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSubstitution {
    /// Build producing the module
    pub build: BuildIdentifier,
    /// Producing project, relative to that build
    pub project: ProjectPath,
}

/// Installs substitution rules for an included build
pub trait DependencySubstitutionsBuilder: Send + Sync {
    /// Register every module the build can produce
    fn build(&self, build: &dyn IncludedBuildState);
}

/// Substitution rules installed so far
#[derive(Debug, Default)]
pub struct SubstitutionTable {
    rules: RwLock<BTreeMap<ModuleId, ProjectSubstitution>>,
}

impl SubstitutionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Project that replaces `module`, if any
    pub fn find(&self, module: &ModuleId) -> Option<ProjectSubstitution> {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(module)
            .cloned()
    }

    /// Number of installed rules
    pub fn len(&self) -> usize {
        self.rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no rules are installed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, module: ModuleId, target: ProjectSubstitution) {
        let mut rules = self.rules.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = rules.get(&module) {
            if existing.build != target.build {
                warn!(
                    "Module '{module}' is provided by builds '{}' and '{}', keeping '{}'",
                    existing.build, target.build, existing.build
                );
            }
            return;
        }
        rules.insert(module, target);
    }
}

/// Records each included build's modules in a [`SubstitutionTable`]
///
/// The first build to provide a module wins.
#[derive(Debug, Default)]
pub struct DefaultSubstitutionsBuilder {
    table: SubstitutionTable,
}

impl DefaultSubstitutionsBuilder {
    /// Create a builder with an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Installed rules
    pub fn table(&self) -> &SubstitutionTable {
        &self.table
    }
}

impl DependencySubstitutionsBuilder for DefaultSubstitutionsBuilder {
    fn build(&self, build: &dyn IncludedBuildState) {
        let identifier = build.build_identifier();
        for (module, project) in build.available_modules() {
            debug!("Substituting '{module}' with project '{project}' of build '{identifier}'");
            self.table.insert(
                module,
                ProjectSubstitution {
                    build: identifier.clone(),
                    project,
                },
            );
        }
    }
}

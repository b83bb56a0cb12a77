//! Build participants
//!
//! The registry owns one [`IncludedBuildState`] per included build. How the
//! state is created is up to the [`IncludedBuildFactory`]; the default
//! implementations here keep everything in memory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::core::identity::{BuildDefinition, BuildIdentifier, IncludedBuildModel, ProjectPath};
use crate::core::settings::RootSettings;
use crate::core::stoppable::Stoppable;
use crate::core::substitution::ModuleId;
use crate::error::{RegistryError, StopError};

/// Anything whose projects can be registered into the project namespace
pub trait BuildState {
    /// Identity of the build
    fn build_identifier(&self) -> BuildIdentifier;

    /// Whether the build was pulled in only through a dependency
    fn is_implicit_build(&self) -> bool;

    /// Projects of the build, relative to the build's root project
    fn projects(&self) -> Vec<ProjectPath>;

    /// Path that identifies `path` across the whole build tree
    fn identity_path_for_project(&self, path: &ProjectPath) -> ProjectPath;
}

impl<T: BuildState + ?Sized> BuildState for Arc<T> {
    fn build_identifier(&self) -> BuildIdentifier {
        (**self).build_identifier()
    }

    fn is_implicit_build(&self) -> bool {
        (**self).is_implicit_build()
    }

    fn projects(&self) -> Vec<ProjectPath> {
        (**self).projects()
    }

    fn identity_path_for_project(&self, path: &ProjectPath) -> ProjectPath {
        (**self).identity_path_for_project(path)
    }
}

/// One registered included build
pub trait IncludedBuildState: BuildState + Stoppable + Send + Sync {
    /// Build name
    fn name(&self) -> &str;

    /// Canonical root directory
    fn root_dir(&self) -> &Path;

    /// Model handle published onto the root settings
    fn model(&self) -> IncludedBuildModel {
        IncludedBuildModel {
            name: self.name().to_string(),
            root_dir: self.root_dir().to_path_buf(),
        }
    }

    /// Modules this build can substitute, keyed to the producing project
    ///
    /// Each project publishes `<build name>:<project name>`; the root
    /// project publishes under the build name.
    fn available_modules(&self) -> Vec<(ModuleId, ProjectPath)> {
        self.projects()
            .into_iter()
            .map(|path| {
                let module = path.name().unwrap_or_else(|| self.name()).to_string();
                (ModuleId::new(self.name(), module), path)
            })
            .collect()
    }

    /// Release the resources of the current task execution session
    fn finish_build(&self) -> Result<(), StopError>;
}

impl std::fmt::Debug for dyn IncludedBuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncludedBuildState")
            .field("name", &self.name())
            .field("root_dir", &self.root_dir())
            .finish()
    }
}

/// Creates nested builds inside a build; opaque to the registry
pub trait NestedBuildFactory: Send + Sync {}

impl NestedBuildFactory for () {}

/// Constructs included build participants
///
/// Called with the registry's write lock held, so implementations must not
/// call back into the registry.
pub trait IncludedBuildFactory: Send + Sync {
    /// Create the state for a build that is not yet registered
    fn create_build(
        &self,
        definition: &BuildDefinition,
        is_implicit: bool,
        nested_factory: &dyn NestedBuildFactory,
    ) -> Result<Arc<dyn IncludedBuildState>, RegistryError>;
}

/// In-memory included build
#[derive(Debug)]
pub struct DefaultIncludedBuild {
    identifier: BuildIdentifier,
    root_dir: PathBuf,
    projects: Vec<ProjectPath>,
    implicit: bool,
    finished_sessions: AtomicUsize,
    stopped: AtomicBool,
}

impl DefaultIncludedBuild {
    /// Create a build from its definition
    pub fn new(definition: &BuildDefinition, implicit: bool) -> Self {
        Self {
            identifier: BuildIdentifier::new(definition.name()),
            root_dir: definition.root_dir().to_path_buf(),
            projects: definition.projects(),
            implicit,
            finished_sessions: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    /// Number of task execution sessions finished so far
    pub fn finished_sessions(&self) -> usize {
        self.finished_sessions.load(Ordering::SeqCst)
    }

    /// Whether the build has been stopped
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl BuildState for DefaultIncludedBuild {
    fn build_identifier(&self) -> BuildIdentifier {
        self.identifier.clone()
    }

    fn is_implicit_build(&self) -> bool {
        self.implicit
    }

    fn projects(&self) -> Vec<ProjectPath> {
        self.projects.clone()
    }

    fn identity_path_for_project(&self, path: &ProjectPath) -> ProjectPath {
        ProjectPath::root()
            .child(self.identifier.name())
            .append(path)
    }
}

impl Stoppable for DefaultIncludedBuild {
    fn describe(&self) -> String {
        format!("included build '{}'", self.identifier)
    }

    fn stop(&self) -> Result<(), StopError> {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!("Stopped included build '{}'", self.identifier);
        }
        Ok(())
    }
}

impl IncludedBuildState for DefaultIncludedBuild {
    fn name(&self) -> &str {
        self.identifier.name()
    }

    fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn finish_build(&self) -> Result<(), StopError> {
        let sessions = self.finished_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(
            "Finished build '{}' (session {sessions})",
            self.identifier
        );
        Ok(())
    }
}

/// Factory producing [`DefaultIncludedBuild`] instances
///
/// The build name becomes a segment of its projects' identity paths, so it
/// must be non-empty and free of `:`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultIncludedBuildFactory;

impl IncludedBuildFactory for DefaultIncludedBuildFactory {
    fn create_build(
        &self,
        definition: &BuildDefinition,
        is_implicit: bool,
        _nested_factory: &dyn NestedBuildFactory,
    ) -> Result<Arc<dyn IncludedBuildState>, RegistryError> {
        let name = definition.name();
        if name.is_empty() || name.contains(':') {
            return Err(RegistryError::CreateFailed {
                name: name.to_string(),
                root_dir: definition.root_dir().to_path_buf(),
                error: "build name must be a single non-empty path segment".to_string(),
            });
        }
        Ok(Arc::new(DefaultIncludedBuild::new(definition, is_implicit)))
    }
}

/// The root build, seen only through its settings
///
/// Project paths of the root build are already identity paths.
#[derive(Debug)]
pub struct RootBuild<'a> {
    settings: &'a RootSettings,
}

impl<'a> RootBuild<'a> {
    /// Wrap the loaded root settings
    pub fn new(settings: &'a RootSettings) -> Self {
        Self { settings }
    }
}

impl BuildState for RootBuild<'_> {
    fn build_identifier(&self) -> BuildIdentifier {
        BuildIdentifier::root()
    }

    fn is_implicit_build(&self) -> bool {
        false
    }

    fn projects(&self) -> Vec<ProjectPath> {
        self.settings.projects().cloned().collect()
    }

    fn identity_path_for_project(&self, path: &ProjectPath) -> ProjectPath {
        path.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lib_definition() -> BuildDefinition {
        BuildDefinition::new("/work/lib", "lib").with_project(":core")
    }

    #[test]
    fn test_identity_path_is_prefixed_with_build_name() {
        let build = DefaultIncludedBuild::new(&lib_definition(), false);
        assert_eq!(
            build
                .identity_path_for_project(&ProjectPath::parse(":core"))
                .to_string(),
            ":lib:core"
        );
        assert_eq!(
            build
                .identity_path_for_project(&ProjectPath::root())
                .to_string(),
            ":lib"
        );
    }

    #[test]
    fn test_root_build_identity_mapping() {
        let settings = RootSettings::new("app").with_subproject(":util");
        let root = RootBuild::new(&settings);
        let path = ProjectPath::parse(":util");
        assert_eq!(root.identity_path_for_project(&path), path);
        assert!(root.build_identifier().is_root());
        assert_eq!(root.projects().len(), 2);
    }

    #[test]
    fn test_available_modules() {
        let build = DefaultIncludedBuild::new(&lib_definition(), true);
        let modules = build.available_modules();
        assert_eq!(
            modules,
            vec![
                (ModuleId::new("lib", "lib"), ProjectPath::root()),
                (ModuleId::new("lib", "core"), ProjectPath::parse(":core")),
            ]
        );
        assert!(build.is_implicit_build());
    }

    #[test]
    fn test_finish_build_counts_sessions() {
        let build = DefaultIncludedBuild::new(&lib_definition(), false);
        build.finish_build().unwrap();
        build.finish_build().unwrap();
        assert_eq!(build.finished_sessions(), 2);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let build = DefaultIncludedBuild::new(&lib_definition(), false);
        build.stop().unwrap();
        build.stop().unwrap();
        assert!(build.is_stopped());
    }

    #[test]
    fn test_default_model_handle() {
        let build = DefaultIncludedBuild::new(&lib_definition(), false);
        let model = build.model();
        assert_eq!(model.name, "lib");
        assert_eq!(model.root_dir, PathBuf::from("/work/lib"));
    }

    #[test]
    fn test_default_factory_rejects_unusable_names() {
        for definition in [
            BuildDefinition::from_root_dir("/"),
            BuildDefinition::new("/work/lib", "lib:core"),
        ] {
            let err = DefaultIncludedBuildFactory
                .create_build(&definition, false, &())
                .err()
                .unwrap();
            assert!(matches!(err, RegistryError::CreateFailed { .. }));
            assert!(err.to_string().contains("single non-empty path segment"));
        }
    }
}

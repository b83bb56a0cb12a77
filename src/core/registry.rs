//! Included build registry
//!
//! The authoritative store of the builds participating in a build tree.
//! Builds are keyed by canonical root directory, so registering the same
//! directory twice yields the same [`IncludedBuildState`]. Names are only
//! checked for uniqueness when the explicit builds are validated, because
//! they may not be final before then.
//!
//! The project namespace is only ever locked after the build map.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::core::build_state::{
    BuildState, DefaultIncludedBuildFactory, IncludedBuildFactory, IncludedBuildState,
    NestedBuildFactory, RootBuild,
};
use crate::core::identity::{BuildDefinition, BuildIdentifier, ProjectPath};
use crate::core::project_paths::{DefaultProjectPathRegistry, ProjectPathRegistry};
use crate::core::settings::RootSettings;
use crate::core::stoppable::stop_all;
use crate::core::substitution::{DefaultSubstitutionsBuilder, DependencySubstitutionsBuilder};
use crate::error::{RegistryError, StopError};
use crate::infra::filesystem;

/// Registered builds in registration order
#[derive(Default)]
struct RegisteredBuilds {
    by_root: HashMap<PathBuf, usize>,
    ordered: Vec<Arc<dyn IncludedBuildState>>,
}

impl RegisteredBuilds {
    fn get(&self, root_dir: &Path) -> Option<&Arc<dyn IncludedBuildState>> {
        self.by_root.get(root_dir).map(|&index| &self.ordered[index])
    }

    fn insert(&mut self, root_dir: PathBuf, build: Arc<dyn IncludedBuildState>) {
        self.by_root.insert(root_dir, self.ordered.len());
        self.ordered.push(build);
    }
}

/// Registry of every included build in the build tree
pub struct BuildRegistry {
    factory: Arc<dyn IncludedBuildFactory>,
    project_registry: Arc<dyn ProjectPathRegistry>,
    substitutions: Arc<dyn DependencySubstitutionsBuilder>,
    canonicalize_roots: bool,
    builds: RwLock<RegisteredBuilds>,
    validated: AtomicBool,
}

impl BuildRegistry {
    /// Create a registry over the given collaborators
    pub fn new(
        factory: Arc<dyn IncludedBuildFactory>,
        project_registry: Arc<dyn ProjectPathRegistry>,
        substitutions: Arc<dyn DependencySubstitutionsBuilder>,
    ) -> Self {
        Self {
            factory,
            project_registry,
            substitutions,
            canonicalize_roots: true,
            builds: RwLock::new(RegisteredBuilds::default()),
            validated: AtomicBool::new(false),
        }
    }

    /// Create a registry with the in-memory default collaborators
    pub fn with_defaults() -> Self {
        Self::new(
            Arc::new(DefaultIncludedBuildFactory),
            Arc::new(DefaultProjectPathRegistry::new()),
            Arc::new(DefaultSubstitutionsBuilder::new()),
        )
    }

    /// Resolve root directories through the filesystem (default) or only
    /// normalize them lexically
    #[must_use]
    pub fn with_canonicalize_roots(mut self, canonicalize: bool) -> Self {
        self.canonicalize_roots = canonicalize;
        self
    }

    /// Whether any included build has been registered
    pub fn has_included_builds(&self) -> bool {
        !self.read().ordered.is_empty()
    }

    /// All registered builds, in registration order
    pub fn included_builds(&self) -> Vec<Arc<dyn IncludedBuildState>> {
        self.read().ordered.clone()
    }

    /// Register a build declared directly by the user
    ///
    /// Idempotent on the canonical root directory. Projects are registered
    /// later, by [`validate_explicit_included_builds`](Self::validate_explicit_included_builds).
    pub fn add_explicit_build(
        &self,
        definition: &BuildDefinition,
        nested_factory: &dyn NestedBuildFactory,
    ) -> Result<Arc<dyn IncludedBuildState>, RegistryError> {
        self.register_build(definition, false, nested_factory)
    }

    /// Register a build discovered through another build's dependency
    ///
    /// Idempotent on the canonical root directory. On first registration the
    /// build's projects are registered right away, since implicit builds can
    /// be referenced before validation runs. A build whose projects are
    /// rejected is not registered.
    pub fn add_implicit_build(
        &self,
        definition: &BuildDefinition,
        nested_factory: &dyn NestedBuildFactory,
    ) -> Result<Arc<dyn IncludedBuildState>, RegistryError> {
        self.register_build(definition, true, nested_factory)
    }

    /// Find a registered build by identifier
    ///
    /// `None` means the build has not been discovered (yet).
    pub fn get_build(&self, identifier: &BuildIdentifier) -> Option<Arc<dyn IncludedBuildState>> {
        self.read()
            .ordered
            .iter()
            .find(|build| build.name() == identifier.name())
            .cloned()
    }

    /// Validate the explicit builds and wire them into the root build
    ///
    /// Must be called once, after every explicit build is registered and
    /// before any task executes.
    pub fn validate_explicit_included_builds(
        &self,
        settings: &mut RootSettings,
    ) -> Result<(), RegistryError> {
        if self.validated.swap(true, Ordering::SeqCst) {
            return Err(RegistryError::AlreadyValidated);
        }

        let builds = self.included_builds();
        let explicit: Vec<_> = builds
            .iter()
            .filter(|build| !build.is_implicit_build())
            .cloned()
            .collect();

        check_names(&explicit, settings)?;

        self.project_registry
            .register_projects(&RootBuild::new(settings))?;

        // Only explicit builds are visible from the root build.
        settings.set_included_builds(explicit.iter().map(|build| build.model()).collect());

        for build in &explicit {
            self.project_registry.register_projects(build)?;
        }
        for build in &builds {
            self.substitutions.build(&**build);
        }

        info!(
            "Validated {} explicit included builds ({} registered)",
            explicit.len(),
            builds.len()
        );
        Ok(())
    }

    /// Stop every registered build
    ///
    /// Every build is stopped even if an earlier one fails.
    pub fn stop(&self) -> Result<(), StopError> {
        let builds = self.included_builds();
        debug!("Stopping {} included builds", builds.len());
        stop_all(builds.iter())
    }

    fn register_build(
        &self,
        definition: &BuildDefinition,
        implicit: bool,
        nested_factory: &dyn NestedBuildFactory,
    ) -> Result<Arc<dyn IncludedBuildState>, RegistryError> {
        let root_dir = self.root_key(definition.root_dir());

        if let Some(existing) = self.read().get(&root_dir) {
            warn_on_mismatch(&**existing, definition);
            return Ok(Arc::clone(existing));
        }

        let mut builds = self.builds.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have registered the directory in between.
        if let Some(existing) = builds.get(&root_dir) {
            warn_on_mismatch(&**existing, definition);
            return Ok(Arc::clone(existing));
        }

        let definition = definition.clone().with_root_dir(root_dir.clone());
        let build = self
            .factory
            .create_build(&definition, implicit, nested_factory)?;
        if implicit {
            self.project_registry.register_projects(&build)?;
        }
        builds.insert(root_dir, Arc::clone(&build));

        info!(
            "Registered {} build '{}' at {}",
            if implicit { "implicit" } else { "explicit" },
            build.name(),
            build.root_dir().display()
        );
        Ok(build)
    }

    fn root_key(&self, root_dir: &Path) -> PathBuf {
        if self.canonicalize_roots {
            filesystem::canonical_root(root_dir)
        } else {
            filesystem::normalize(root_dir)
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegisteredBuilds> {
        self.builds.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for BuildRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let builds = self.read();
        f.debug_struct("BuildRegistry")
            .field("builds", &builds.by_root.keys().collect::<Vec<_>>())
            .field("validated", &self.validated.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Reject duplicate names and names that collide with the root build
fn check_names(
    builds: &[Arc<dyn IncludedBuildState>],
    settings: &RootSettings,
) -> Result<(), RegistryError> {
    let mut names = HashSet::new();
    for build in builds {
        let name = build.name();
        if !names.insert(name) {
            return Err(RegistryError::NotUnique {
                name: name.to_string(),
            });
        }
        if settings.root_project_name() == name {
            return Err(RegistryError::CollidesWithRootProject {
                name: name.to_string(),
            });
        }
        if settings.find_project(&ProjectPath::root().child(name)) {
            return Err(RegistryError::CollidesWithSubproject {
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

fn warn_on_mismatch(existing: &dyn IncludedBuildState, definition: &BuildDefinition) {
    if existing.name() != definition.name() {
        warn!(
            "Build at {} is already registered as '{}', ignoring name '{}'",
            existing.root_dir().display(),
            existing.name(),
            definition.name()
        );
    }
}

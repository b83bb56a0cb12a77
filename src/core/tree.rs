//! Build tree lifecycle
//!
//! Wires the registry and the controller orchestrator together for one
//! build tree and owns their teardown.

use std::path::Path;
use std::sync::{Arc, Weak};

use tracing::{info, warn};

use crate::core::build_state::IncludedBuildState;
use crate::core::controller::{BuildControllerFactory, BuildWorkGraph, DefaultControllerFactory};
use crate::core::controllers::BuildControllers;
use crate::core::identity::{BuildDefinition, BuildIdentifier, TaskPath};
use crate::core::registry::BuildRegistry;
use crate::core::settings::RootSettings;
use crate::core::tree_config::BuildTreeConfig;
use crate::error::{BuildTreeError, StopError};

/// A root build and every build included into it
pub struct BuildTree {
    config: BuildTreeConfig,
    registry: Arc<BuildRegistry>,
    controllers: Arc<BuildControllers>,
}

impl BuildTree {
    /// Create a tree with the default registry collaborators
    ///
    /// `work_graphs` creates the task engine of each build. It receives a
    /// handle to the orchestrator so a graph can request tasks from other
    /// builds while it is populated.
    pub fn new<F>(config: BuildTreeConfig, work_graphs: F) -> Self
    where
        F: Fn(&dyn IncludedBuildState, &Weak<BuildControllers>) -> Box<dyn BuildWorkGraph>
            + Send
            + Sync
            + 'static,
    {
        let registry =
            BuildRegistry::with_defaults().with_canonicalize_roots(config.canonicalize_roots());
        Self::with_registry(config, registry, work_graphs)
    }

    /// Create a tree configured from the TOML file at `path`
    ///
    /// A missing file gives the default configuration.
    pub fn from_config_path<F>(path: &Path, work_graphs: F) -> Result<Self, BuildTreeError>
    where
        F: Fn(&dyn IncludedBuildState, &Weak<BuildControllers>) -> Box<dyn BuildWorkGraph>
            + Send
            + Sync
            + 'static,
    {
        let config = BuildTreeConfig::load_from_path(path)?;
        info!("Loaded build tree configuration from {}", path.display());
        Ok(Self::new(config, work_graphs))
    }

    /// Create a tree over a preconfigured registry
    pub fn with_registry<F>(config: BuildTreeConfig, registry: BuildRegistry, work_graphs: F) -> Self
    where
        F: Fn(&dyn IncludedBuildState, &Weak<BuildControllers>) -> Box<dyn BuildWorkGraph>
            + Send
            + Sync
            + 'static,
    {
        let registry = Arc::new(registry);
        let controllers = BuildControllers::new_cyclic(
            Arc::clone(&registry),
            &config,
            move |orchestrator| -> Arc<dyn BuildControllerFactory> {
                Arc::new(DefaultControllerFactory::new(move |build| {
                    work_graphs(build, &orchestrator)
                }))
            },
        );
        Self {
            config,
            registry,
            controllers,
        }
    }

    /// Effective configuration
    pub fn config(&self) -> &BuildTreeConfig {
        &self.config
    }

    /// Registry of the tree's included builds
    pub fn registry(&self) -> &Arc<BuildRegistry> {
        &self.registry
    }

    /// Controller orchestrator of the tree
    pub fn controllers(&self) -> &Arc<BuildControllers> {
        &self.controllers
    }

    /// Include a build declared by the user
    pub fn include_build(
        &self,
        definition: &BuildDefinition,
    ) -> Result<Arc<dyn IncludedBuildState>, BuildTreeError> {
        Ok(self.registry.add_explicit_build(definition, &())?)
    }

    /// Validate the included builds against the loaded root settings
    pub fn finish_settings(&self, settings: &mut RootSettings) -> Result<(), BuildTreeError> {
        Ok(self.registry.validate_explicit_included_builds(settings)?)
    }

    /// Run one task execution session
    ///
    /// Queues `requests`, discovers the complete work of every build they
    /// reach, executes it and finishes every build. The session is ended
    /// even when execution fails.
    pub fn execute_tasks(
        &self,
        requests: &[(BuildIdentifier, TaskPath)],
    ) -> Result<(), BuildTreeError> {
        let outcome = self.run_session(requests);
        let finished = self.controllers.stop_task_execution();
        outcome?;
        finished?;
        Ok(())
    }

    fn run_session(&self, requests: &[(BuildIdentifier, TaskPath)]) -> Result<(), BuildTreeError> {
        for (build, task) in requests {
            self.controllers
                .get_build_controller(build)?
                .queue_for_execution(task.clone());
        }
        self.controllers.start_task_execution();
        self.controllers.await_task_completion()?;
        Ok(())
    }

    /// Release every resource held by the tree
    ///
    /// The registry is stopped even if the controllers fail to stop.
    pub fn stop(&self) -> Result<(), StopError> {
        info!(
            "Stopping build tree ({} included builds)",
            self.registry.included_builds().len()
        );
        let mut failures = Vec::new();
        if let Err(e) = self.controllers.stop() {
            warn!("Failed to stop build controllers: {e}");
            failures.push(e);
        }
        if let Err(e) = self.registry.stop() {
            failures.push(e);
        }
        StopError::from_failures(failures)
    }
}

impl std::fmt::Debug for BuildTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildTree")
            .field("registry", &self.registry)
            .field("controllers", &self.controllers)
            .finish_non_exhaustive()
    }
}

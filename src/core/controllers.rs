//! Build controller orchestration
//!
//! Owns one [`BuildController`] per build taking part in the current task
//! execution session. Controllers are created lazily, usually while
//! another build's task graph is being populated, so discovery runs as a
//! fixed point over the growing controller set before any build is allowed
//! to execute.
//!
//! Lock order is controller map, then registry. The controller map is never
//! held while a controller is created or driven, so factories and controllers
//! may call back into the orchestrator.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};

use tracing::{debug, info, warn};

use crate::core::controller::{BuildController, BuildControllerFactory};
use crate::core::identity::BuildIdentifier;
use crate::core::registry::BuildRegistry;
use crate::core::stoppable::{run_all, stop_all, Stoppable};
use crate::core::tree_config::BuildTreeConfig;
use crate::error::{BuildFailure, ControllerError, StopError};
use crate::infra::worker_pool::WorkerPool;

/// Controllers of the current session and the builds whose controller is
/// being created
#[derive(Default)]
struct ControllerMap {
    by_build: BTreeMap<BuildIdentifier, Arc<dyn BuildController>>,
    creating: BTreeMap<BuildIdentifier, ThreadId>,
}

/// Orchestrator of the included builds' controllers
pub struct BuildControllers {
    registry: Arc<BuildRegistry>,
    factory: Arc<dyn BuildControllerFactory>,
    controllers: Mutex<ControllerMap>,
    pool: WorkerPool,
}

impl BuildControllers {
    /// Create an orchestrator over `registry`
    pub fn new(
        registry: Arc<BuildRegistry>,
        factory: Arc<dyn BuildControllerFactory>,
        config: &BuildTreeConfig,
    ) -> Self {
        Self {
            registry,
            factory,
            controllers: Mutex::new(ControllerMap::default()),
            pool: WorkerPool::new(config.worker_pool_name())
                .with_stack_size(config.worker_stack_size()),
        }
    }

    /// Create a shared orchestrator whose controller factory can refer back
    /// to it
    ///
    /// Work graphs use the back reference to request tasks from other
    /// builds while their own graph is populated.
    pub fn new_cyclic<F>(registry: Arc<BuildRegistry>, config: &BuildTreeConfig, factory: F) -> Arc<Self>
    where
        F: FnOnce(Weak<Self>) -> Arc<dyn BuildControllerFactory>,
    {
        Arc::new_cyclic(|orchestrator| Self::new(registry, factory(orchestrator.clone()), config))
    }

    /// Registry the controllers are created for
    pub fn registry(&self) -> &Arc<BuildRegistry> {
        &self.registry
    }

    /// Controller of the build identified by `identifier`
    ///
    /// Creates the controller on first request and submits its worker to
    /// the pool. Safe to call while another controller populates its task
    /// graph or is being created. When two threads create the same
    /// controller, the first one inserted wins.
    pub fn get_build_controller(
        &self,
        identifier: &BuildIdentifier,
    ) -> Result<Arc<dyn BuildController>, ControllerError> {
        let current = thread::current().id();
        {
            let mut controllers = self.lock();
            if let Some(controller) = controllers.by_build.get(identifier) {
                return Ok(Arc::clone(controller));
            }
            match controllers.creating.get(identifier).copied() {
                Some(owner) if owner == current => {
                    return Err(ControllerError::CreationCycle {
                        build: identifier.to_string(),
                    });
                }
                Some(_) => {}
                None => {
                    controllers.creating.insert(identifier.clone(), current);
                }
            }
        }

        let created = self.create_controller(identifier);

        let mut controllers = self.lock();
        if controllers.creating.get(identifier) == Some(&current) {
            controllers.creating.remove(identifier);
        }
        let controller = created?;
        if let Some(existing) = controllers.by_build.get(identifier).cloned() {
            drop(controllers);
            debug!("Discarding concurrently created controller for build '{identifier}'");
            if let Err(e) = controller.stop() {
                warn!("{e}");
            }
            return Ok(existing);
        }

        if let Some(worker) = controller.take_worker() {
            self.pool
                .submit(&identifier.to_string(), worker)
                .map_err(|source| ControllerError::Worker {
                    build: identifier.to_string(),
                    source,
                })?;
        }
        debug!("Created controller for build '{identifier}'");
        controllers
            .by_build
            .insert(identifier.clone(), Arc::clone(&controller));
        Ok(controller)
    }

    /// Discover every build's task graph, then start executing all of them
    ///
    /// No controller is started before discovery has stabilized.
    pub fn start_task_execution(&self) {
        self.populate_task_graphs();

        let controllers = self.snapshot();
        info!("Starting task execution for {} builds", controllers.len());
        for controller in &controllers {
            controller.start_task_execution();
        }
    }

    /// Populate task graphs until a full pass discovers nothing new
    ///
    /// Each pass works on a snapshot of the controller set; controllers
    /// created during a pass are populated by the next one.
    pub fn populate_task_graphs(&self) {
        let mut passes = 0usize;
        loop {
            passes += 1;
            let controllers = self.snapshot();
            let mut discovered = false;
            for controller in &controllers {
                if controller.populate_task_graph() {
                    discovered = true;
                }
            }
            debug!(
                "Task graph pass {passes} over {} builds (new work: {discovered})",
                controllers.len()
            );
            if !discovered {
                break;
            }
        }
    }

    /// Wait for every started build and report the first failure
    ///
    /// Every controller is awaited even after a failure.
    pub fn await_task_completion(&self) -> Result<(), BuildFailure> {
        let mut first_failure = None;
        for controller in self.snapshot() {
            if let Err(failure) = controller.await_completion() {
                warn!("{failure}");
                first_failure.get_or_insert(failure);
            }
        }
        first_failure.map_or(Ok(()), Err)
    }

    /// End the current task execution session
    ///
    /// Stops every controller, discards them, and finishes every registered
    /// build, including builds that never had a controller.
    pub fn stop_task_execution(&self) -> Result<(), StopError> {
        let controllers = self.snapshot();
        for controller in &controllers {
            controller.stop_task_execution();
        }
        self.lock().by_build.clear();

        let builds = self.registry.included_builds();
        info!(
            "Stopped task execution of {} controllers, finishing {} builds",
            controllers.len(),
            builds.len()
        );
        run_all(builds.iter(), |build| build.finish_build())
    }

    /// Stop every remaining controller and shut down the worker pool
    ///
    /// The pool is shut down even if a controller fails to stop.
    pub fn stop(&self) -> Result<(), StopError> {
        let controllers: Vec<_> = std::mem::take(&mut self.lock().by_build)
            .into_values()
            .collect();
        let mut failures = Vec::new();
        if let Err(e) = stop_all(controllers.iter()) {
            failures.push(e);
        }
        if let Err(e) = self.pool.stop() {
            warn!("Failed to stop {}: {e}", self.pool.describe());
            failures.push(e);
        }
        StopError::from_failures(failures)
    }

    /// Number of controllers in the current session
    pub fn controller_count(&self) -> usize {
        self.lock().by_build.len()
    }

    /// Worker pool running the controllers' workers
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    fn create_controller(
        &self,
        identifier: &BuildIdentifier,
    ) -> Result<Arc<dyn BuildController>, ControllerError> {
        let build = self
            .registry
            .get_build(identifier)
            .ok_or_else(|| ControllerError::BuildNotRegistered {
                build: identifier.to_string(),
            })?;
        Ok(self.factory.create_controller(build))
    }

    fn snapshot(&self) -> Vec<Arc<dyn BuildController>> {
        self.lock().by_build.values().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, ControllerMap> {
        self.controllers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for BuildControllers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildControllers")
            .field("controllers", &self.lock().by_build.keys().collect::<Vec<_>>())
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

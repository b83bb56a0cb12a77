//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once, Weak};

use buildtree::core::build_state::{
    BuildState, DefaultIncludedBuild, IncludedBuildFactory, IncludedBuildState, NestedBuildFactory,
};
use buildtree::core::controller::{
    BuildController, BuildControllerFactory, BuildWorker, BuildWorkGraph, ControllerState,
};
use buildtree::core::controllers::BuildControllers;
use buildtree::core::identity::{BuildDefinition, BuildIdentifier, ProjectPath, TaskPath};
use buildtree::core::stoppable::Stoppable;
use buildtree::error::{BuildFailure, RegistryError, StopError};
use tempfile::TempDir;

/// Install a log subscriber once per test binary
///
/// Filter with `RUST_LOG`, e.g. `RUST_LOG=buildtree=debug`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Test composite context
///
/// Creates a temporary directory holding the root directories of the
/// included builds.
pub struct TestComposite {
    /// Temporary directory for the test composite
    pub dir: TempDir,
}

impl TestComposite {
    /// Create a new test composite in a temporary directory
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Get the path to the test composite directory
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Create the root directory of an included build
    pub fn create_build_dir(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::create_dir_all(&path).expect("Failed to create build directory");
        path
    }

    /// Definition of a build rooted in this composite
    pub fn definition(&self, name: &str) -> BuildDefinition {
        BuildDefinition::new(self.create_build_dir(name), name)
    }
}

impl Default for TestComposite {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered record of calls made across threads
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Events starting with `prefix`
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|event| event.starts_with(prefix))
            .collect()
    }

    /// Number of events equal to `event`
    pub fn count(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    /// Position of the first event starting with `prefix`
    pub fn first(&self, prefix: &str) -> Option<usize> {
        self.events().iter().position(|event| event.starts_with(prefix))
    }

    /// Position of the last event starting with `prefix`
    pub fn last(&self, prefix: &str) -> Option<usize> {
        self.events().iter().rposition(|event| event.starts_with(prefix))
    }
}

/// Build factory that keeps a handle on every build it creates
///
/// Builds named with [`failing`](Self::failing) are wrapped in a
/// [`FailingBuild`]; the tracked handle is the wrapped build.
#[derive(Default)]
pub struct TrackingBuildFactory {
    builds: Mutex<Vec<Arc<DefaultIncludedBuild>>>,
    failing: HashSet<String>,
}

impl TrackingBuildFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the build named `name` fail to finish and to stop
    pub fn failing(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn builds(&self) -> Vec<Arc<DefaultIncludedBuild>> {
        self.builds.lock().unwrap().clone()
    }
}

impl IncludedBuildFactory for TrackingBuildFactory {
    fn create_build(
        &self,
        definition: &BuildDefinition,
        is_implicit: bool,
        _nested_factory: &dyn NestedBuildFactory,
    ) -> Result<Arc<dyn IncludedBuildState>, RegistryError> {
        let build = Arc::new(DefaultIncludedBuild::new(definition, is_implicit));
        self.builds.lock().unwrap().push(Arc::clone(&build));
        if self.failing.contains(definition.name()) {
            return Ok(Arc::new(FailingBuild { inner: build }));
        }
        Ok(build)
    }
}

/// Included build whose teardown steps run and then report a failure
pub struct FailingBuild {
    inner: Arc<DefaultIncludedBuild>,
}

impl BuildState for FailingBuild {
    fn build_identifier(&self) -> BuildIdentifier {
        self.inner.build_identifier()
    }

    fn is_implicit_build(&self) -> bool {
        self.inner.is_implicit_build()
    }

    fn projects(&self) -> Vec<ProjectPath> {
        self.inner.projects()
    }

    fn identity_path_for_project(&self, path: &ProjectPath) -> ProjectPath {
        self.inner.identity_path_for_project(path)
    }
}

impl Stoppable for FailingBuild {
    fn describe(&self) -> String {
        format!("failing build '{}'", self.inner.name())
    }

    fn stop(&self) -> Result<(), StopError> {
        self.inner.stop()?;
        Err(StopError::component(self.describe(), "cannot release build"))
    }
}

impl IncludedBuildState for FailingBuild {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn root_dir(&self) -> &Path {
        self.inner.root_dir()
    }

    fn finish_build(&self) -> Result<(), StopError> {
        self.inner.finish_build()?;
        Err(StopError::component(self.describe(), "cannot finish session"))
    }
}

/// Controller that records every call and discovers fixed dependencies
///
/// Its first `populate_task_graph` creates the controllers of its
/// dependencies and reports new work; later calls report nothing.
pub struct RecordingController {
    identifier: BuildIdentifier,
    log: EventLog,
    dependencies: Vec<BuildIdentifier>,
    orchestrator: Weak<BuildControllers>,
    populated: AtomicBool,
    stopped: AtomicBool,
    fail_stop: bool,
    populate_calls: AtomicUsize,
}

impl RecordingController {
    pub fn populate_calls(&self) -> usize {
        self.populate_calls.load(Ordering::SeqCst)
    }
}

impl BuildController for RecordingController {
    fn identifier(&self) -> &BuildIdentifier {
        &self.identifier
    }

    fn state(&self) -> ControllerState {
        if self.stopped.load(Ordering::SeqCst) {
            ControllerState::Stopped
        } else {
            ControllerState::Created
        }
    }

    fn take_worker(&self) -> Option<BuildWorker> {
        Some(Box::new(|| {}))
    }

    fn queue_for_execution(&self, task: TaskPath) {
        self.log.record(format!("queue:{}:{task}", self.identifier));
    }

    fn populate_task_graph(&self) -> bool {
        self.populate_calls.fetch_add(1, Ordering::SeqCst);
        self.log.record(format!("populate:{}", self.identifier));
        if self.populated.swap(true, Ordering::SeqCst) {
            return false;
        }
        let orchestrator = self
            .orchestrator
            .upgrade()
            .expect("orchestrator dropped during discovery");
        for dependency in &self.dependencies {
            orchestrator
                .get_build_controller(dependency)
                .expect("dependency not registered");
        }
        true
    }

    fn start_task_execution(&self) {
        self.log.record(format!("start:{}", self.identifier));
    }

    fn stop_task_execution(&self) {
        self.log.record(format!("stop_task_execution:{}", self.identifier));
    }

    fn await_completion(&self) -> Result<(), BuildFailure> {
        Ok(())
    }
}

impl Stoppable for RecordingController {
    fn describe(&self) -> String {
        format!("recording controller '{}'", self.identifier)
    }

    fn stop(&self) -> Result<(), StopError> {
        self.stopped.store(true, Ordering::SeqCst);
        self.log.record(format!("stop:{}", self.identifier));
        if self.fail_stop {
            return Err(StopError::component(self.describe(), "refused to stop"));
        }
        Ok(())
    }
}

/// Factory for [`RecordingController`]s
pub struct RecordingControllerFactory {
    log: EventLog,
    orchestrator: Weak<BuildControllers>,
    dependencies: HashMap<String, Vec<String>>,
    failing: HashSet<String>,
    created: Mutex<Vec<Arc<RecordingController>>>,
}

impl RecordingControllerFactory {
    pub fn new(log: EventLog, orchestrator: Weak<BuildControllers>) -> Self {
        Self {
            log,
            orchestrator,
            dependencies: HashMap::new(),
            failing: HashSet::new(),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Let `build` discover `dependency` on its first population
    pub fn with_dependency(mut self, build: &str, dependency: &str) -> Self {
        self.dependencies
            .entry(build.to_string())
            .or_default()
            .push(dependency.to_string());
        self
    }

    /// Make the controller of `build` fail to stop
    pub fn failing_stop(mut self, build: &str) -> Self {
        self.failing.insert(build.to_string());
        self
    }

    pub fn created(&self) -> Vec<Arc<RecordingController>> {
        self.created.lock().unwrap().clone()
    }

    pub fn controller(&self, name: &str) -> Arc<RecordingController> {
        self.created()
            .into_iter()
            .find(|controller| controller.identifier.name() == name)
            .expect("controller not created")
    }
}

impl BuildControllerFactory for RecordingControllerFactory {
    fn create_controller(&self, build: Arc<dyn IncludedBuildState>) -> Arc<dyn BuildController> {
        let name = build.name().to_string();
        self.log.record(format!("create:{name}"));
        let controller = Arc::new(RecordingController {
            identifier: BuildIdentifier::new(&name),
            log: self.log.clone(),
            dependencies: self
                .dependencies
                .get(&name)
                .map(|deps| deps.iter().map(BuildIdentifier::new).collect())
                .unwrap_or_default(),
            orchestrator: self.orchestrator.clone(),
            populated: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            fail_stop: self.failing.contains(&name),
            populate_calls: AtomicUsize::new(0),
        });
        self.created.lock().unwrap().push(Arc::clone(&controller));
        controller
    }
}

/// Work graph whose scheduling requests tasks from other builds
///
/// Requests for builds not yet in the registry register them as implicit
/// builds under `composite_root/<name>`.
pub struct ScriptedGraph {
    pub build: String,
    pub log: EventLog,
    pub orchestrator: Weak<BuildControllers>,
    pub requests: Vec<(String, String)>,
    pub composite_root: PathBuf,
    pub fail_execute: bool,
}

impl BuildWorkGraph for ScriptedGraph {
    fn schedule(&mut self, tasks: &[TaskPath]) -> anyhow::Result<()> {
        for task in tasks {
            self.log.record(format!("schedule:{}:{task}", self.build));
        }
        let orchestrator = self
            .orchestrator
            .upgrade()
            .ok_or_else(|| anyhow::anyhow!("orchestrator dropped"))?;
        for (build, task) in std::mem::take(&mut self.requests) {
            let identifier = BuildIdentifier::new(&build);
            if orchestrator.registry().get_build(&identifier).is_none() {
                let definition = BuildDefinition::new(self.composite_root.join(&build), &build);
                orchestrator.registry().add_implicit_build(&definition, &())?;
            }
            orchestrator
                .get_build_controller(&identifier)?
                .queue_for_execution(TaskPath::parse(&task));
        }
        Ok(())
    }

    fn execute(&mut self) -> anyhow::Result<()> {
        self.log.record(format!("execute:{}", self.build));
        if self.fail_execute {
            anyhow::bail!("task failed in build '{}'", self.build);
        }
        Ok(())
    }
}

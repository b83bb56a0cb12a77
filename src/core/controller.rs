//! Per-build execution controller
//!
//! A controller owns the progression of exactly one included build through
//! task graph discovery and task execution:
//!
//! ```text
//! Created -> Populating <-> Populated -> Executing -> Finished
//!            (any state) -> Stopped
//! ```
//!
//! Discovery runs on the orchestrator's thread; execution runs on the
//! controller's dedicated worker, a plain loop reading the build's work
//! queue.

use std::collections::BTreeSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::core::build_state::IncludedBuildState;
use crate::core::identity::{BuildIdentifier, TaskPath};
use crate::core::stoppable::Stoppable;
use crate::error::{BuildFailure, StopError};
use crate::infra::worker_pool::panic_message;

/// Lifecycle state of a build controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// No discovery has happened yet
    Created,
    /// Tasks are being added to the work graph
    Populating,
    /// The work graph holds every task requested so far
    Populated,
    /// The worker is executing the work graph
    Executing,
    /// Execution completed, successfully or not
    Finished,
    /// Stopped before or after execution
    Stopped,
}

impl ControllerState {
    /// Whether the controller no longer accepts discovery
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Executing | Self::Finished | Self::Stopped)
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Populating => "populating",
            Self::Populated => "populated",
            Self::Executing => "executing",
            Self::Finished => "finished",
            Self::Stopped => "stopped",
        };
        write!(f, "{name}")
    }
}

/// Job run once on the controller's dedicated worker
pub type BuildWorker = Box<dyn FnOnce() + Send + 'static>;

/// Drives one build through discovery and execution
pub trait BuildController: Stoppable + Send + Sync {
    /// Build this controller belongs to
    fn identifier(&self) -> &BuildIdentifier;

    /// Current lifecycle state
    fn state(&self) -> ControllerState;

    /// The worker loop, handed out once for submission to the worker pool
    fn take_worker(&self) -> Option<BuildWorker>;

    /// Request a task of this build
    fn queue_for_execution(&self, task: TaskPath);

    /// Advance discovery by one increment
    ///
    /// Returns whether new work was found since the previous call.
    fn populate_task_graph(&self) -> bool;

    /// Begin executing the work graph on the worker; never blocks
    fn start_task_execution(&self);

    /// Stop executing and discovering, waiting for in-flight execution
    fn stop_task_execution(&self);

    /// Wait for execution to end and report its outcome
    fn await_completion(&self) -> Result<(), BuildFailure>;
}

/// The task-level engine of one build
pub trait BuildWorkGraph: Send {
    /// Add tasks to the graph
    ///
    /// Scheduling may request tasks from other builds, which creates their
    /// controllers on demand.
    fn schedule(&mut self, tasks: &[TaskPath]) -> anyhow::Result<()>;

    /// Execute every scheduled task
    fn execute(&mut self) -> anyhow::Result<()>;
}

impl fmt::Debug for dyn BuildController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildController")
            .field("identifier", self.identifier())
            .field("state", &self.state())
            .finish()
    }
}

/// Creates the controller for a newly scheduled build
///
/// Called without any orchestrator lock held. Implementations may request
/// the controllers of other builds, but not the one being created.
pub trait BuildControllerFactory: Send + Sync {
    /// Create a controller bound to `build`
    fn create_controller(&self, build: Arc<dyn IncludedBuildState>) -> Arc<dyn BuildController>;
}

type WorkGraphFn = dyn Fn(&dyn IncludedBuildState) -> Box<dyn BuildWorkGraph> + Send + Sync;

/// Factory producing [`DefaultBuildController`]s
pub struct DefaultControllerFactory {
    work_graphs: Box<WorkGraphFn>,
}

impl DefaultControllerFactory {
    /// Create controllers whose work graph is built by `work_graphs`
    pub fn new<F>(work_graphs: F) -> Self
    where
        F: Fn(&dyn IncludedBuildState) -> Box<dyn BuildWorkGraph> + Send + Sync + 'static,
    {
        Self {
            work_graphs: Box::new(work_graphs),
        }
    }
}

impl BuildControllerFactory for DefaultControllerFactory {
    fn create_controller(&self, build: Arc<dyn IncludedBuildState>) -> Arc<dyn BuildController> {
        let graph = (self.work_graphs)(build.as_ref());
        Arc::new(DefaultBuildController::new(build, graph))
    }
}

impl fmt::Debug for DefaultControllerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultControllerFactory").finish_non_exhaustive()
    }
}

enum WorkItem {
    Execute,
    Stop,
}

struct Progress {
    state: ControllerState,
    queued: Vec<TaskPath>,
    scheduled: BTreeSet<TaskPath>,
    execution_pending: bool,
    execution_requested: bool,
    outcome: Option<Result<(), BuildFailure>>,
}

struct Shared {
    identifier: BuildIdentifier,
    progress: Mutex<Progress>,
    changed: Condvar,
    graph: Mutex<Box<dyn BuildWorkGraph>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_while_executing<'a>(&self, progress: MutexGuard<'a, Progress>) -> MutexGuard<'a, Progress> {
        self.changed
            .wait_while(progress, |p| {
                p.execution_pending || p.state == ControllerState::Executing
            })
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn execute(&self) {
        {
            let mut progress = self.lock();
            progress.execution_pending = false;
            if progress.state == ControllerState::Stopped {
                self.changed.notify_all();
                return;
            }
            if matches!(progress.outcome, Some(Err(_))) {
                debug!("Skipping execution of build '{}' after failed discovery", self.identifier);
                progress.state = ControllerState::Finished;
                self.changed.notify_all();
                return;
            }
            progress.state = ControllerState::Executing;
        }

        info!("Executing tasks of build '{}'", self.identifier);
        let result = {
            let mut graph = self.graph.lock().unwrap_or_else(PoisonError::into_inner);
            panic::catch_unwind(AssertUnwindSafe(|| graph.execute()))
        };
        let result = match result {
            Ok(outcome) => outcome.map_err(|e| format!("{e:#}")),
            Err(panic) => Err(format!("work graph panicked: {}", panic_message(panic.as_ref()))),
        }
        .map_err(|error| BuildFailure::Execution {
            build: self.identifier.to_string(),
            error,
        });
        if let Err(e) = &result {
            warn!("{e}");
        }

        let mut progress = self.lock();
        progress.outcome = Some(result);
        progress.state = ControllerState::Finished;
        self.changed.notify_all();
    }

    fn worker_exited(&self) {
        let mut progress = self.lock();
        progress.execution_pending = false;
        if progress.state != ControllerState::Finished {
            progress.state = ControllerState::Stopped;
        }
        self.changed.notify_all();
        debug!("Worker for build '{}' exited", self.identifier);
    }
}

fn run_worker(shared: &Shared, queue: &Receiver<WorkItem>) {
    for item in queue {
        match item {
            WorkItem::Execute => shared.execute(),
            WorkItem::Stop => break,
        }
    }
    shared.worker_exited();
}

/// Controller backed by a [`BuildWorkGraph`] and a per-build work queue
pub struct DefaultBuildController {
    shared: Arc<Shared>,
    queue: Mutex<Option<Sender<WorkItem>>>,
    worker: Mutex<Option<Receiver<WorkItem>>>,
}

impl DefaultBuildController {
    /// Create a controller for `build` using `graph` as its engine
    pub fn new(build: Arc<dyn IncludedBuildState>, graph: Box<dyn BuildWorkGraph>) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            shared: Arc::new(Shared {
                identifier: BuildIdentifier::new(build.name()),
                progress: Mutex::new(Progress {
                    state: ControllerState::Created,
                    queued: Vec::new(),
                    scheduled: BTreeSet::new(),
                    execution_pending: false,
                    execution_requested: false,
                    outcome: None,
                }),
                changed: Condvar::new(),
                graph: Mutex::new(graph),
            }),
            queue: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(rx)),
        }
    }

    /// Tasks added to the work graph so far
    pub fn scheduled_tasks(&self) -> Vec<TaskPath> {
        self.shared.lock().scheduled.iter().cloned().collect()
    }

    /// Close the work queue; the worker exits once it has drained it
    fn close_queue(&self) {
        let sender = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sender) = sender {
            // The worker is gone already if this fails.
            let _ = sender.send(WorkItem::Stop);
        }

        // A worker that was never submitted will not drain the queue.
        let unclaimed = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if unclaimed.is_some() {
            let mut progress = self.shared.lock();
            progress.execution_pending = false;
            self.shared.changed.notify_all();
        }
    }
}

impl BuildController for DefaultBuildController {
    fn identifier(&self) -> &BuildIdentifier {
        &self.shared.identifier
    }

    fn state(&self) -> ControllerState {
        self.shared.lock().state
    }

    fn take_worker(&self) -> Option<BuildWorker> {
        let queue = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        let shared = Arc::clone(&self.shared);
        Some(Box::new(move || run_worker(&shared, &queue)))
    }

    fn queue_for_execution(&self, task: TaskPath) {
        let mut progress = self.shared.lock();
        if progress.state.is_closed() {
            warn!(
                "Ignoring task '{task}' for build '{}': controller is {}",
                self.shared.identifier, progress.state
            );
            return;
        }
        if !progress.scheduled.contains(&task) && !progress.queued.contains(&task) {
            debug!("Queued task '{task}' of build '{}'", self.shared.identifier);
            progress.queued.push(task);
        }
    }

    fn populate_task_graph(&self) -> bool {
        let tasks = {
            let mut progress = self.shared.lock();
            if progress.state.is_closed() {
                return false;
            }
            let queued = std::mem::take(&mut progress.queued);
            let tasks: Vec<TaskPath> = queued
                .into_iter()
                .filter(|task| progress.scheduled.insert(task.clone()))
                .collect();
            if tasks.is_empty() {
                progress.state = ControllerState::Populated;
                return false;
            }
            progress.state = ControllerState::Populating;
            tasks
        };

        debug!(
            "Scheduling {} tasks into build '{}'",
            tasks.len(),
            self.shared.identifier
        );
        // The graph lock is held alone so scheduling can queue work here.
        let result = self
            .shared
            .graph
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .schedule(&tasks);

        let mut progress = self.shared.lock();
        if let Err(e) = result {
            let failure = BuildFailure::Schedule {
                build: self.shared.identifier.to_string(),
                error: format!("{e:#}"),
            };
            warn!("{failure}");
            progress.outcome.get_or_insert(Err(failure));
        }
        if progress.state == ControllerState::Populating {
            progress.state = ControllerState::Populated;
        }
        true
    }

    fn start_task_execution(&self) {
        let sender = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = sender.as_ref() else {
            debug!(
                "Not starting build '{}': work queue is closed",
                self.shared.identifier
            );
            return;
        };

        let mut progress = self.shared.lock();
        if progress.state.is_closed() {
            return;
        }
        progress.execution_requested = true;
        progress.execution_pending = true;
        if sender.send(WorkItem::Execute).is_err() {
            progress.execution_pending = false;
            progress.state = ControllerState::Stopped;
            progress.outcome = Some(Err(BuildFailure::WorkerLost {
                build: self.shared.identifier.to_string(),
            }));
            self.shared.changed.notify_all();
        }
    }

    fn stop_task_execution(&self) {
        self.close_queue();
        let progress = self.shared.lock();
        let mut progress = self.shared.wait_while_executing(progress);
        if progress.state != ControllerState::Finished {
            progress.state = ControllerState::Stopped;
        }
        progress.queued.clear();
        debug!(
            "Stopped task execution of build '{}' ({})",
            self.shared.identifier, progress.state
        );
    }

    fn await_completion(&self) -> Result<(), BuildFailure> {
        let progress = self.shared.lock();
        let progress = self.shared.wait_while_executing(progress);
        match &progress.outcome {
            Some(outcome) => outcome.clone(),
            None if progress.execution_requested
                && progress.state == ControllerState::Stopped =>
            {
                Err(BuildFailure::Stopped {
                    build: self.shared.identifier.to_string(),
                })
            }
            None => Ok(()),
        }
    }
}

impl Stoppable for DefaultBuildController {
    fn describe(&self) -> String {
        format!("build controller '{}'", self.shared.identifier)
    }

    fn stop(&self) -> Result<(), StopError> {
        self.close_queue();
        let mut progress = self.shared.lock();
        if !matches!(
            progress.state,
            ControllerState::Executing | ControllerState::Finished
        ) {
            progress.state = ControllerState::Stopped;
        }
        self.shared.changed.notify_all();
        Ok(())
    }
}

impl fmt::Debug for DefaultBuildController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultBuildController")
            .field("build", &self.shared.identifier)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

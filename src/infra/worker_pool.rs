//! Named worker pool
//!
//! Runs each submitted job on its own dedicated thread. Threads are named
//! `<pool> #<n>` so they can be told apart in thread dumps and logs.

use std::any::Any;
use std::sync::{Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::core::stoppable::Stoppable;
use crate::error::{StopError, WorkerPoolError};

struct Worker {
    label: String,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct PoolState {
    workers: Vec<Worker>,
    panics: Vec<StopError>,
    spawned: usize,
    stopped: bool,
}

impl PoolState {
    /// Join workers whose thread has ended, keeping their panics for `stop`
    fn reap_finished(&mut self) {
        let (finished, running): (Vec<Worker>, Vec<Worker>) = std::mem::take(&mut self.workers)
            .into_iter()
            .partition(|worker| worker.handle.is_finished());
        self.workers = running;
        for worker in finished {
            if let Some(failure) = worker.join() {
                self.panics.push(failure);
            }
        }
    }
}

impl Worker {
    fn join(self) -> Option<StopError> {
        let panic = self.handle.join().err()?;
        let message = panic_message(panic.as_ref());
        warn!("Worker '{}' panicked: {message}", self.label);
        Some(StopError::component(
            format!("worker '{}'", self.label),
            format!("panicked: {message}"),
        ))
    }
}

/// Thread-per-job pool
pub struct WorkerPool {
    name: String,
    stack_size: Option<usize>,
    state: Mutex<PoolState>,
}

impl WorkerPool {
    /// Create a pool whose threads are named after `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stack_size: None,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Set the stack size of worker threads
    #[must_use]
    pub fn with_stack_size(mut self, stack_size: Option<usize>) -> Self {
        self.stack_size = stack_size;
        self
    }

    /// Pool name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `job` on a new dedicated thread
    ///
    /// `label` identifies the job in teardown errors.
    pub fn submit<F>(&self, label: &str, job: F) -> Result<(), WorkerPoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.lock();
        if state.stopped {
            return Err(WorkerPoolError::Stopped {
                pool: self.name.clone(),
            });
        }

        state.reap_finished();
        state.spawned += 1;
        let mut builder = thread::Builder::new().name(format!("{} #{}", self.name, state.spawned));
        if let Some(stack_size) = self.stack_size {
            builder = builder.stack_size(stack_size);
        }
        let handle = builder.spawn(job).map_err(|e| WorkerPoolError::Spawn {
            pool: self.name.clone(),
            error: e.to_string(),
        })?;

        debug!("Submitted '{label}' to worker pool '{}'", self.name);
        state.workers.push(Worker {
            label: label.to_string(),
            handle,
        });
        Ok(())
    }

    /// Number of jobs whose thread is still running
    pub fn active_workers(&self) -> usize {
        self.lock()
            .workers
            .iter()
            .filter(|worker| !worker.handle.is_finished())
            .count()
    }

    /// Whether the pool has been stopped
    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Stoppable for WorkerPool {
    fn describe(&self) -> String {
        format!("worker pool '{}'", self.name)
    }

    /// Refuse new jobs and wait for every worker thread to end
    ///
    /// Jobs must already have been told to finish; panicked jobs, including
    /// those reaped earlier, are reported after all threads were joined.
    fn stop(&self) -> Result<(), StopError> {
        let (workers, mut failures) = {
            let mut state = self.lock();
            state.stopped = true;
            (
                std::mem::take(&mut state.workers),
                std::mem::take(&mut state.panics),
            )
        };

        debug!(
            "Stopping worker pool '{}' ({} workers)",
            self.name,
            workers.len()
        );
        failures.extend(workers.into_iter().filter_map(Worker::join));
        StopError::from_failures(failures)
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.name)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

/// Text of a caught panic payload
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

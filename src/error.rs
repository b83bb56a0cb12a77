//! Error types for buildtree
//!
//! Domain-specific error types using thiserror.

use std::path::PathBuf;
use thiserror::Error;

/// Build registry errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Two included builds share a name
    #[error("Included build '{name}' is not unique in composite.")]
    NotUnique { name: String },

    /// Included build is named like the root project
    #[error("Included build '{name}' collides with root project name.")]
    CollidesWithRootProject { name: String },

    /// Included build is named like an existing subproject
    #[error("Included build '{name}' collides with subproject of the same name.")]
    CollidesWithSubproject { name: String },

    /// Explicit builds were already validated for this tree
    #[error("Explicit included builds have already been validated")]
    AlreadyValidated,

    /// The build factory could not create the build
    #[error("Failed to create included build '{name}' at '{}': {error}", root_dir.display())]
    CreateFailed {
        name: String,
        root_dir: PathBuf,
        error: String,
    },

    /// Project path registration failed
    #[error("Project registration failed: {0}")]
    ProjectPath(#[from] ProjectPathError),
}

/// Project path namespace errors
#[derive(Error, Debug)]
pub enum ProjectPathError {
    /// Identity path already owned by another build
    #[error("Project path '{path}' of build '{build}' is already registered by build '{existing}'")]
    Duplicate {
        path: String,
        existing: String,
        build: String,
    },
}

/// Build controller errors
#[derive(Error, Debug)]
pub enum ControllerError {
    /// No build with this identifier has been registered
    #[error("Build '{build}' is not registered in this build tree")]
    BuildNotRegistered { build: String },

    /// The controller was requested while its own creation was in progress
    #[error("Controller for build '{build}' was requested while being created")]
    CreationCycle { build: String },

    /// The controller's worker could not be started
    #[error("Failed to start worker for build '{build}': {source}")]
    Worker {
        build: String,
        source: WorkerPoolError,
    },
}

/// Worker pool errors
#[derive(Error, Debug)]
pub enum WorkerPoolError {
    /// The pool no longer accepts work
    #[error("Worker pool '{pool}' has been stopped")]
    Stopped { pool: String },

    /// The operating system refused to create a thread
    #[error("Failed to spawn thread in worker pool '{pool}': {error}")]
    Spawn { pool: String, error: String },
}

/// Teardown errors
///
/// Produced only after every component had its chance to stop.
#[derive(Error, Debug)]
pub enum StopError {
    /// A single component failed to stop
    #[error("Failed to stop {component}: {error}")]
    Component { component: String, error: String },

    /// More than one component failed to stop
    #[error("{} components failed to stop: {}", failures.len(), join_failures(failures))]
    Aggregate { failures: Vec<StopError> },
}

impl StopError {
    /// Create a failure for a named component
    pub fn component(component: impl Into<String>, error: impl ToString) -> Self {
        Self::Component {
            component: component.into(),
            error: error.to_string(),
        }
    }

    /// Collapse collected failures: none is success, one is rethrown as-is
    pub fn from_failures(mut failures: Vec<StopError>) -> Result<(), StopError> {
        match failures.len() {
            0 => Ok(()),
            1 => Err(failures.remove(0)),
            _ => Err(Self::Aggregate { failures }),
        }
    }

    /// Number of individual component failures
    pub fn failure_count(&self) -> usize {
        match self {
            Self::Component { .. } => 1,
            Self::Aggregate { failures } => failures.iter().map(Self::failure_count).sum(),
        }
    }
}

fn join_failures(failures: &[StopError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure inside one build's task graph or task execution
///
/// Reported through the controller's own result channel.
#[derive(Error, Debug, Clone)]
pub enum BuildFailure {
    /// Scheduling tasks into the work graph failed
    #[error("Failed to schedule tasks for build '{build}': {error}")]
    Schedule { build: String, error: String },

    /// Executing the work graph failed
    #[error("Execution failed for build '{build}': {error}")]
    Execution { build: String, error: String },

    /// The controller was stopped before it finished
    #[error("Build '{build}' was stopped before completion")]
    Stopped { build: String },

    /// The worker thread ended without reporting an outcome
    #[error("Worker for build '{build}' exited unexpectedly")]
    WorkerLost { build: String },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file '{path}': {error}")]
    ReadError { path: String, error: String },

    /// Failed to parse config file
    #[error("Failed to parse config file '{path}': {error}")]
    ParseError { path: String, error: String },
}

/// Top-level buildtree error type
#[derive(Error, Debug)]
pub enum BuildTreeError {
    /// Registry error
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Controller error
    #[error("Controller error: {0}")]
    Controller(#[from] ControllerError),

    /// Teardown error
    #[error("Stop error: {0}")]
    Stop(#[from] StopError),

    /// Build failure
    #[error("Build failed: {0}")]
    Build(#[from] BuildFailure),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_unique_message_names_build() {
        let err = RegistryError::NotUnique {
            name: "lib".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Included build 'lib' is not unique in composite."
        );
    }

    #[test]
    fn test_from_failures_empty_is_ok() {
        assert!(StopError::from_failures(Vec::new()).is_ok());
    }

    #[test]
    fn test_from_failures_single_is_rethrown() {
        let result = StopError::from_failures(vec![StopError::component("a", "boom")]);
        match result {
            Err(StopError::Component { component, error }) => {
                assert_eq!(component, "a");
                assert_eq!(error, "boom");
            }
            other => panic!("Expected single component failure, got {other:?}"),
        }
    }

    #[test]
    fn test_from_failures_many_are_aggregated() {
        let err = StopError::from_failures(vec![
            StopError::component("a", "boom"),
            StopError::component("b", "bang"),
        ])
        .unwrap_err();

        assert_eq!(err.failure_count(), 2);
        let message = err.to_string();
        assert!(message.contains("2 components failed to stop"));
        assert!(message.contains("boom"));
        assert!(message.contains("bang"));
    }
}

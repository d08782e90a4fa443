//! Engine errors.

/// Structural errors from the execution engine.
///
/// Handler failures are not errors at this level; they come back as a
/// failed `TaskResult`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
  /// Called before `initialize()` or after `shutdown()`.
  #[error("execution engine is not running")]
  NotStarted,

  /// `initialize()` called on an engine that was already shut down.
  #[error("execution engine has been shut down")]
  ShutDown,

  /// No handler registered under this task name.
  #[error("unknown task '{task_name}'")]
  UnknownTask { task_name: String },

  /// The same task name appears more than once in one stage.
  #[error("task '{task_name}' appears more than once in stage {stage}")]
  DuplicateStageTask { stage: usize, task_name: String },
}

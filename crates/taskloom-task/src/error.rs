use thiserror::Error;

/// Errors raised by a task handler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
  /// The context did not contain what the handler needs.
  #[error("invalid input: {message}")]
  InvalidInput { message: String },

  /// The handler ran and failed.
  #[error("{message}")]
  Failed { message: String },

  /// The handler panicked while running.
  #[error("handler panicked: {message}")]
  Panicked { message: String },
}

impl TaskError {
  pub fn invalid_input(message: impl Into<String>) -> Self {
    Self::InvalidInput {
      message: message.into(),
    }
  }

  pub fn failed(message: impl Into<String>) -> Self {
    Self::Failed {
      message: message.into(),
    }
  }

  /// Build a `Panicked` error from a caught panic payload.
  pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
      (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
      s.clone()
    } else {
      "unknown panic payload".to_string()
    };
    Self::Panicked { message }
  }
}

//! Taskloom Config
//!
//! This crate contains the serializable configuration types for taskloom.
//! They describe workflows before handlers are resolved, and the tuning
//! knobs for the execution engine and workflow runner.
//!
//! Configuration can be loaded from JSON files (via the CLI with
//! `--config=engine.json`) or built in code. Every field has a default, so
//! partial documents are accepted.

mod engine;
mod error;
mod runner;
mod workflow;

use std::path::Path;

use serde::de::DeserializeOwned;

pub use engine::{BatchConfig, CacheConfig, EngineConfig, PoolConfig};
pub use error::ConfigError;
pub use runner::RunnerConfig;
pub use workflow::{NodeDef, WorkflowDef};

/// Load any configuration document from a JSON file.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
  let path = path.as_ref();
  let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
    path: path.display().to_string(),
    source,
  })?;
  serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
    path: path.display().to_string(),
    source,
  })
}

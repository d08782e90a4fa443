//! Workflow runtime for taskloom.
//!
//! # Architecture
//!
//! ```text
//! WorkflowRunner
//! ├── create_workflow(def)  - validate, resolve handlers, register
//! ├── execute(id, input)    - wave loop over the ready set
//! └── execution(id)         - terminal records kept in bounded history
//!
//! ToolNode
//! └── run(input)            - ExecutionEngine::execute for the node's task
//! ```
//!
//! Each wave dispatches every node whose dependencies have completed, one
//! tokio task per node, and waits for all of them before computing the next
//! wave. A failure stops new waves (unless `continue_on_failure` is set) and
//! nodes that never ran end up `Skipped`.
//!
//! # Usage
//!
//! ```ignore
//! let runner = WorkflowRunner::new(RunnerConfig::default(), registry);
//! runner.create_workflow(def)?;
//! let execution = runner.execute("report", json!({"ticker": "ACME"})).await?;
//! ```

mod error;
mod events;
mod execution;
mod runner;
mod tool;

pub use error::RuntimeError;
pub use events::{ChannelNotifier, EventEnvelope, ExecutionEvent, ExecutionNotifier, NoopNotifier};
pub use execution::{ExecutionStatus, NodeState, NodeStatus, WorkflowExecution};
pub use runner::WorkflowRunner;
pub use tool::{TASK_KEY, ToolNode, USE_CACHE_KEY};

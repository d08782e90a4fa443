//! Taskloom Task
//!
//! The contract between the execution core and the work it runs. A task is
//! any [`TaskHandler`] registered under a name in a [`HandlerRegistry`]; the
//! core never looks inside the context it passes or the data it gets back.

mod error;
mod handler;
mod registry;
mod result;

pub use error::TaskError;
pub use handler::{TaskFn, TaskHandler, task_fn};
pub use registry::{HandlerRegistry, TaskRegistry};
pub use result::TaskResult;

//! Taskloom Executor
//!
//! Runs named tasks from a [`TaskRegistry`](taskloom_task::TaskRegistry).
//!
//! - [`WorkerPool`]: fixed workers over a bounded queue, for single calls
//! - [`BatchCoalescer`]: groups calls arriving close together by task name
//! - [`ExecutionEngine`]: the façade that consults the result cache, routes
//!   to the pool or the coalescer, and writes successful results back
//!
//! ```ignore
//! let engine = ExecutionEngine::new(EngineConfig::default(), registry);
//! engine.initialize()?;
//! let result = engine.execute("quote", json!({"symbol": "ACME"}), true).await?;
//! engine.shutdown().await;
//! ```

mod coalescer;
mod engine;
mod error;
mod invocation;
mod pool;

pub use coalescer::{BatchCoalescer, CoalescerStats};
pub use engine::{EngineStats, ExecutionEngine, STAGE_RESULTS_KEY, StagedResult, TaskRequest};
pub use error::EngineError;
pub use invocation::InvocationHandle;
pub use pool::{PoolStats, WorkerPool};

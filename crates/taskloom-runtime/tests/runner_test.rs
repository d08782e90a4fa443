//! Integration tests for WorkflowRunner execution semantics.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};
use taskloom_config::{NodeDef, RunnerConfig, WorkflowDef};
use taskloom_runtime::{
  ChannelNotifier, ExecutionEvent, ExecutionStatus, NodeStatus, RuntimeError, WorkflowRunner,
};
use taskloom_task::TaskError;
use taskloom_workflow::{NodeRegistry, node_fn};

type Log = Arc<Mutex<Vec<String>>>;

/// Node kinds used across tests:
/// - `const`: returns `metadata.value`
/// - `sum`: adds up the numeric results of its dependencies
/// - `fail`: always errors
/// - `explode`: panics
/// - `slow`: sleeps `metadata.ms`, then returns its node id
/// - `logged`: records start/end in the shared log
fn registry(log: Log) -> NodeRegistry {
  NodeRegistry::new()
    .with(
      "const",
      node_fn(|input| async move { Ok(input.metadata.get("value").cloned().unwrap_or(Value::Null)) }),
    )
    .with(
      "sum",
      node_fn(|input| async move {
        let total: i64 = input.upstream().values().filter_map(Value::as_i64).sum();
        Ok(json!(total))
      }),
    )
    .with(
      "fail",
      node_fn(|_| async { Err(TaskError::failed("quota exceeded")) }),
    )
    .with(
      "explode",
      node_fn(|input| async move {
        if input.metadata.is_empty() {
          panic!("node blew up");
        }
        Ok(Value::Null)
      }),
    )
    .with(
      "slow",
      node_fn(|input| async move {
        let ms = input.metadata.get("ms").and_then(Value::as_u64).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(json!(input.node_id))
      }),
    )
    .with(
      "logged",
      node_fn(move |input| {
        let log = log.clone();
        async move {
          log.lock().unwrap().push(format!("start:{}", input.node_id));
          tokio::time::sleep(Duration::from_millis(5)).await;
          log.lock().unwrap().push(format!("end:{}", input.node_id));
          Ok(json!(input.node_id))
        }
      }),
    )
}

fn runner(config: RunnerConfig) -> WorkflowRunner {
  WorkflowRunner::new(config, registry(Log::default()))
}

fn workflow(id: &str, nodes: Vec<NodeDef>) -> WorkflowDef {
  WorkflowDef {
    workflow_id: id.to_string(),
    name: String::new(),
    nodes,
  }
}

fn constant(id: &str, value: Value) -> NodeDef {
  NodeDef::new(id, "const").with_metadata("value", value)
}

#[tokio::test]
async fn test_results_flow_to_dependents() {
  let runner = runner(RunnerConfig::default());
  runner
    .create_workflow(workflow(
      "add",
      vec![
        constant("a", json!(1)),
        constant("b", json!(2)),
        NodeDef::new("c", "sum").depends_on(["a", "b"]),
      ],
    ))
    .unwrap();

  let execution = runner.execute("add", json!({})).await.unwrap();

  assert_eq!(execution.status, ExecutionStatus::Completed);
  assert_eq!(execution.results["a"], json!(1));
  assert_eq!(execution.results["b"], json!(2));
  assert_eq!(execution.results["c"], json!(3));
  assert!(execution.completed_at.is_some());
  assert_eq!(
    execution.nodes_with_status(NodeStatus::Completed),
    vec!["a", "b", "c"]
  );

  let stored = runner.execution(&execution.execution_id).unwrap();
  assert_eq!(stored, execution);
}

#[tokio::test]
async fn test_handlers_see_input_and_metadata() {
  let registry = NodeRegistry::new()
    .with(
      "first",
      node_fn(|input| async move { Ok(json!({"greeting": input.context.input["name"]})) }),
    )
    .with(
      "second",
      node_fn(|input| async move {
        Ok(json!({
          "name": input.name,
          "seen": input.context.result("first").cloned(),
          "unit": input.metadata.get("unit").cloned(),
        }))
      }),
    );
  let runner = WorkflowRunner::new(RunnerConfig::default(), registry);
  let mut second = NodeDef::new("second", "second")
    .depends_on(["first"])
    .with_metadata("unit", json!("usd"));
  second.name = "Second Step".to_string();
  runner
    .create_workflow(workflow("ctx", vec![NodeDef::new("first", "first"), second]))
    .unwrap();

  let execution = runner.execute("ctx", json!({"name": "ada"})).await.unwrap();
  assert_eq!(
    execution.results["second"],
    json!({"name": "Second Step", "seen": {"greeting": "ada"}, "unit": "usd"})
  );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dependencies_finish_before_dependents_start() {
  let log = Log::default();
  let runner = WorkflowRunner::new(RunnerConfig::default(), registry(log.clone()));
  runner
    .create_workflow(workflow(
      "diamond",
      vec![
        NodeDef::new("a", "logged"),
        NodeDef::new("b", "logged").depends_on(["a"]),
        NodeDef::new("c", "logged").depends_on(["a"]),
        NodeDef::new("d", "logged").depends_on(["b", "c"]),
      ],
    ))
    .unwrap();

  runner.execute("diamond", Value::Null).await.unwrap();

  let log = log.lock().unwrap().clone();
  let position = |entry: &str| log.iter().position(|e| e == entry).unwrap();
  for (dependency, dependent) in [("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")] {
    assert!(
      position(&format!("end:{}", dependency)) < position(&format!("start:{}", dependent)),
      "{} started before {} finished: {:?}",
      dependent,
      dependency,
      log
    );
  }
}

#[tokio::test]
async fn test_failure_skips_dependents() {
  let runner = runner(RunnerConfig::default());
  runner
    .create_workflow(workflow(
      "broken",
      vec![
        NodeDef::new("a", "fail"),
        constant("b", json!(2)).depends_on(["a"]),
      ],
    ))
    .unwrap();

  let err = runner.execute("broken", json!({})).await.unwrap_err();
  let (node_id, error, execution) = match err {
    RuntimeError::NodeFailed {
      node_id,
      error,
      execution,
    } => (node_id, error, execution),
    other => panic!("expected NodeFailed, got {:?}", other),
  };

  assert_eq!(node_id, "a");
  assert!(error.contains("quota exceeded"));
  assert_eq!(execution.status, ExecutionStatus::Failed);
  assert_eq!(execution.node_status("a"), Some(NodeStatus::Failed));
  assert!(!execution.nodes["a"].error.as_deref().unwrap_or("").is_empty());
  assert_eq!(execution.node_status("b"), Some(NodeStatus::Skipped));
  assert!(!execution.results.contains_key("b"));

  let stored = runner.execution(&execution.execution_id).unwrap();
  assert_eq!(stored.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn test_failure_stops_later_waves() {
  let runner = runner(RunnerConfig::default());
  runner
    .create_workflow(workflow(
      "halt",
      vec![
        NodeDef::new("a", "fail"),
        constant("b", json!(1)),
        constant("c", json!(2)).depends_on(["b"]),
      ],
    ))
    .unwrap();

  let err = runner.execute("halt", json!({})).await.unwrap_err();
  let execution = err.execution().unwrap();

  // b shared the failing wave, c would have been the next one.
  assert_eq!(execution.node_status("b"), Some(NodeStatus::Completed));
  assert_eq!(execution.node_status("c"), Some(NodeStatus::Skipped));
  assert_eq!(execution.results["b"], json!(1));
}

#[tokio::test]
async fn test_continue_on_failure_runs_independent_branches() {
  let runner = runner(RunnerConfig {
    continue_on_failure: true,
    ..RunnerConfig::default()
  });
  runner
    .create_workflow(workflow(
      "branches",
      vec![
        NodeDef::new("a", "fail"),
        constant("b", json!(1)),
        constant("c", json!(2)).depends_on(["a"]),
        constant("d", json!(3)).depends_on(["c"]),
        constant("e", json!(4)).depends_on(["b"]),
      ],
    ))
    .unwrap();

  let err = runner.execute("branches", json!({})).await.unwrap_err();
  assert!(matches!(err, RuntimeError::NodeFailed { ref node_id, .. } if node_id == "a"));

  let execution = err.execution().unwrap();
  assert_eq!(execution.status, ExecutionStatus::Failed);
  assert_eq!(execution.results["e"], json!(4));
  assert_eq!(
    execution.nodes_with_status(NodeStatus::Skipped),
    vec!["c", "d"]
  );
}

#[tokio::test]
async fn test_panic_fails_node() {
  let runner = runner(RunnerConfig::default());
  runner
    .create_workflow(workflow("boom", vec![NodeDef::new("a", "explode")]))
    .unwrap();

  let err = runner.execute("boom", json!({})).await.unwrap_err();
  match err {
    RuntimeError::NodeFailed { error, .. } => assert!(error.contains("node blew up")),
    other => panic!("expected NodeFailed, got {:?}", other),
  }
}

#[tokio::test]
async fn test_cycle_is_unresolvable() {
  let runner = runner(RunnerConfig::default());
  runner
    .create_workflow(workflow(
      "loop",
      vec![
        constant("start", json!(0)),
        constant("a", json!(1)).depends_on(["start", "b"]),
        constant("b", json!(2)).depends_on(["a"]),
      ],
    ))
    .unwrap();

  let err = runner.execute("loop", json!({})).await.unwrap_err();
  let (blocked, execution) = match err {
    RuntimeError::UnresolvableGraph { blocked, execution } => (blocked, execution),
    other => panic!("expected UnresolvableGraph, got {:?}", other),
  };

  assert_eq!(blocked, vec!["a", "b"]);
  assert_eq!(execution.status, ExecutionStatus::Failed);
  assert_eq!(execution.results["start"], json!(0));
  assert_eq!(execution.node_status("a"), Some(NodeStatus::Skipped));
  assert_eq!(execution.node_status("b"), Some(NodeStatus::Skipped));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_aborts_wave() {
  let runner = runner(RunnerConfig {
    timeout_ms: Some(100),
    ..RunnerConfig::default()
  });
  runner
    .create_workflow(workflow(
      "stuck",
      vec![
        NodeDef::new("fast", "slow").with_metadata("ms", json!(10)),
        NodeDef::new("hang", "slow").with_metadata("ms", json!(60_000)),
        NodeDef::new("after", "slow").depends_on(["fast"]),
      ],
    ))
    .unwrap();

  let err = runner.execute("stuck", json!({})).await.unwrap_err();
  let (timeout_ms, execution) = match err {
    RuntimeError::TimedOut {
      timeout_ms,
      execution,
    } => (timeout_ms, execution),
    other => panic!("expected TimedOut, got {:?}", other),
  };

  assert_eq!(timeout_ms, 100);
  assert_eq!(execution.node_status("hang"), Some(NodeStatus::Failed));
  assert!(execution.nodes["hang"].error.as_deref().unwrap().contains("timed out"));
  assert_eq!(execution.node_status("after"), Some(NodeStatus::Skipped));
}

#[tokio::test]
async fn test_unknown_workflow() {
  let runner = runner(RunnerConfig::default());
  let err = runner.execute("missing", json!({})).await.unwrap_err();
  assert!(matches!(err, RuntimeError::WorkflowNotFound { .. }));
  assert!(err.execution().is_none());
}

#[tokio::test]
async fn test_registry_operations() {
  let runner = runner(RunnerConfig::default());

  let err = runner
    .create_workflow(workflow("bad", vec![constant("a", json!(1)).depends_on(["nope"])]))
    .unwrap_err();
  assert!(matches!(err, RuntimeError::InvalidWorkflow(_)));
  assert!(runner.workflow("bad").is_none());

  runner
    .create_workflow(workflow("two", vec![constant("x", json!(1))]))
    .unwrap();
  runner
    .create_workflow(workflow("one", vec![constant("x", json!(1))]))
    .unwrap();
  // Replaces the earlier definition.
  runner
    .create_workflow(workflow("one", vec![constant("x", json!(5))]))
    .unwrap();

  assert_eq!(runner.workflow_ids(), vec!["one", "two"]);
  let execution = runner.execute("one", json!({})).await.unwrap();
  assert_eq!(execution.results["x"], json!(5));

  assert!(runner.remove_workflow("two").is_some());
  assert!(runner.remove_workflow("two").is_none());
  assert_eq!(runner.workflow_ids(), vec!["one"]);
}

#[tokio::test]
async fn test_history_is_bounded() {
  let runner = runner(RunnerConfig {
    history_limit: 2,
    ..RunnerConfig::default()
  });
  runner
    .create_workflow(workflow("tiny", vec![constant("x", json!(1))]))
    .unwrap();

  let first = runner.execute("tiny", json!({})).await.unwrap();
  runner.execute("tiny", json!({})).await.unwrap();
  let third = runner.execute("tiny", json!({})).await.unwrap();

  assert_eq!(runner.executions().len(), 2);
  assert!(runner.execution(&first.execution_id).is_none());
  assert!(runner.execution(&third.execution_id).is_some());
}

#[tokio::test]
async fn test_events_in_order() {
  let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
  let runner = WorkflowRunner::with_notifier(
    RunnerConfig::default(),
    registry(Log::default()),
    ChannelNotifier::new(tx),
  );
  runner
    .create_workflow(workflow(
      "events",
      vec![
        NodeDef::new("a", "fail"),
        constant("b", json!(1)).depends_on(["a"]),
      ],
    ))
    .unwrap();

  let err = runner.execute("events", json!({})).await.unwrap_err();
  let execution_id = err.execution().unwrap().execution_id.clone();

  let mut kinds = Vec::new();
  while let Ok(envelope) = rx.try_recv() {
    assert_eq!(envelope.event.execution_id(), execution_id);
    kinds.push(match envelope.event {
      ExecutionEvent::WorkflowStarted { .. } => "workflow_started",
      ExecutionEvent::WaveStarted { .. } => "wave_started",
      ExecutionEvent::NodeStarted { .. } => "node_started",
      ExecutionEvent::NodeCompleted { .. } => "node_completed",
      ExecutionEvent::NodeFailed { .. } => "node_failed",
      ExecutionEvent::NodeSkipped { .. } => "node_skipped",
      ExecutionEvent::WorkflowCompleted { .. } => "workflow_completed",
      ExecutionEvent::WorkflowFailed { .. } => "workflow_failed",
    });
  }

  assert_eq!(
    kinds,
    vec![
      "workflow_started",
      "wave_started",
      "node_started",
      "node_failed",
      "node_skipped",
      "workflow_failed",
    ]
  );
}

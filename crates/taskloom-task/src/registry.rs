use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::handler::TaskHandler;

/// Maps string keys to shared handlers.
///
/// Generic over the handler trait object so the same registry type serves
/// task handlers here and node handlers in `taskloom-workflow`. Lookups
/// happen when a workflow is created or a task is submitted, never later.
pub struct HandlerRegistry<H: ?Sized> {
  handlers: HashMap<String, Arc<H>>,
}

/// Registry of task handlers keyed by task name.
pub type TaskRegistry = HandlerRegistry<dyn TaskHandler>;

impl<H: ?Sized> HandlerRegistry<H> {
  pub fn new() -> Self {
    Self {
      handlers: HashMap::new(),
    }
  }

  /// Register a handler, returning the one it replaced.
  pub fn register(&mut self, name: impl Into<String>, handler: Arc<H>) -> Option<Arc<H>> {
    self.handlers.insert(name.into(), handler)
  }

  /// Builder form of [`register`](Self::register).
  pub fn with(mut self, name: impl Into<String>, handler: Arc<H>) -> Self {
    self.register(name, handler);
    self
  }

  pub fn get(&self, name: &str) -> Option<Arc<H>> {
    self.handlers.get(name).cloned()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.handlers.contains_key(name)
  }

  /// Registered names, sorted.
  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.handlers.keys().cloned().collect();
    names.sort();
    names
  }

  pub fn len(&self) -> usize {
    self.handlers.len()
  }

  pub fn is_empty(&self) -> bool {
    self.handlers.is_empty()
  }
}

impl<H: ?Sized> Default for HandlerRegistry<H> {
  fn default() -> Self {
    Self::new()
  }
}

impl<H: ?Sized> Clone for HandlerRegistry<H> {
  fn clone(&self) -> Self {
    Self {
      handlers: self.handlers.clone(),
    }
  }
}

impl<H: ?Sized> fmt::Debug for HandlerRegistry<H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HandlerRegistry")
      .field("handlers", &self.names())
      .finish()
  }
}

//! Task registry.
//!
//! Maps task names to implementations. Built once at startup by calling each
//! task module's `register` function in order, then read-only.

use std::collections::BTreeMap;
use std::sync::Arc;
use taskbus_config::ConfigurationError;

use crate::task::Task;

/// Task name to implementation mapping.
#[derive(Default, Clone)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, Arc<dyn Task>>,
}

impl TaskRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `task` under `name`.
    ///
    /// A name can only be taken once; the first registration stays in place.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        task: Arc<dyn Task>,
    ) -> Result<(), ConfigurationError> {
        let name = name.into();
        if self.tasks.contains_key(&name) {
            return Err(ConfigurationError::DuplicateRegistration { kind: "task", name });
        }
        tracing::debug!(task = %name, "Registered task");
        self.tasks.insert(name, task);
        Ok(())
    }

    /// All registered tasks, by name.
    pub fn tasks(&self) -> &BTreeMap<String, Arc<dyn Task>> {
        &self.tasks
    }

    /// Registered task names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }

    /// Task registered under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Task>> {
        self.tasks.get(name).cloned()
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Allow-list naming every registered task, suitable as a CLI default.
    pub fn default_allow_spec(&self) -> String {
        self.names().join(",")
    }

    /// Tasks selected by a comma-separated allow-list.
    ///
    /// Names are trimmed. An empty or blank list selects every task. Unknown
    /// names are logged and skipped. The result follows registry order and
    /// holds each task at most once.
    pub fn allowed(&self, allow_spec: &str) -> Vec<(String, Arc<dyn Task>)> {
        let requested: Vec<&str> = allow_spec
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .collect();

        if requested.is_empty() {
            return self
                .tasks
                .iter()
                .map(|(name, task)| (name.clone(), Arc::clone(task)))
                .collect();
        }

        for name in &requested {
            if !self.tasks.contains_key(*name) {
                tracing::warn!(task = %name, available = ?self.names(), "Unknown task in allow-list");
            }
        }

        self.tasks
            .iter()
            .filter(|(name, _)| requested.contains(&name.as_str()))
            .map(|(name, task)| (name.clone(), Arc::clone(task)))
            .collect()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}

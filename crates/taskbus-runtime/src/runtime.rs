//! Activation: build the bus, then start every allowed task under supervision.
//!
//! Configuration layout:
//!
//! ```json
//! {
//!   "bus":        { "adapter": "memory", "backlog_warn": 1024 },
//!   "logger":     { "level": "info", "format": "text" },
//!   "supervisor": { "retry": 3, "delay_ms": 1000 },
//!   "timer":      { "interval": 10, "supervisor": { "retry": 0 } }
//! }
//! ```
//!
//! Each task gets the section named after it. A task's own `supervisor`
//! block overrides the global one key by key.

use std::collections::BTreeMap;
use std::sync::Arc;
use taskbus_config::{ConfigSection, ConfigurationError};
use taskbus_events::{AdapterRegistry, EventBus};
use tokio::task::JoinHandle;

use crate::context::Context;
use crate::error::{RuntimeError, TaskError};
use crate::registry::TaskRegistry;
use crate::supervisor::{safe_run, SafeParams, TaskOutcome};
use crate::task::Task;

/// Config section holding the bus settings.
pub const BUS_SECTION: &str = "bus";

/// Config section holding the global supervisor settings.
pub const SUPERVISOR_SECTION: &str = "supervisor";

/// Config section read by [`crate::logging::init`].
pub const LOGGER_SECTION: &str = "logger";

/// Everything needed to start tasks: configuration and both registries.
#[derive(Debug)]
pub struct Runtime {
    config: ConfigSection,
    adapters: AdapterRegistry,
    tasks: TaskRegistry,
}

impl Runtime {
    /// Create a runtime.
    pub fn new(config: ConfigSection, adapters: AdapterRegistry, tasks: TaskRegistry) -> Self {
        Self {
            config,
            adapters,
            tasks,
        }
    }

    /// Root configuration.
    pub fn config(&self) -> &ConfigSection {
        &self.config
    }

    /// Registered bus adapter names.
    pub fn list_adapters(&self) -> Vec<String> {
        self.adapters.names()
    }

    /// Registered tasks, by name.
    pub fn list_tasks(&self) -> &BTreeMap<String, Arc<dyn Task>> {
        self.tasks.tasks()
    }

    /// Supervisor parameters for `task`: the global section, then the task's own.
    pub fn supervisor_params(&self, task: &str) -> Result<SafeParams, ConfigurationError> {
        SafeParams::from_config(&self.config.get(SUPERVISOR_SECTION))?
            .merge(&self.config.get(task).get(SUPERVISOR_SECTION))
    }

    /// Build the bus and start every task selected by `allow_spec`.
    ///
    /// Fails before any task starts if the bus cannot be built or a
    /// supervisor section is invalid. Once started, tasks fail independently.
    pub async fn activate(&self, allow_spec: &str) -> Result<Activation, RuntimeError> {
        let selected = self.tasks.allowed(allow_spec);

        let mut planned = Vec::with_capacity(selected.len());
        for (name, task) in selected {
            let params = self.supervisor_params(&name)?;
            planned.push((name, task, params));
        }

        let bus = self
            .adapters
            .create_bus(&self.config.get(BUS_SECTION))
            .await?;

        let mut tasks = Vec::with_capacity(planned.len());
        for (name, task, params) in planned {
            let section = self.config.get(&name);
            tracing::info!(task = %name, retry = params.retry, "Activating task");
            tracing::debug!(task = %name, config = %section, "Task configuration");

            let ctx = Context::new(name.clone(), section, Arc::clone(&bus));
            let handle = safe_run(task, params).spawn(ctx);
            tasks.push((name, handle));
        }

        if tasks.is_empty() {
            tracing::warn!(allow = %allow_spec, "No tasks activated");
        }

        Ok(Activation { bus, tasks })
    }
}

/// Running tasks and the bus they share.
pub struct Activation {
    bus: Arc<dyn EventBus>,
    tasks: Vec<(String, JoinHandle<TaskOutcome>)>,
}

impl Activation {
    /// Bus shared by the activated tasks.
    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    /// Names of the activated tasks, in activation order.
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Wait for every supervised task to end.
    ///
    /// Never returns while a loop-shaped task keeps running.
    pub async fn join(self) -> Vec<(String, TaskOutcome)> {
        let mut outcomes = Vec::with_capacity(self.tasks.len());
        for (name, handle) in self.tasks {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(task = %name, error = %e, "Supervisor did not finish");
                    TaskOutcome::Exhausted {
                        attempts: 0,
                        error: TaskError::failed(format!("supervisor stopped: {e}")),
                    }
                }
            };
            outcomes.push((name, outcome));
        }
        outcomes
    }

    /// Stop every supervised task.
    pub fn abort(&self) {
        for (name, handle) in &self.tasks {
            tracing::debug!(task = %name, "Aborting task");
            handle.abort();
        }
    }
}

impl std::fmt::Debug for Activation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Activation")
            .field("adapter", &self.bus.adapter())
            .field("tasks", &self.task_names())
            .finish()
    }
}

/// Registry holding the built-in tasks.
pub fn builtin_tasks() -> Result<TaskRegistry, ConfigurationError> {
    let mut registry = TaskRegistry::new();
    crate::tasks::register_all(&mut registry)?;
    Ok(registry)
}

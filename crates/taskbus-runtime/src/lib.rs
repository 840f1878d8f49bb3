//! # taskbus runtime
//!
//! This crate hosts taskbus automation tasks: it keeps the registry of known
//! tasks, builds the shared event bus, and runs each selected task under a
//! supervisor that retries failures and contains panics.
//!
//! ## Overview
//!
//! The taskbus-runtime crate handles:
//! - **Tasks**: the [`Task`] trait and closure-backed [`TaskFn`]
//! - **Context**: per-task name, configuration, log span and bus access
//! - **Registry**: named tasks and allow-list selection
//! - **Supervisor**: bounded retry with a fixed delay ([`safe_run`])
//! - **Activation**: one call from configuration to running tasks
//! - **Logging**: `tracing-subscriber` setup from the `logger` section
//!
//! ## Usage
//!
//! ```rust,no_run
//! use taskbus_config::ConfigSection;
//! use taskbus_events::AdapterRegistry;
//! use taskbus_runtime::{builtin_tasks, logging, Runtime, TaskFn};
//!
//! async fn run(config: ConfigSection) -> Result<(), Box<dyn std::error::Error>> {
//!     logging::init(&config.get("logger"));
//!
//!     let mut tasks = builtin_tasks()?;
//!     tasks.register(
//!         "hello",
//!         TaskFn::arc(|ctx| async move {
//!             tracing::info!(parent: ctx.log(), "hello");
//!             Ok(())
//!         }),
//!     )?;
//!
//!     let runtime = Runtime::new(config, AdapterRegistry::with_defaults()?, tasks);
//!     let allow = "timer,hello";
//!     let activation = runtime.activate(allow).await?;
//!
//!     for (task, outcome) in activation.join().await {
//!         tracing::info!(task = %task, attempts = outcome.attempts(), "done");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Failure Isolation
//!
//! - Every task runs on its own tokio task
//! - A failed or panicking attempt is retried `retry` times, `delay_ms` apart
//! - An exhausted task stops; its siblings and the bus keep running
//! - Handler failures are logged by the bus and never reach the publisher

pub mod context;
pub mod error;
pub mod logging;
pub mod registry;
pub mod runtime;
pub mod supervisor;
pub mod task;
pub mod tasks;

// Re-export main types
pub use context::{Context, HandlerFn, HandlerFuture};
pub use error::{RuntimeError, TaskError};
pub use registry::TaskRegistry;
pub use runtime::{builtin_tasks, Activation, Runtime};
pub use supervisor::{safe_run, SafeParams, SafeRun, TaskOutcome, TaskState};
pub use task::{Task, TaskFn};

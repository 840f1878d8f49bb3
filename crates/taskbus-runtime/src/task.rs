//! Task abstraction and function-backed task implementation.
//!
//! A task is one independently scheduled unit of automation logic. It gets a
//! [`Context`] and nothing else: its own configuration, a log span and the
//! bus. Two shapes are common and both are fine:
//!
//! - **loop**: poll or listen forever, publishing what it finds, and only
//!   return on a fatal failure;
//! - **subscribe**: register one or more handlers and return `Ok(())` right
//!   away; the work happens later inside the handlers.

use async_trait::async_trait;
use std::future::Future;

use crate::context::Context;
use crate::error::TaskError;

/// Unit of automation logic.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use taskbus_runtime::{Context, Task, TaskError};
/// use taskbus_events::subjects;
///
/// struct Janitor;
///
/// #[async_trait]
/// impl Task for Janitor {
///     async fn run(&self, ctx: Context) -> Result<(), TaskError> {
///         ctx.subscribe_fn(subjects::OUTDATED, "OutdatedHandler", |event, ctx| async move {
///             tracing::info!(parent: ctx.log(), bytes = event.data.len(), "purging");
///             Ok(())
///         })
///         .await?;
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Run until done, or forever.
    ///
    /// May be invoked again by the supervisor after a failure, so per-run
    /// state belongs in locals rather than in `self`. Subscriptions made
    /// through `ctx` by a failed run are removed before the next one starts.
    async fn run(&self, ctx: Context) -> Result<(), TaskError>;
}

/// Function-backed task.
///
/// Wraps a closure that creates a fresh future per run.
pub struct TaskFn<F> {
    f: F,
}

impl<F, Fut> TaskFn<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    /// Creates a new function-backed task.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the task as a shared handle.
    pub fn arc(f: F) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F, Fut> Task for TaskFn<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    async fn run(&self, ctx: Context) -> Result<(), TaskError> {
        (self.f)(ctx).await
    }
}

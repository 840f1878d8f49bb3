//! Task supervision with bounded retry.
//!
//! Every activated task runs under a [`SafeRun`]. A failed or panicking
//! attempt is logged and, while retries remain, the task is started again
//! after a fixed delay. Subscriptions a failed attempt made through its
//! context are removed from the bus before the next attempt. A task that
//! keeps failing ends in
//! [`TaskOutcome::Exhausted`]; it never takes the process or its sibling
//! tasks down with it.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use taskbus_config::ConfigSection;
//! use taskbus_events::MemoryEventBus;
//! use taskbus_runtime::{safe_run, Context, SafeParams, TaskError, TaskFn};
//!
//! async fn example() {
//!     let task = TaskFn::arc(|_ctx| async { Err(TaskError::failed("upstream down")) });
//!     let ctx = Context::new("poller", ConfigSection::empty(), Arc::new(MemoryEventBus::new()));
//!
//!     let outcome = safe_run(task, SafeParams::new(2, Duration::from_secs(1)))
//!         .run(ctx)
//!         .await;
//!     assert_eq!(outcome.attempts(), 3);
//! }
//! ```

use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use taskbus_config::{ConfigSection, ConfigurationError};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::Instrument;

use crate::context::Context;
use crate::error::TaskError;
use crate::task::Task;

/// Retry policy of one supervised task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SafeParams {
    /// Re-runs allowed after the first failure
    pub retry: u32,

    /// Pause before each re-run
    pub delay: Duration,
}

impl SafeParams {
    /// Create supervisor parameters.
    pub fn new(retry: u32, delay: Duration) -> Self {
        Self { retry, delay }
    }

    /// Read `retry` and `delay_ms` from a supervisor section.
    ///
    /// Missing keys keep their defaults.
    pub fn from_config(config: &ConfigSection) -> Result<Self, ConfigurationError> {
        Self::default().merge(config)
    }

    /// Override fields present in `config`.
    pub fn merge(self, config: &ConfigSection) -> Result<Self, ConfigurationError> {
        let retry = match config.get_i64("retry") {
            None => self.retry,
            Some(n) => u32::try_from(n).map_err(|_| {
                ConfigurationError::invalid("supervisor.retry", format!("out of range: {n}"))
            })?,
        };

        Ok(Self {
            retry,
            delay: config.get_duration_ms_or("delay_ms", self.delay),
        })
    }
}

/// Lifecycle state of a supervised task, as it appears in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// About to run for the first time
    Starting,
    /// An attempt is in progress
    Running,
    /// The last attempt failed
    Failed,
    /// Waiting before the next attempt
    Retrying,
    /// Failed with no retries left
    Exhausted,
    /// Returned successfully
    Completed,
}

impl TaskState {
    /// State name as logged.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
            Self::Exhausted => "exhausted",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a supervised task ended.
#[derive(Debug)]
pub enum TaskOutcome {
    /// The task returned `Ok`
    Completed { attempts: u32 },

    /// Every attempt failed
    Exhausted { attempts: u32, error: TaskError },
}

impl TaskOutcome {
    /// Number of times the task was invoked.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Completed { attempts } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// Whether the task gave up.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// Final error, if the task gave up.
    pub fn error(&self) -> Option<&TaskError> {
        match self {
            Self::Exhausted { error, .. } => Some(error),
            Self::Completed { .. } => None,
        }
    }
}

/// A task bound to its retry policy.
#[derive(Clone)]
pub struct SafeRun {
    task: Arc<dyn Task>,
    params: SafeParams,
}

/// Wrap `task` so failures and panics are retried per `params`.
pub fn safe_run(task: Arc<dyn Task>, params: SafeParams) -> SafeRun {
    SafeRun { task, params }
}

impl SafeRun {
    /// Retry policy in use.
    pub fn params(&self) -> SafeParams {
        self.params
    }

    /// Run the task until it succeeds or retries run out.
    pub async fn run(&self, ctx: Context) -> TaskOutcome {
        let mut attempt: u32 = 0;

        tracing::debug!(
            parent: ctx.log(),
            task = %ctx.name(),
            retry = self.params.retry,
            delay_ms = self.params.delay.as_millis() as u64,
            state = %TaskState::Starting,
            "Supervising task"
        );

        loop {
            attempt += 1;
            tracing::debug!(parent: ctx.log(), task = %ctx.name(), attempt, state = %TaskState::Running, "Task attempt started");

            match self.attempt(ctx.clone()).await {
                Ok(()) => {
                    tracing::info!(
                        parent: ctx.log(),
                        task = %ctx.name(),
                        attempts = attempt,
                        state = %TaskState::Completed,
                        "Task returned"
                    );
                    return TaskOutcome::Completed { attempts: attempt };
                }
                Err(error) if attempt > self.params.retry => {
                    tracing::error!(
                        parent: ctx.log(),
                        task = %ctx.name(),
                        attempts = attempt,
                        error = %error,
                        state = %TaskState::Exhausted,
                        "All retry attempts exhausted"
                    );
                    return TaskOutcome::Exhausted {
                        attempts: attempt,
                        error,
                    };
                }
                Err(error) => {
                    tracing::warn!(
                        parent: ctx.log(),
                        task = %ctx.name(),
                        attempt,
                        max_attempts = self.params.retry.saturating_add(1),
                        delay_ms = self.params.delay.as_millis() as u64,
                        error = %error,
                        state = %TaskState::Retrying,
                        "Attempt failed, retrying"
                    );
                    sleep(self.params.delay).await;
                }
            }
        }
    }

    /// Run on its own tokio task.
    pub fn spawn(self, ctx: Context) -> JoinHandle<TaskOutcome> {
        tokio::spawn(async move { self.run(ctx).await })
    }

    async fn attempt(&self, ctx: Context) -> Result<(), TaskError> {
        let ctx = ctx.for_attempt();
        let span = ctx.log().clone();
        let task = Arc::clone(&self.task);
        let run_ctx = ctx.clone();
        // The task future is created inside the guarded block as well.
        let fut = async move { task.run(run_ctx).await }.instrument(span);

        let result = match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(TaskError::Panicked(panic_message(panic.as_ref()))),
        };

        if result.is_err() {
            let released = ctx.release_subscriptions().await;
            if released > 0 {
                tracing::debug!(parent: ctx.log(), task = %ctx.name(), released, "Released subscriptions of failed attempt");
            }
        }
        result
    }
}

impl fmt::Debug for SafeRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SafeRun")
            .field("params", &self.params)
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

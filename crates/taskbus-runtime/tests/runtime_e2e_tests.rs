//! End-to-End tests for task activation and supervision.
//!
//! These tests build a runtime from JSON configuration with the in-memory bus
//! and check what the running tasks observe through the bus.
//!
//! Test scenarios:
//! 1. allow-list selects a subset while discovery still lists every task
//! 2. permanent failure is retried `retry` times, `delay_ms` apart
//! 3. a panicking task is retried like a failing one
//! 4. an exhausted task does not disturb its siblings
//! 5. publisher and subscriber tasks cooperate through the bus
//! 6. the built-in timer ticks

use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskbus_config::ConfigSection;
use taskbus_events::{new_trace, subjects, AdapterRegistry, Event, JSON_CODING};
use taskbus_runtime::{builtin_tasks, Runtime, TaskError, TaskFn, TaskOutcome, TaskRegistry};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

/// Test fixture holding invocation counters for registered tasks.
struct TestFixture {
    /// Task registry under construction.
    tasks: TaskRegistry,
    /// Invocation count per task.
    counters: Vec<(String, Arc<AtomicU32>)>,
}

impl TestFixture {
    fn new() -> Self {
        Self {
            tasks: TaskRegistry::new(),
            counters: Vec::new(),
        }
    }

    /// Register a task that counts its runs and then does `body`.
    fn with_task<F>(mut self, name: &str, body: F) -> Self
    where
        F: Fn(u32) -> Result<(), TaskError> + Send + Sync + 'static,
    {
        let counter = Arc::new(AtomicU32::new(0));
        let body = Arc::new(body);
        let runs = counter.clone();
        self.tasks
            .register(
                name,
                TaskFn::arc(move |_ctx| {
                    let runs = runs.clone();
                    let body = body.clone();
                    async move { body(runs.fetch_add(1, Ordering::SeqCst) + 1) }
                }),
            )
            .unwrap();
        self.counters.push((name.to_string(), counter));
        self
    }

    fn runs(&self, name: &str) -> u32 {
        self.counters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    fn runtime(&self, config: Value) -> Runtime {
        Runtime::new(
            ConfigSection::new(config),
            AdapterRegistry::with_defaults().unwrap(),
            self.tasks.clone(),
        )
    }
}

fn outcome<'a>(outcomes: &'a [(String, TaskOutcome)], name: &str) -> &'a TaskOutcome {
    &outcomes.iter().find(|(n, _)| n == name).unwrap().1
}

#[tokio::test]
async fn test_allow_list_selects_subset() {
    let fixture = TestFixture::new()
        .with_task("a", |_| Ok(()))
        .with_task("b", |_| Ok(()));
    let runtime = fixture.runtime(json!({}));

    let listed: Vec<_> = runtime.list_tasks().keys().cloned().collect();
    assert_eq!(listed, vec!["a", "b"]);
    assert_eq!(runtime.list_adapters()[0], "memory");

    let activation = runtime.activate("a").await.unwrap();
    assert_eq!(activation.task_names(), vec!["a"]);
    activation.join().await;

    assert_eq!(fixture.runs("a"), 1);
    assert_eq!(fixture.runs("b"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_retried_with_delay() {
    let fixture = TestFixture::new().with_task("flaky", |n| Err(TaskError::failed(format!("run {n}"))));
    let runtime = fixture.runtime(json!({
        "supervisor": { "retry": 2, "delay_ms": 1000 }
    }));

    let started = Instant::now();
    let outcomes = runtime.activate("flaky").await.unwrap().join().await;

    assert_eq!(fixture.runs("flaky"), 3);
    let flaky = outcome(&outcomes, "flaky");
    assert!(flaky.is_exhausted());
    assert_eq!(flaky.attempts(), 3);
    assert!(started.elapsed() >= Duration::from_millis(2000));
}

#[tokio::test]
async fn test_panic_is_retried() {
    let fixture = TestFixture::new().with_task("panicky", |_| {
        if true {
            panic!("bad state");
        }
        Ok(())
    });
    let runtime = fixture.runtime(json!({
        "panicky": { "supervisor": { "retry": 1, "delay_ms": 1 } }
    }));

    let outcomes = runtime.activate("").await.unwrap().join().await;

    assert_eq!(fixture.runs("panicky"), 2);
    assert!(matches!(
        outcome(&outcomes, "panicky").error(),
        Some(TaskError::Panicked(message)) if message == "bad state"
    ));
}

#[tokio::test]
async fn test_exhausted_task_leaves_siblings_running() {
    let fixture = TestFixture::new()
        .with_task("broken", |_| Err(TaskError::failed("nope")))
        .with_task("healthy", |n| {
            if n < 2 {
                Err(TaskError::failed("warming up"))
            } else {
                Ok(())
            }
        });
    let runtime = fixture.runtime(json!({
        "broken": { "supervisor": { "retry": 0 } },
        "healthy": { "supervisor": { "retry": 3, "delay_ms": 5 } }
    }));

    let outcomes = runtime.activate("broken, healthy").await.unwrap().join().await;

    assert_eq!(fixture.runs("broken"), 1);
    assert!(outcome(&outcomes, "broken").is_exhausted());
    assert!(matches!(
        outcome(&outcomes, "healthy"),
        TaskOutcome::Completed { attempts: 2 }
    ));
}

#[tokio::test]
async fn test_tasks_cooperate_through_bus() {
    let (tx, mut rx) = mpsc::unbounded_channel::<(String, String)>();
    let mut tasks = TaskRegistry::new();

    tasks
        .register(
            "janitor",
            TaskFn::arc(move |ctx| {
                let tx = tx.clone();
                async move {
                    ctx.subscribe_fn(subjects::OUTDATED, "OutdatedHandler", move |event, _hctx| {
                        let tx = tx.clone();
                        async move {
                            let key: String = event.decode()?;
                            let _ = tx.send((key, event.trace.clone()));
                            Ok::<_, TaskError>(())
                        }
                    })
                    .await?;
                    Ok(())
                }
            }),
        )
        .unwrap();

    let runtime = Runtime::new(
        ConfigSection::new(json!({ "bus": { "adapter": "memory" } })),
        AdapterRegistry::with_defaults().unwrap(),
        tasks,
    );
    let activation = runtime.activate("janitor").await.unwrap();
    let bus = activation.bus().clone();
    let outcomes = activation.join().await;
    assert!(matches!(outcomes[0].1, TaskOutcome::Completed { attempts: 1 }));

    // the subscription outlives the task body
    let trace = new_trace();
    bus.publish(Event::with_data(trace.clone(), subjects::OUTDATED, JSON_CODING, "k").unwrap())
        .await
        .unwrap();

    let (key, seen) = timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(key, "k");
    assert_eq!(seen, trace);
}

#[tokio::test]
async fn test_builtin_timer_ticks() {
    let runtime = Runtime::new(
        ConfigSection::new(json!({ "timer": { "interval_ms": 5, "ticks": 2 } })),
        AdapterRegistry::with_defaults().unwrap(),
        builtin_tasks().unwrap(),
    );

    let activation = runtime.activate("timer").await.unwrap();
    let bus = activation.bus().clone();
    let outcomes = activation.join().await;

    assert!(matches!(outcome(&outcomes, "timer"), TaskOutcome::Completed { .. }));

    let stats = bus.stats().await;
    assert_eq!(stats.events_published, 2);
    assert_eq!(stats.active_subscriptions, 1);
}

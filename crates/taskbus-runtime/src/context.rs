//! Per-task execution context.
//!
//! A [`Context`] is the only thing a task sees of the outside world: its name,
//! its own configuration section, a log span tagged with the task name and the
//! bus. A context can also carry a handler function; such a context is what
//! gets subscribed to a subject.
//!
//! A context remembers the subscriptions made through it. The supervisor hands
//! every attempt a fresh tracker and unsubscribes whatever a failed attempt
//! left behind, so a retried task does not end up with duplicate handlers.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use taskbus_config::ConfigSection;
use taskbus_events::{Event, EventBus, EventHandler, HandlerError, SubscriptionId};
use tokio::sync::Mutex;
use tracing::{Instrument, Span};

use crate::error::TaskError;

/// Future returned by a handler function.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), TaskError>> + Send>>;

/// Handler function carried by a subscription context.
pub type HandlerFn = Arc<dyn Fn(Arc<Event>, Context) -> HandlerFuture + Send + Sync>;

fn task_span(name: &str, trace: Option<&str>) -> Span {
    match trace {
        Some(trace) => tracing::info_span!("task", handler = %name, trace = %trace),
        None => tracing::info_span!("task", handler = %name, trace = tracing::field::Empty),
    }
}

/// Execution context handed to a task or a handler.
#[derive(Clone)]
pub struct Context {
    name: String,
    config: ConfigSection,
    bus: Arc<dyn EventBus>,
    log: Span,
    func: Option<HandlerFn>,
    subscriptions: Arc<Mutex<Vec<SubscriptionId>>>,
}

impl Context {
    /// Context for the task `name`.
    pub fn new(name: impl Into<String>, config: ConfigSection, bus: Arc<dyn EventBus>) -> Self {
        let name = name.into();
        Self {
            log: task_span(&name, None),
            name,
            config,
            bus,
            func: None,
            subscriptions: Arc::default(),
        }
    }

    /// Task or handler name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The task's own configuration section.
    pub fn config(&self) -> &ConfigSection {
        &self.config
    }

    /// Shared bus.
    pub fn bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    /// Span tagged with `handler` and, once known, `trace`.
    ///
    /// Use it as the parent of log events: `tracing::info!(parent: ctx.log(), ...)`.
    pub fn log(&self) -> &Span {
        &self.log
    }

    /// Handler function, if this is a subscription context.
    pub fn func(&self) -> Option<&HandlerFn> {
        self.func.as_ref()
    }

    /// Copy of this context whose span carries `trace`.
    pub fn with_trace(&self, trace: &str) -> Self {
        Self {
            log: task_span(&self.name, Some(trace)),
            ..self.clone()
        }
    }

    /// Subscription context named `name`, sharing this context's config and bus.
    pub fn handler<F, Fut>(&self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<Event>, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let name = name.into();
        let func: HandlerFn = Arc::new(move |event, ctx| Box::pin(f(event, ctx)));
        Self {
            log: task_span(&name, None),
            name,
            config: self.config.clone(),
            bus: Arc::clone(&self.bus),
            func: Some(func),
            subscriptions: Arc::default(),
        }
    }

    /// Subscriptions made through this context and not released.
    pub async fn subscriptions(&self) -> Vec<SubscriptionId> {
        self.subscriptions.lock().await.clone()
    }

    /// Copy of this context with an empty subscription tracker.
    pub(crate) fn for_attempt(&self) -> Self {
        Self {
            subscriptions: Arc::default(),
            ..self.clone()
        }
    }

    /// Unsubscribe everything subscribed through this context.
    ///
    /// Returns how many subscriptions were removed from the bus.
    pub(crate) async fn release_subscriptions(&self) -> usize {
        let ids: Vec<SubscriptionId> = self.subscriptions.lock().await.drain(..).collect();
        let mut released = 0;
        for id in ids {
            match self.bus.unsubscribe(&id).await {
                Ok(true) => released += 1,
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!(parent: &self.log, subscription = %id, error = %error, "Failed to unsubscribe");
                }
            }
        }
        released
    }

    /// Publish `event` on the bus.
    pub async fn publish(&self, event: Event) -> Result<(), TaskError> {
        self.bus.publish(event).await?;
        Ok(())
    }

    /// Subscribe `handler` to `subject`.
    ///
    /// Every delivery runs the handler function with a copy of `handler`
    /// whose span carries the event's trace.
    pub async fn subscribe(
        &self,
        subject: &str,
        handler: Context,
    ) -> Result<SubscriptionId, TaskError> {
        let func = handler
            .func
            .clone()
            .ok_or_else(|| TaskError::MissingHandler(handler.name.clone()))?;

        tracing::debug!(parent: &self.log, subject = %subject, handler = %handler.name, "Subscribing handler");
        let id = self
            .bus
            .subscribe(subject, Arc::new(ContextHandler { ctx: handler, func }))
            .await?;
        self.subscriptions.lock().await.push(id.clone());
        Ok(id)
    }

    /// [`Context::handler`] and [`Context::subscribe`] in one call.
    pub async fn subscribe_fn<F, Fut>(
        &self,
        subject: &str,
        name: impl Into<String>,
        f: F,
    ) -> Result<SubscriptionId, TaskError>
    where
        F: Fn(Arc<Event>, Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.subscribe(subject, self.handler(name, f)).await
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("adapter", &self.bus.adapter())
            .field("handler", &self.func.is_some())
            .finish()
    }
}

/// Bus-facing side of a subscription context.
struct ContextHandler {
    ctx: Context,
    func: HandlerFn,
}

#[async_trait]
impl EventHandler for ContextHandler {
    fn name(&self) -> &str {
        &self.ctx.name
    }

    async fn handle(&self, event: Arc<Event>) -> Result<(), HandlerError> {
        let ctx = self.ctx.with_trace(&event.trace);
        let span = ctx.log.clone();
        (self.func)(event, ctx).instrument(span).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use taskbus_events::{new_trace, subjects, MemoryEventBus, JSON_CODING};
    use tokio::sync::mpsc;

    fn context(bus: Arc<dyn EventBus>) -> Context {
        Context::new(
            "janitor",
            ConfigSection::new(json!({ "root": "/srv/cache" })),
            bus,
        )
    }

    #[tokio::test]
    async fn test_handler_context_shares_config_and_bus() {
        let bus: Arc<dyn EventBus> = Arc::new(MemoryEventBus::new());
        let ctx = context(bus.clone());
        let handler = ctx.handler("PurgeHandler", |_event, _ctx| async { Ok(()) });

        assert_eq!(handler.name(), "PurgeHandler");
        assert_eq!(handler.config().get_str("root"), Some("/srv/cache"));
        assert!(Arc::ptr_eq(handler.bus(), &bus));
        assert!(handler.func().is_some());
        assert!(ctx.func().is_none());
    }

    #[tokio::test]
    async fn test_subscribe_without_func_fails() {
        let bus: Arc<dyn EventBus> = Arc::new(MemoryEventBus::new());
        let ctx = context(bus.clone());
        let plain = Context::new("Plain", ConfigSection::empty(), bus.clone());

        let err = ctx.subscribe(subjects::OUTDATED, plain).await.unwrap_err();
        assert!(matches!(err, TaskError::MissingHandler(name) if name == "Plain"));
        assert_eq!(bus.stats().await.active_subscriptions, 0);
    }

    #[tokio::test]
    async fn test_handler_receives_event_and_trace() {
        let bus: Arc<dyn EventBus> = Arc::new(MemoryEventBus::new());
        let ctx = context(bus);
        let (tx, mut rx) = mpsc::unbounded_channel();

        ctx.subscribe_fn(subjects::OUTDATED, "OutdatedHandler", move |event, hctx| {
            let tx = tx.clone();
            async move {
                let key: String = event.decode()?;
                let _ = tx.send((key, hctx.name().to_string(), event.trace.clone()));
                Ok::<_, TaskError>(())
            }
        })
        .await
        .unwrap();

        let trace = new_trace();
        let event = Event::with_data(trace.clone(), subjects::OUTDATED, JSON_CODING, "k").unwrap();
        ctx.publish(event).await.unwrap();

        let (key, name, seen_trace) = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(key, "k");
        assert_eq!(name, "OutdatedHandler");
        assert_eq!(seen_trace, trace);
    }

    #[tokio::test]
    async fn test_release_subscriptions() {
        let bus: Arc<dyn EventBus> = Arc::new(MemoryEventBus::new());
        let ctx = context(bus.clone());
        let attempt = ctx.for_attempt();

        let kept = ctx
            .subscribe_fn(subjects::TIMER, "Kept", |_event, _ctx| async { Ok(()) })
            .await
            .unwrap();
        attempt
            .subscribe_fn(subjects::OUTDATED, "First", |_event, _ctx| async { Ok(()) })
            .await
            .unwrap();
        attempt
            .with_trace("t1")
            .subscribe_fn(subjects::OUTDATED, "Second", |_event, _ctx| async { Ok(()) })
            .await
            .unwrap();

        assert_eq!(attempt.subscriptions().await.len(), 2);
        assert_eq!(bus.stats().await.active_subscriptions, 3);

        assert_eq!(attempt.release_subscriptions().await, 2);
        assert!(attempt.subscriptions().await.is_empty());
        assert_eq!(ctx.subscriptions().await, vec![kept]);
        assert_eq!(bus.stats().await.active_subscriptions, 1);
        assert_eq!(attempt.release_subscriptions().await, 0);
    }

    #[tokio::test]
    async fn test_handler_error_is_counted_by_bus() {
        let bus: Arc<dyn EventBus> = Arc::new(MemoryEventBus::new());
        let ctx = context(bus.clone());

        ctx.subscribe_fn(subjects::SERVE_CMD, "Failing", |_event, _ctx| async {
            Err(TaskError::failed("no pipeline"))
        })
        .await
        .unwrap();

        ctx.publish(Event::new(new_trace(), subjects::SERVE_CMD, JSON_CODING))
            .await
            .unwrap();

        for _ in 0..50 {
            if bus.stats().await.delivery_failures == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("handler failure was not recorded");
    }
}

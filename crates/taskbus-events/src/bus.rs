//! Event bus implementation
//!
//! This module provides the event bus abstraction every transport implements,
//! the handler contract subscribers implement, and the in-memory transport.

use crate::codec::CodecError;
use crate::dispatch::Dispatcher;
use crate::types::Event;
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Default backlog, per subscription, above which a slow subscriber is logged.
pub const DEFAULT_BACKLOG_WARN: usize = 1024;

/// Event bus error types.
#[derive(Debug, Error)]
pub enum EventBusError {
    /// Failed to publish event
    #[error("Failed to publish event: {0}")]
    PublishError(String),

    /// Failed to subscribe
    #[error("Failed to subscribe: {0}")]
    SubscribeError(String),

    /// Connection error
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Channel closed
    #[error("Channel closed")]
    ChannelClosed,
}

/// Result type for event bus operations.
pub type EventBusResult<T> = Result<T, EventBusError>;

/// Error returned by a subscriber while processing a delivered event.
///
/// The bus logs these and moves on; they never reach the publisher.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Payload could not be decoded or a derived payload encoded
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Publishing a derived event failed
    #[error(transparent)]
    Bus(#[from] EventBusError),

    /// Anything else
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Failed`].
    pub fn failed(message: impl fmt::Display) -> Self {
        Self::Failed(message.to_string())
    }
}

/// Identifier of one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub(crate) fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    /// String form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Event handler trait for processing events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Handle an event.
    async fn handle(&self, event: Arc<Event>) -> Result<(), HandlerError>;
}

/// Closure-backed [`EventHandler`].
///
/// ```rust
/// use std::sync::Arc;
/// use taskbus_events::{Event, FnHandler, HandlerError};
///
/// let handler = FnHandler::arc("printer", |event: Arc<Event>| async move {
///     println!("{}", event.subject);
///     Ok::<_, HandlerError>(())
/// });
/// ```
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> FnHandler<F> {
    /// Create the handler as a shared handle.
    pub fn arc(name: impl Into<String>, f: F) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            f,
        })
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: Arc<Event>) -> Result<(), HandlerError> {
        (self.f)(event).await
    }
}

/// Event bus trait for publish/subscribe operations.
///
/// Implementations route through a [`Dispatcher`], so every transport offers
/// the same delivery guarantees:
/// - `publish` returns once the event is queued for every current subscriber
///   and never waits for handlers;
/// - publishing to a subject nobody listens on is a successful no-op;
/// - each subscriber sees events from one publisher in publish order;
/// - a failing or panicking handler is logged and affects nobody else.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Registered adapter name of this transport.
    fn adapter(&self) -> &str;

    /// Publish an event.
    ///
    /// Fails with [`EventBusError::PublishError`] when the subject contains a
    /// wildcard segment.
    async fn publish(&self, event: Event) -> EventBusResult<()>;

    /// Register `handler` for `subject`.
    ///
    /// Every subscription subject is a pattern. Exact subjects match
    /// themselves. The dot-separated segments `*` and `#` are reserved
    /// wildcards:
    /// - `*` matches any single segment
    /// - `#` matches zero or more segments
    ///
    /// Published subjects may not contain either segment, see [`is_pattern`].
    async fn subscribe(
        &self,
        subject: &str,
        handler: Arc<dyn EventHandler>,
    ) -> EventBusResult<SubscriptionId>;

    /// Remove a subscription. Returns whether it existed.
    async fn unsubscribe(&self, id: &SubscriptionId) -> EventBusResult<bool>;

    /// Get event bus stats.
    async fn stats(&self) -> EventBusStats;
}

/// Event bus statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBusStats {
    /// Total events published
    pub events_published: u64,
    /// Handler invocations that succeeded
    pub events_delivered: u64,
    /// Handler invocations that failed or panicked
    pub delivery_failures: u64,
    /// Deliveries skipped because the subscriber's worker had stopped
    pub events_dropped: u64,
    /// Events queued for subscribers and not yet picked up by their worker
    pub events_pending: u64,
    /// Active subscriptions
    pub active_subscriptions: usize,
}

/// Whether `subject` has a `*` or `#` segment.
pub fn is_pattern(subject: &str) -> bool {
    subject.split('.').any(|segment| segment == "*" || segment == "#")
}

/// Reject subjects that cannot be published.
pub fn check_publish_subject(subject: &str) -> EventBusResult<()> {
    if is_pattern(subject) {
        return Err(EventBusError::PublishError(format!(
            "subject {subject:?} contains a wildcard segment"
        )));
    }
    Ok(())
}

/// Check if a subject matches a subscription pattern.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    if pattern == subject {
        return true;
    }
    let pattern: Vec<&str> = pattern.split('.').collect();
    let subject: Vec<&str> = subject.split('.').collect();
    segments_match(&pattern, &subject)
}

fn segments_match(pattern: &[&str], subject: &[&str]) -> bool {
    match pattern.split_first() {
        None => subject.is_empty(),
        Some((&"#", rest)) => (0..=subject.len()).any(|skip| segments_match(rest, &subject[skip..])),
        Some((&"*", rest)) => !subject.is_empty() && segments_match(rest, &subject[1..]),
        Some((segment, rest)) => {
            subject.first() == Some(segment) && segments_match(rest, &subject[1..])
        }
    }
}

/// In-memory event bus implementation.
///
/// This is suitable for single-process deployments and testing.
/// For several processes sharing one bus, use the Redis backend.
pub struct MemoryEventBus {
    dispatcher: Dispatcher,
}

impl fmt::Debug for MemoryEventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryEventBus")
            .field("backlog_warn", &self.dispatcher.backlog_warn())
            .finish()
    }
}

impl MemoryEventBus {
    /// Adapter name.
    pub const ADAPTER: &'static str = "memory";

    /// Create a new in-memory event bus.
    pub fn new() -> Self {
        Self::with_backlog_warn(DEFAULT_BACKLOG_WARN)
    }

    /// Create with a custom slow-subscriber warning threshold.
    ///
    /// Queues are unbounded; the threshold only controls logging.
    pub fn with_backlog_warn(backlog_warn: usize) -> Self {
        Self {
            dispatcher: Dispatcher::new(backlog_warn),
        }
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    fn adapter(&self) -> &str {
        Self::ADAPTER
    }

    async fn publish(&self, event: Event) -> EventBusResult<()> {
        check_publish_subject(&event.subject)?;
        let subject = event.subject.clone();
        let routed = self.dispatcher.dispatch(event).await;
        tracing::trace!(subject = %subject, subscribers = routed, "Published event");
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        handler: Arc<dyn EventHandler>,
    ) -> EventBusResult<SubscriptionId> {
        self.dispatcher.subscribe(subject, handler).await
    }

    async fn unsubscribe(&self, id: &SubscriptionId) -> EventBusResult<bool> {
        Ok(self.dispatcher.unsubscribe(id).await)
    }

    async fn stats(&self) -> EventBusStats {
        self.dispatcher.stats().await
    }
}

// ============================================================================
// Tests
// ============================================================================

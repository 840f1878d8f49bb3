//! # taskbus events
//!
//! This crate provides the publish/subscribe bus taskbus tasks use to talk to
//! each other. Tasks never call each other directly: a webhook handler
//! publishes what it received, a scheduler subscribes and triggers a build, a
//! poller publishes that a resource went stale and a janitor purges it.
//!
//! ## Overview
//!
//! The taskbus-events crate handles:
//! - **Event Envelope**: trace, subject, coding and an opaque payload
//! - **Codings**: named serialization schemes for payloads
//! - **Event Bus**: transport-independent publish/subscribe contract
//! - **Adapters**: transports selected by name when the bus is built
//!
//! ## Features
//!
//! - `memory` (default): In-memory event bus for single-process deployments
//! - `redis`: Redis pub/sub event bus shared by several processes
//!
//! ## Usage
//!
//! ### Publishing Events
//!
//! ```rust,no_run
//! use taskbus_events::{new_trace, subjects, Event, EventBus, MemoryEventBus, JSON_CODING};
//!
//! async fn publish_example() {
//!     let bus = MemoryEventBus::new();
//!
//!     let event = Event::with_data(new_trace(), subjects::TIMER, JSON_CODING, &1u64).unwrap();
//!     bus.publish(event).await.unwrap();
//! }
//! ```
//!
//! ### Subscribing to Events
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use taskbus_events::{subjects, Event, EventBus, FnHandler, HandlerError, MemoryEventBus};
//!
//! async fn subscribe_example() {
//!     let bus = MemoryEventBus::new();
//!
//!     bus.subscribe(
//!         subjects::TIMER,
//!         FnHandler::arc("printer", |event: Arc<Event>| async move {
//!             let tick: u64 = event.decode()?;
//!             println!("tick {tick}");
//!             Ok::<_, HandlerError>(())
//!         }),
//!     )
//!     .await
//!     .unwrap();
//! }
//! ```
//!
//! ## Delivery
//!
//! - `publish` never waits for handlers and succeeds with zero subscribers
//! - Every subscriber to a subject gets every event (fan-out)
//! - Events from one publisher reach each subscriber in publish order
//! - Handler errors and panics are logged at the bus and go no further
//! - Subscriber queues are unbounded; a backlog above `backlog_warn` is logged
//! - `*` and `#` segments are subscription wildcards and cannot be published
//!
//! ## Causal Chains
//!
//! [`new_trace`] starts a workflow; every event caused by an earlier one keeps
//! its trace ([`Event::derive`]), so logs can be joined across tasks.

pub mod adapter;
pub mod bus;
pub mod codec;
pub mod dispatch;
pub mod types;

#[cfg(feature = "redis")]
pub mod redis;

// Re-export main types
pub use adapter::{
    register_defaults, AdapterFactory, AdapterRegistry, BusBuildError, MemoryAdapter,
};
pub use bus::{
    check_publish_subject, is_pattern, subject_matches, EventBus, EventBusError, EventBusResult, EventBusStats, EventHandler,
    FnHandler, HandlerError, MemoryEventBus, SubscriptionId, DEFAULT_BACKLOG_WARN,
};
pub use codec::{decode, encode, Coding, CodecError};
pub use dispatch::Dispatcher;
pub use types::{new_trace, subjects, Event, JSON_CODING};

#[cfg(feature = "redis")]
pub use redis::{RedisEventBus, RedisEventBusConfig};

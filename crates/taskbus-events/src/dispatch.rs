//! Transport-independent delivery
//!
//! Every transport hands incoming events to a [`Dispatcher`], which owns the
//! subscriber table and the per-subscription workers:
//!
//! ```text
//! publish ──► Dispatcher::dispatch ──► send ──► [queue] ──► worker ──► handler
//!                                  ├─► send ──► [queue] ──► worker ──► handler
//!                                  └─► (no match: nothing to do)
//! ```
//!
//! - one unbounded FIFO queue and one worker per subscription, so a subscriber
//!   sees every event of one publisher in order while subscribers run
//!   concurrently;
//! - a queue growing past the backlog threshold is logged, never truncated;
//! - a handler error or panic is caught in its worker, logged and counted.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

use crate::bus::{
    subject_matches, EventBusError, EventBusResult, EventBusStats, EventHandler, SubscriptionId,
};
use crate::types::Event;

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    failures: AtomicU64,
    dropped: AtomicU64,
}

struct Slot {
    id: SubscriptionId,
    pattern: String,
    handler: String,
    sender: mpsc::UnboundedSender<Arc<Event>>,
    backlog: Arc<AtomicUsize>,
    worker: JoinHandle<()>,
}

/// Subscriber table plus delivery workers.
pub struct Dispatcher {
    slots: RwLock<Vec<Slot>>,
    counters: Arc<Counters>,
    backlog_warn: usize,
}

impl Dispatcher {
    /// Create a dispatcher that warns once a subscription has more than
    /// `backlog_warn` events waiting.
    pub fn new(backlog_warn: usize) -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            counters: Arc::new(Counters::default()),
            backlog_warn: backlog_warn.max(1),
        }
    }

    /// Backlog size that triggers a slow-subscriber warning.
    pub fn backlog_warn(&self) -> usize {
        self.backlog_warn
    }

    /// Register `handler` for `pattern` and start its worker.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn EventHandler>,
    ) -> EventBusResult<SubscriptionId> {
        if pattern.is_empty() {
            return Err(EventBusError::SubscribeError(
                "subject must not be empty".to_string(),
            ));
        }

        let id = SubscriptionId::generate();
        let (sender, receiver) = mpsc::unbounded_channel();
        let backlog = Arc::new(AtomicUsize::new(0));
        let worker = tokio::spawn(deliver(
            id.clone(),
            handler.clone(),
            receiver,
            backlog.clone(),
            self.counters.clone(),
        ));

        self.slots.write().await.push(Slot {
            id: id.clone(),
            pattern: pattern.to_string(),
            handler: handler.name().to_string(),
            sender,
            backlog,
            worker,
        });

        tracing::debug!(
            subscription = %id,
            subject = %pattern,
            handler = handler.name(),
            "Subscribed"
        );
        Ok(id)
    }

    /// Remove a subscription. Events already queued for it are still handled.
    pub async fn unsubscribe(&self, id: &SubscriptionId) -> bool {
        let mut slots = self.slots.write().await;
        match slots.iter().position(|slot| &slot.id == id) {
            Some(index) => {
                let slot = slots.remove(index);
                tracing::debug!(subscription = %slot.id, subject = %slot.pattern, "Unsubscribed");
                true
            }
            None => false,
        }
    }

    /// Queue `event` for every matching subscription.
    ///
    /// Never waits for handlers. Returns how many subscriptions received it.
    pub async fn dispatch(&self, event: Event) -> usize {
        self.counters.published.fetch_add(1, Ordering::Relaxed);

        let event = Arc::new(event);
        let slots = self.slots.read().await;
        let mut routed = 0;

        for slot in slots.iter().filter(|s| subject_matches(&s.pattern, &event.subject)) {
            let waiting = slot.backlog.fetch_add(1, Ordering::AcqRel) + 1;
            match slot.sender.send(Arc::clone(&event)) {
                Ok(()) => {
                    routed += 1;
                    if waiting == self.backlog_warn.saturating_add(1) {
                        tracing::warn!(
                            subscription = %slot.id,
                            handler = %slot.handler,
                            subject = %event.subject,
                            backlog = waiting,
                            "Subscriber is falling behind"
                        );
                    }
                }
                Err(_) => {
                    slot.backlog.fetch_sub(1, Ordering::AcqRel);
                    self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        subscription = %slot.id,
                        handler = %slot.handler,
                        subject = %event.subject,
                        "Subscriber worker gone, event dropped"
                    );
                }
            }
        }

        routed
    }

    /// Snapshot of delivery counters.
    pub async fn stats(&self) -> EventBusStats {
        let slots = self.slots.read().await;
        EventBusStats {
            events_published: self.counters.published.load(Ordering::Relaxed),
            events_delivered: self.counters.delivered.load(Ordering::Relaxed),
            delivery_failures: self.counters.failures.load(Ordering::Relaxed),
            events_dropped: self.counters.dropped.load(Ordering::Relaxed),
            events_pending: slots
                .iter()
                .map(|slot| slot.backlog.load(Ordering::Acquire) as u64)
                .sum(),
            active_subscriptions: slots.len(),
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        for slot in self.slots.get_mut().drain(..) {
            slot.worker.abort();
        }
    }
}

/// Worker loop of one subscription.
async fn deliver(
    id: SubscriptionId,
    handler: Arc<dyn EventHandler>,
    mut receiver: mpsc::UnboundedReceiver<Arc<Event>>,
    backlog: Arc<AtomicUsize>,
    counters: Arc<Counters>,
) {
    while let Some(event) = receiver.recv().await {
        backlog.fetch_sub(1, Ordering::AcqRel);
        let outcome = AssertUnwindSafe(handler.handle(Arc::clone(&event)))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                counters.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    subscription = %id,
                    handler = handler.name(),
                    subject = %event.subject,
                    trace = %event.trace,
                    error = %e,
                    "Event handler failed"
                );
            }
            Err(panic) => {
                counters.failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    subscription = %id,
                    handler = handler.name(),
                    subject = %event.subject,
                    trace = %event.trace,
                    panic = %panic_message(panic.as_ref()),
                    "Event handler panicked"
                );
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

//! Timer task.
//!
//! Publishes a numbered [`Tact`] on [`subjects::TIMER`] at a fixed interval.
//! All ticks of one run share a trace. The task also subscribes a
//! `TimerHandler` that logs each tick it receives.
//!
//! Keys: `interval` (seconds, default 1), `interval_ms` (wins over
//! `interval`), `ticks` (stop after this many, 0 = never).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use taskbus_config::ConfigurationError;
use taskbus_events::{new_trace, subjects, Event, JSON_CODING};

use crate::context::Context;
use crate::error::TaskError;
use crate::registry::TaskRegistry;
use crate::task::Task;

/// Registered task name.
pub const NAME: &str = "timer";

/// Name of the subscription logging received ticks.
pub const HANDLER_NAME: &str = "TimerHandler";

/// Tick payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tact {
    pub number: u64,
}

/// Periodic tick publisher.
#[derive(Debug, Default)]
pub struct Timer;

fn interval(ctx: &Context) -> Duration {
    let config = ctx.config();
    match config.get_i64("interval_ms") {
        Some(ms) => Duration::from_millis(ms.max(1) as u64),
        None => Duration::from_secs(config.get_int_or("interval", 1).max(1) as u64),
    }
}

#[async_trait]
impl Task for Timer {
    async fn run(&self, ctx: Context) -> Result<(), TaskError> {
        let period = interval(&ctx);
        let ticks = ctx.config().get_int_or("ticks", 0).max(0) as u64;

        ctx.subscribe_fn(subjects::TIMER, HANDLER_NAME, |event, hctx| async move {
            let tact: Tact = event.decode()?;
            tracing::debug!(parent: hctx.log(), number = tact.number, "Tact");
            Ok::<_, TaskError>(())
        })
        .await?;

        let trace = new_trace();
        let ctx = ctx.with_trace(&trace);
        tracing::info!(parent: ctx.log(), interval_ms = period.as_millis() as u64, ticks, "Timer started");

        let mut number: u64 = 0;
        loop {
            let event = Event::with_data(trace.as_str(), subjects::TIMER, JSON_CODING, &Tact { number })?;
            if let Err(e) = ctx.publish(event).await {
                tracing::error!(parent: ctx.log(), number, error = %e, "Failed to publish tick");
            }

            number += 1;
            if ticks > 0 && number >= ticks {
                break;
            }
            tokio::time::sleep(period).await;
        }

        tracing::info!(parent: ctx.log(), ticks = number, "Timer finished");
        Ok(())
    }
}

/// Register the timer task.
pub fn register(registry: &mut TaskRegistry) -> Result<(), ConfigurationError> {
    registry.register(NAME, Arc::new(Timer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskbus_config::ConfigSection;
    use taskbus_events::{EventBus, FnHandler, HandlerError, MemoryEventBus};
    use tokio::sync::mpsc;

    #[test]
    fn test_interval_keys() {
        let bus: Arc<dyn EventBus> = Arc::new(MemoryEventBus::new());
        let ctx = |config: serde_json::Value| Context::new(NAME, ConfigSection::new(config), bus.clone());

        assert_eq!(interval(&ctx(json!({}))), Duration::from_secs(1));
        assert_eq!(interval(&ctx(json!({ "interval": 10 }))), Duration::from_secs(10));
        assert_eq!(
            interval(&ctx(json!({ "interval": 10, "interval_ms": 20 }))),
            Duration::from_millis(20)
        );
    }

    #[tokio::test]
    async fn test_publishes_numbered_ticks_under_one_trace() {
        let bus: Arc<dyn EventBus> = Arc::new(MemoryEventBus::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        bus.subscribe(
            subjects::TIMER,
            FnHandler::arc("collector", move |event: Arc<Event>| {
                let tx = tx.clone();
                async move {
                    let tact: Tact = event.decode()?;
                    let _ = tx.send((tact.number, event.trace.clone()));
                    Ok::<_, HandlerError>(())
                }
            }),
        )
        .await
        .unwrap();

        let ctx = Context::new(
            NAME,
            ConfigSection::new(json!({ "interval_ms": 1, "ticks": 3 })),
            bus.clone(),
        );
        Timer.run(ctx).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            let tick = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(tick);
        }

        assert_eq!(
            seen.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert!(seen.iter().all(|(_, trace)| *trace == seen[0].1));

        // collector + TimerHandler
        assert_eq!(bus.stats().await.active_subscriptions, 2);
    }

    #[test]
    fn test_register() {
        let mut registry = TaskRegistry::new();
        register(&mut registry).unwrap();
        assert!(register(&mut registry).is_err());
        assert_eq!(registry.names(), vec![NAME.to_string()]);
    }
}

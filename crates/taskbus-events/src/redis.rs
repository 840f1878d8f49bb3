//! Redis-backed event bus for multi-process deployments.
//!
//! This module provides a Redis pub/sub transport, enabling tasks running in
//! several processes to share one bus. Envelopes travel as JSON on channels
//! named `{prefix}:{subject}`; every process runs one listener that hands
//! received envelopes to its local [`Dispatcher`].

use crate::adapter::{backlog_warn, AdapterFactory, AdapterRegistry, BusBuildError};
use crate::bus::{
    check_publish_subject, EventBus, EventBusError, EventBusResult, EventBusStats, EventHandler, SubscriptionId,
};
use crate::dispatch::Dispatcher;
use crate::types::Event;
use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::sync::Arc;
use taskbus_config::{ConfigSection, ConfigurationError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Default Redis URL.
pub const DEFAULT_URL: &str = "redis://127.0.0.1:6379";

/// Default channel prefix.
pub const DEFAULT_PREFIX: &str = "taskbus";

/// Redis event bus configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisEventBusConfig {
    /// Redis connection URL (e.g., redis://localhost:6379).
    pub url: String,

    /// Prefix for all channels.
    pub prefix: String,

    /// Backlog per subscription above which a slow subscriber is logged.
    pub backlog_warn: usize,
}

impl RedisEventBusConfig {
    /// Read `url`, `prefix` and `backlog_warn` from a bus section.
    pub fn from_section(config: &ConfigSection) -> Result<Self, ConfigurationError> {
        let prefix = config.get_string_or("prefix", DEFAULT_PREFIX);
        if prefix.is_empty() || prefix.contains('*') {
            return Err(ConfigurationError::invalid(
                "bus.prefix",
                "must be non-empty and free of wildcards",
            ));
        }
        Ok(Self {
            url: config.get_string_or("url", DEFAULT_URL),
            prefix,
            backlog_warn: backlog_warn(config)?,
        })
    }

    /// Channel carrying `subject`.
    pub fn channel(&self, subject: &str) -> String {
        format!("{}:{}", self.prefix, subject)
    }
}

/// Redis-backed event bus.
///
/// Uses Redis pub/sub for cross-process distribution. Publishing goes through
/// one multiplexed connection, so events from one publisher keep their order.
///
/// # Example
///
/// ```rust,no_run
/// use taskbus_config::ConfigSection;
/// use taskbus_events::redis::{RedisEventBus, RedisEventBusConfig};
///
/// async fn example() -> Result<(), Box<dyn std::error::Error>> {
///     let config = RedisEventBusConfig::from_section(&ConfigSection::empty())?;
///     let bus = RedisEventBus::connect(config).await?;
///     bus.start_listener().await?;
///     Ok(())
/// }
/// ```
pub struct RedisEventBus {
    /// Redis client
    client: Client,

    /// Connection used for PUBLISH
    conn: MultiplexedConnection,

    /// Configuration
    config: RedisEventBusConfig,

    /// Local delivery
    dispatcher: Arc<Dispatcher>,

    /// Background listener task handle
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl RedisEventBus {
    /// Adapter name.
    pub const ADAPTER: &'static str = "redis";

    /// Connect to Redis. The listener is not started yet.
    pub async fn connect(config: RedisEventBusConfig) -> EventBusResult<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| EventBusError::ConnectionError(e.to_string()))?;

        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| EventBusError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            conn,
            dispatcher: Arc::new(Dispatcher::new(config.backlog_warn)),
            config,
            listener: Mutex::new(None),
        })
    }

    /// Start the Redis subscription listener.
    ///
    /// Spawns a background task that receives envelopes from Redis and hands
    /// them to local subscribers. Calling it again is a no-op.
    pub async fn start_listener(&self) -> EventBusResult<()> {
        let mut handle = self.listener.lock().await;
        if handle.is_some() {
            return Ok(());
        }

        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| EventBusError::ConnectionError(e.to_string()))?;

        let pattern = format!("{}:*", self.config.prefix);
        pubsub
            .psubscribe(&pattern)
            .await
            .map_err(|e| EventBusError::SubscribeError(e.to_string()))?;

        tracing::info!(pattern = %pattern, "Redis event bus listener started");

        let dispatcher = self.dispatcher.clone();
        *handle = Some(tokio::spawn(async move {
            let mut messages = pubsub.on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to get message payload");
                        continue;
                    }
                };

                match serde_json::from_str::<Event>(&payload) {
                    Ok(event) => {
                        dispatcher.dispatch(event).await;
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            channel = %msg.get_channel_name(),
                            "Failed to deserialize event"
                        );
                    }
                }
            }
            tracing::warn!("Redis pub/sub stream ended");
        }));

        Ok(())
    }

    /// Stop the Redis subscription listener.
    pub async fn stop_listener(&self) {
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
        }
    }

    /// Configuration in use.
    pub fn config(&self) -> &RedisEventBusConfig {
        &self.config
    }
}

impl Drop for RedisEventBus {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    fn adapter(&self) -> &str {
        Self::ADAPTER
    }

    /// Publish an event to Redis.
    ///
    /// Local subscribers receive it once the listener reads it back, like
    /// subscribers in any other process.
    async fn publish(&self, event: Event) -> EventBusResult<()> {
        check_publish_subject(&event.subject)?;
        let channel = self.config.channel(&event.subject);
        let payload = serde_json::to_string(&event)
            .map_err(|e| EventBusError::SerializationError(e.to_string()))?;

        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(&channel, &payload)
            .await
            .map_err(|e| EventBusError::PublishError(e.to_string()))?;

        tracing::debug!(channel = %channel, trace = %event.trace, "Published event to Redis");

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

/// Factory for [`RedisEventBus`]; starts the listener before handing the bus out.
#[derive(Debug, Default)]
pub struct RedisAdapter;

#[async_trait]
impl AdapterFactory for RedisAdapter {
    async fn create(&self, config: &ConfigSection) -> Result<Arc<dyn EventBus>, BusBuildError> {
        let bus = RedisEventBus::connect(RedisEventBusConfig::from_section(config)?).await?;
        bus.start_listener().await?;
        Ok(Arc::new(bus))
    }
}

/// Register the `redis` adapter.
pub fn register(registry: &mut AdapterRegistry) -> Result<(), ConfigurationError> {
    registry.register(RedisEventBus::ADAPTER, Arc::new(RedisAdapter))
}

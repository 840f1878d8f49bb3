//! Bus adapter registry
//!
//! A transport is selected by name exactly once, when the bus is built. Each
//! transport module contributes a registration function and the host calls
//! them in one ordered bootstrap sequence:
//!
//! ```rust
//! use taskbus_config::ConfigSection;
//! use taskbus_events::AdapterRegistry;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let adapters = AdapterRegistry::with_defaults()?;
//! println!("adapters: {:?}", adapters.names());
//!
//! let bus = adapters
//!     .create_bus(&ConfigSection::new(json!({ "adapter": "memory" })))
//!     .await?;
//! assert_eq!(bus.adapter(), "memory");
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use taskbus_config::{ConfigSection, ConfigurationError};
use thiserror::Error;

use crate::bus::{EventBus, EventBusError, MemoryEventBus, DEFAULT_BACKLOG_WARN};

/// Config key naming the adapter.
pub const ADAPTER_KEY: &str = "adapter";

/// Config key of the slow-subscriber warning threshold.
pub const BACKLOG_WARN_KEY: &str = "backlog_warn";

/// Adapter used when the bus section does not name one.
pub const DEFAULT_ADAPTER: &str = MemoryEventBus::ADAPTER;

/// Builds one kind of transport from its configuration section.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    /// Construct the transport.
    async fn create(&self, config: &ConfigSection) -> Result<Arc<dyn EventBus>, BusBuildError>;
}

/// Failure to build the bus.
#[derive(Debug, Error)]
pub enum BusBuildError {
    /// Unknown adapter or malformed bus section
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The adapter could not start its transport
    #[error(transparent)]
    Transport(#[from] EventBusError),
}

/// Adapter name to factory mapping.
#[derive(Default)]
pub struct AdapterRegistry {
    factories: BTreeMap<String, Arc<dyn AdapterFactory>>,
}

impl AdapterRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every adapter compiled into this crate.
    pub fn with_defaults() -> Result<Self, ConfigurationError> {
        let mut registry = Self::new();
        register_defaults(&mut registry)?;
        Ok(registry)
    }

    /// Register `factory` under `name`.
    ///
    /// A name can only be taken once; the first registration stays in place.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: Arc<dyn AdapterFactory>,
    ) -> Result<(), ConfigurationError> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(ConfigurationError::DuplicateRegistration {
                kind: "adapter",
                name,
            });
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Registered adapter names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Factory registered under `name`.
    pub fn get(&self, name: &str) -> Option<Arc<dyn AdapterFactory>> {
        self.factories.get(name).cloned()
    }

    /// Build the bus named by the `adapter` key of `config`.
    ///
    /// The whole section is handed to the factory, so transport settings live
    /// next to the adapter name.
    pub async fn create_bus(
        &self,
        config: &ConfigSection,
    ) -> Result<Arc<dyn EventBus>, BusBuildError> {
        if config.exists(ADAPTER_KEY) && config.get_str(ADAPTER_KEY).is_none() {
            return Err(ConfigurationError::invalid("bus.adapter", "must be a string").into());
        }
        let name = config.get_string_or(ADAPTER_KEY, DEFAULT_ADAPTER);
        let factory = self
            .get(&name)
            .ok_or_else(|| ConfigurationError::UnknownAdapter {
                name: name.clone(),
                available: self.names(),
            })?;

        let bus = factory.create(config).await?;
        tracing::info!(adapter = %name, "Event bus created");
        Ok(bus)
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("adapters", &self.names())
            .finish()
    }
}

/// Slow-subscriber warning threshold from a bus section.
pub(crate) fn backlog_warn(config: &ConfigSection) -> Result<usize, ConfigurationError> {
    let Some(n) = config.get_i64(BACKLOG_WARN_KEY) else {
        if config.exists(BACKLOG_WARN_KEY) {
            return Err(ConfigurationError::invalid(
                "bus.backlog_warn",
                "must be an integer",
            ));
        }
        return Ok(DEFAULT_BACKLOG_WARN);
    };
    match usize::try_from(n) {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigurationError::invalid(
            "bus.backlog_warn",
            format!("must be a positive integer, got {n}"),
        )),
    }
}

/// Factory for [`MemoryEventBus`].
#[derive(Debug, Default)]
pub struct MemoryAdapter;

#[async_trait]
impl AdapterFactory for MemoryAdapter {
    async fn create(&self, config: &ConfigSection) -> Result<Arc<dyn EventBus>, BusBuildError> {
        let backlog_warn = backlog_warn(config)?;
        Ok(Arc::new(MemoryEventBus::with_backlog_warn(backlog_warn)))
    }
}

/// Register every adapter compiled into this crate.
pub fn register_defaults(registry: &mut AdapterRegistry) -> Result<(), ConfigurationError> {
    registry.register(MemoryEventBus::ADAPTER, Arc::new(MemoryAdapter))?;

    #[cfg(feature = "redis")]
    crate::redis::register(registry)?;

    Ok(())
}

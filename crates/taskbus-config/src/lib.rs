//! # taskbus config
//!
//! Scoped configuration for taskbus tasks and bus transports.
//!
//! ## Overview
//!
//! Every task receives only its own configuration subtree. The host loads the
//! full document however it likes (YAML, JSON, environment) and hands it over
//! as a `serde_json::Value`; from there everything is a [`ConfigSection`].
//!
//! ```rust
//! use taskbus_config::ConfigSection;
//! use serde_json::json;
//!
//! let root = ConfigSection::new(json!({
//!     "bus": { "adapter": "memory" },
//!     "timer": { "interval": 5 }
//! }));
//!
//! let timer = root.get("timer");
//! assert_eq!(timer.get_int_or("interval", 1), 5);
//! assert!(!timer.exists("adapter"));
//! ```
//!
//! ## Errors
//!
//! [`ConfigurationError`] covers everything that must abort startup: duplicate
//! registrations, unknown adapters and malformed values.

pub mod error;
pub mod section;

pub use error::ConfigurationError;
pub use section::ConfigSection;

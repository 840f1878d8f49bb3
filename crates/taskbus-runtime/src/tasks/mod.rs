//! Built-in tasks.
//!
//! Each task module exposes a `register` function; [`register_all`] calls
//! them in order.

pub mod timer;

use taskbus_config::ConfigurationError;

use crate::registry::TaskRegistry;

/// Register every built-in task.
pub fn register_all(registry: &mut TaskRegistry) -> Result<(), ConfigurationError> {
    timer::register(registry)?;
    Ok(())
}

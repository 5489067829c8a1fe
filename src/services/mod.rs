//! Services shipped with the host.
//!
//! - [`monitoring`]: samples process uptime and system load
//! - [`clock`]: reports the current time in a configured offset and format

pub mod clock;
pub mod monitoring;

use crate::error::Result;
use crate::service::ServiceRegistry;
use std::sync::Arc;

pub use clock::ClockService;
pub use monitoring::MonitoringService;

/// Add the built-in services to `registry`
pub fn register_builtin(registry: &mut ServiceRegistry) -> Result<()> {
    registry.register(monitoring::descriptor(), |name| {
        Arc::new(MonitoringService::new(name))
    })?;
    registry.register(clock::descriptor(), |name| Arc::new(ClockService::new(name)))?;
    Ok(())
}

//! The capability every pluggable service implements.
//!
//! All methods take `&self`: implementations keep their mutable state
//! behind their own locks so that health checks and sub-surface calls can
//! run while a start or stop is still in flight.

use crate::error::{Error, Result};
use crate::service::descriptor::ServiceOptions;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Health status token reported by a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Operating normally
    Healthy,
    /// Working, but impaired or not fully up
    Degraded,
    /// Not working
    Unhealthy,
}

/// Result of a health check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Status token
    pub status: HealthStatus,
    /// Optional diagnostic detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthReport {
    /// A healthy report without detail
    pub fn healthy() -> Self {
        Self {
            status: HealthStatus::Healthy,
            detail: None,
        }
    }

    /// A degraded report
    pub fn degraded(detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            detail: Some(detail.into()),
        }
    }

    /// An unhealthy report
    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            detail: Some(detail.into()),
        }
    }
}

/// A pluggable unit of functionality driven by the
/// [`ServiceManager`](crate::service::ServiceManager).
///
/// The manager guarantees that `configure`, `start` and `stop` are never
/// called concurrently for the same instance, and that `call` is only
/// routed while the instance is running.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use service_host::service::{HealthReport, Service, ServiceOptions};
/// use service_host::Result;
///
/// struct Noop;
///
/// #[async_trait]
/// impl Service for Noop {
///     async fn configure(&self, _options: &ServiceOptions) -> Result<()> { Ok(()) }
///     async fn start(&self) -> Result<()> { Ok(()) }
///     async fn stop(&self) -> Result<()> { Ok(()) }
///     async fn health(&self) -> HealthReport { HealthReport::healthy() }
/// }
/// ```
#[async_trait]
pub trait Service: Send + Sync {
    /// Validate and store options. Called before `start`, and again on
    /// every retry; must be idempotent.
    async fn configure(&self, options: &ServiceOptions) -> Result<()>;

    /// Become operational.
    async fn start(&self) -> Result<()>;

    /// Release whatever `start` acquired. Stopping a stopped service is a no-op.
    async fn stop(&self) -> Result<()>;

    /// Report current health. Should return quickly; the manager gives up
    /// after the configured health-check timeout.
    async fn health(&self) -> HealthReport;

    /// Names of the operations this service exposes.
    fn operations(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Handle a sub-surface operation.
    async fn call(&self, operation: &str, _payload: Value) -> Result<Value> {
        Err(Error::UnknownOperation {
            service: String::new(),
            operation: operation.to_string(),
        })
    }
}

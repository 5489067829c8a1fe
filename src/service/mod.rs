//! Service lifecycle and composition engine.
//!
//! Leaves first: [`state`] holds the lifecycle table, [`contract`] the
//! [`Service`] trait, [`descriptor`] and [`registry`] the catalog of
//! implementations. [`instance`] drives one service, [`manager`] drives
//! all of them and [`monitor`] watches their health.

pub mod contract;
pub mod descriptor;
pub mod instance;
pub mod lifecycle;
pub mod manager;
pub mod monitor;
pub mod registry;
pub mod state;

pub use contract::{HealthReport, HealthStatus, Service};
pub use descriptor::{Capabilities, OptionKind, OptionSpec, ServiceDescriptor, ServiceOptions};
pub use instance::{ErrorRecord, InstanceSnapshot, ServiceRuntimeInstance};
pub use lifecycle::{LifecycleLog, ServiceEvent};
pub use manager::{
    ManagerSettings, ManagerSnapshot, ServiceHealth, ServiceManager, ShutdownOutcome,
    ShutdownReport, StopFailure,
};
pub use monitor::{MonitorRound, ServiceMonitor, ServiceMonitorConfig};
pub use registry::{ServiceFactory, ServiceRegistry};
pub use state::{ServiceState, Trigger};

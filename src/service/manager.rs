//! Drives every enabled service instance.
//!
//! The manager owns a fixed set of [`ServiceRuntimeInstance`]s built once at
//! startup. Bulk operations fan out one tokio task per instance so that a
//! slow or failing service never holds up its siblings.

use crate::config::ServiceConfig;
use crate::error::{Error, Result};
use crate::service::contract::HealthReport;
use crate::service::instance::{ErrorRecord, InstanceSnapshot, ServiceRuntimeInstance};
use crate::service::lifecycle::LifecycleLog;
use crate::service::registry::ServiceRegistry;
use crate::service::state::ServiceState;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Manager settings
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Upper bound on a single service health check
    pub health_check_timeout: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            health_check_timeout: Duration::from_secs(2),
        }
    }
}

/// Status of every instance at one point in time
#[derive(Debug, Clone, Serialize)]
pub struct ManagerSnapshot {
    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,
    /// Instance snapshots by name
    pub services: BTreeMap<String, InstanceSnapshot>,
}

impl ManagerSnapshot {
    /// State of one service, if present
    pub fn state_of(&self, name: &str) -> Option<ServiceState> {
        self.services.get(name).map(|s| s.state)
    }

    /// Number of services in `state`
    pub fn count_in(&self, state: ServiceState) -> usize {
        self.services.values().filter(|s| s.state == state).count()
    }
}

/// Health of one service together with its lifecycle status
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    /// Lifecycle state when the check began
    pub state: ServiceState,
    /// Health report
    pub health: HealthReport,
    /// Last failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorRecord>,
    /// Last time the service reached RUNNING
    pub started_at: Option<DateTime<Utc>>,
    /// Last time the service reached STOPPED
    pub stopped_at: Option<DateTime<Utc>>,
}

/// A service whose stop failed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopFailure {
    /// Service name
    pub service: String,
    /// Failure message
    pub message: String,
}

/// How the coordinated shutdown went
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownOutcome {
    /// Every stop completed successfully
    Clean,
    /// Every stop finished in time but some failed
    Degraded,
    /// At least one stop was still running at the deadline
    TimedOut,
}

impl ShutdownOutcome {
    /// Process exit code for this outcome
    pub fn exit_code(self, strict: bool) -> u8 {
        match self {
            ShutdownOutcome::Clean => 0,
            ShutdownOutcome::Degraded if strict => 1,
            ShutdownOutcome::Degraded => 0,
            ShutdownOutcome::TimedOut => 2,
        }
    }
}

/// Result of [`ServiceManager::stop_all`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    /// Services stopped cleanly
    pub stopped: Vec<String>,
    /// Services whose stop failed within the grace period
    pub failed: Vec<StopFailure>,
    /// Services still stopping at the deadline
    pub timed_out: Vec<String>,
}

impl ShutdownReport {
    /// Overall outcome
    pub fn outcome(&self) -> ShutdownOutcome {
        if !self.timed_out.is_empty() {
            ShutdownOutcome::TimedOut
        } else if !self.failed.is_empty() {
            ShutdownOutcome::Degraded
        } else {
            ShutdownOutcome::Clean
        }
    }
}

/// Service manager
///
/// Shared behind an `Arc` by the application, the control plane, the
/// monitor and the HTTP handlers. All methods take `&self`.
pub struct ServiceManager {
    /// Instances in enabled order
    instances: Vec<Arc<ServiceRuntimeInstance>>,
    /// Name to position in `instances`
    index: HashMap<String, usize>,
    /// Lifecycle event log
    lifecycle: Arc<LifecycleLog>,
    /// Settings
    settings: ManagerSettings,
}

impl ServiceManager {
    /// Build a manager for the enabled services.
    ///
    /// Resolution, option validation and `configure` all happen before the
    /// manager is returned. Any failure aborts the whole build.
    #[tracing::instrument(skip(registry, services, settings), fields(num_services = enabled.len()))]
    pub async fn build(
        registry: &ServiceRegistry,
        enabled: &[String],
        services: &BTreeMap<String, ServiceConfig>,
        settings: ManagerSettings,
    ) -> Result<Self> {
        let descriptors = registry.resolve(enabled)?;

        let empty = ServiceConfig::default();
        let mut problems = Vec::new();
        let mut resolved = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let service_config = services.get(descriptor.name()).unwrap_or(&empty);
            match descriptor.resolve_options(&service_config.options) {
                Ok(options) => resolved.push((descriptor, options, service_config.metadata.clone())),
                Err(e) => problems.push(e),
            }
        }

        for problem in &problems {
            tracing::error!(error = %problem, "Service options rejected");
        }
        if let Some(first) = problems.into_iter().next() {
            return Err(first);
        }

        let lifecycle = Arc::new(LifecycleLog::new());
        let mut instances = Vec::with_capacity(resolved.len());
        let mut index = HashMap::with_capacity(resolved.len());

        for (descriptor, options, metadata) in resolved {
            let service = registry.instantiate(descriptor.name())?;
            let instance = Arc::new(ServiceRuntimeInstance::new(
                Arc::clone(&descriptor),
                service,
                options,
                metadata,
                Arc::clone(&lifecycle),
            ));
            instance.register()?;
            instance.configure().await?;

            index.insert(descriptor.name().to_string(), instances.len());
            instances.push(instance);
        }

        tracing::info!(services = ?index.keys().collect::<Vec<_>>(), "Service manager built");
        Ok(Self {
            instances,
            index,
            lifecycle,
            settings,
        })
    }

    /// Build a manager with no services
    pub fn empty(settings: ManagerSettings) -> Self {
        Self {
            instances: Vec::new(),
            index: HashMap::new(),
            lifecycle: Arc::new(LifecycleLog::new()),
            settings,
        }
    }

    fn instance(&self, name: &str) -> Result<&Arc<ServiceRuntimeInstance>> {
        self.index
            .get(name)
            .map(|&i| &self.instances[i])
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))
    }

    /// Start every instance that can be started, concurrently.
    ///
    /// A failing or panicking service ends in ERROR without affecting the
    /// others. Returns the status once every start has finished.
    #[tracing::instrument(skip(self))]
    pub async fn start_all(&self) -> ManagerSnapshot {
        let tasks = self
            .instances
            .iter()
            .filter(|i| i.state().can_start())
            .map(|instance| {
                let worker = Arc::clone(instance);
                let handle = tokio::spawn(async move { worker.start().await });
                (Arc::clone(instance), handle)
            })
            .collect::<Vec<_>>();

        tracing::info!(num_services = tasks.len(), "Starting services");

        join_all(tasks.into_iter().map(|(instance, handle)| async move {
            match handle.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(service = %instance.name(), error = %e, "Service did not start")
                }
                Err(e) => {
                    tracing::error!(service = %instance.name(), error = %e, "Start task panicked");
                    instance.force_error(format!("start task failed: {}", e));
                }
            }
        }))
        .await;

        let snapshot = self.snapshot();
        tracing::info!(
            running = snapshot.count_in(ServiceState::Running),
            failed = snapshot.count_in(ServiceState::Error),
            "Start complete"
        );
        snapshot
    }

    /// Stop every RUNNING instance, concurrently, within `grace`.
    ///
    /// Stops still in flight at the deadline are marked ERROR and their
    /// late completion is ignored. The stop tasks themselves keep running.
    #[tracing::instrument(skip(self))]
    pub async fn stop_all(&self, grace: Duration) -> ShutdownReport {
        let deadline = Instant::now() + grace;

        let tasks = self
            .instances
            .iter()
            .filter(|i| i.state() == ServiceState::Running)
            .map(|instance| {
                let worker = Arc::clone(instance);
                let handle = tokio::spawn(async move { worker.stop().await });
                (Arc::clone(instance), handle)
            })
            .collect::<Vec<_>>();

        tracing::info!(num_services = tasks.len(), grace = ?grace, "Stopping services");

        let results = join_all(tasks.into_iter().map(|(instance, handle)| async move {
            let result = tokio::time::timeout_at(deadline, handle).await;
            (instance, result)
        }))
        .await;

        let mut report = ShutdownReport::default();
        for (instance, result) in results {
            let name = instance.name().to_string();
            match result {
                Ok(Ok(Ok(_))) => report.stopped.push(name),
                Ok(Ok(Err(e))) => report.failed.push(StopFailure {
                    service: name,
                    message: e.to_string(),
                }),
                Ok(Err(e)) => {
                    tracing::error!(service = %name, error = %e, "Stop task panicked");
                    instance.force_error(format!("stop task failed: {}", e));
                    report.failed.push(StopFailure {
                        service: name,
                        message: e.to_string(),
                    });
                }
                Err(_) => {
                    tracing::error!(service = %name, grace = ?grace, "Stop did not complete in time");
                    instance.force_error(format!(
                        "stop timed out after {}ms",
                        grace.as_millis()
                    ));
                    report.timed_out.push(name);
                }
            }
        }

        tracing::info!(
            stopped = report.stopped.len(),
            failed = report.failed.len(),
            timed_out = report.timed_out.len(),
            "Shutdown complete"
        );
        report
    }

    /// Start one service
    #[tracing::instrument(skip(self))]
    pub async fn start(&self, name: &str) -> Result<ServiceState> {
        self.instance(name)?.start().await
    }

    /// Stop one service. Stopping a STOPPED service is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self, name: &str) -> Result<ServiceState> {
        self.instance(name)?.stop().await
    }

    /// Retry a service in ERROR
    #[tracing::instrument(skip(self))]
    pub async fn retry(&self, name: &str) -> Result<ServiceState> {
        self.instance(name)?.retry().await
    }

    /// Stop a running service (if running) and start it again.
    ///
    /// A service in ERROR is retried instead.
    #[tracing::instrument(skip(self))]
    pub async fn restart(&self, name: &str) -> Result<ServiceState> {
        let instance = self.instance(name)?;
        match instance.state() {
            ServiceState::Running => {
                instance.stop().await?;
                instance.start().await
            }
            ServiceState::Error => instance.retry().await,
            _ => instance.start().await,
        }
    }

    /// Record a runtime fault detected outside the service
    #[tracing::instrument(skip(self, message))]
    pub async fn report_fault(&self, name: &str, message: impl Into<String>) -> Result<ServiceState> {
        self.instance(name)?.fault(message).await
    }

    /// Status of every instance
    pub fn snapshot(&self) -> ManagerSnapshot {
        ManagerSnapshot {
            taken_at: Utc::now(),
            services: self
                .instances
                .iter()
                .map(|i| (i.name().to_string(), i.snapshot()))
                .collect(),
        }
    }

    /// Status of one instance
    pub fn instance_snapshot(&self, name: &str) -> Result<InstanceSnapshot> {
        Ok(self.instance(name)?.snapshot())
    }

    /// Health of one service
    pub async fn health(&self, name: &str) -> Result<ServiceHealth> {
        let instance = self.instance(name)?;
        Ok(self.check(instance).await)
    }

    /// Health of every service, checked concurrently
    pub async fn health_all(&self) -> BTreeMap<String, ServiceHealth> {
        let checks = self.instances.iter().map(|instance| async move {
            (instance.name().to_string(), self.check(instance).await)
        });
        join_all(checks).await.into_iter().collect()
    }

    async fn check(&self, instance: &ServiceRuntimeInstance) -> ServiceHealth {
        let snapshot = instance.snapshot();
        let health = instance.health(self.settings.health_check_timeout).await;
        ServiceHealth {
            state: snapshot.state,
            health,
            last_error: snapshot.last_error,
            started_at: snapshot.started_at,
            stopped_at: snapshot.stopped_at,
        }
    }

    /// Route a sub-surface operation to a running service
    #[tracing::instrument(skip(self, payload))]
    pub async fn dispatch(&self, name: &str, operation: &str, payload: Value) -> Result<Value> {
        self.instance(name)?.dispatch(operation, payload).await
    }

    /// Service names in enabled order
    pub fn names(&self) -> Vec<String> {
        self.instances.iter().map(|i| i.name().to_string()).collect()
    }

    /// Name and description of every service
    pub fn descriptions(&self) -> Map<String, Value> {
        self.instances
            .iter()
            .map(|i| {
                (
                    i.name().to_string(),
                    Value::String(i.descriptor().description().to_string()),
                )
            })
            .collect()
    }

    /// Whether `name` is managed here
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of managed services
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether no services are managed
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Lifecycle event log
    pub fn lifecycle(&self) -> &Arc<LifecycleLog> {
        &self.lifecycle
    }
}

impl std::fmt::Debug for ServiceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceManager")
            .field("services", &self.names())
            .finish()
    }
}

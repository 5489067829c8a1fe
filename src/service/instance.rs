use crate::error::{Error, Result};
use crate::service::contract::{HealthReport, Service};
use crate::service::descriptor::{ServiceDescriptor, ServiceOptions};
use crate::service::lifecycle::LifecycleLog;
use crate::service::state::{ServiceState, Trigger};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

/// The last failure of an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Failure message
    pub message: String,
    /// When it happened
    pub timestamp: DateTime<Utc>,
    /// Transition the failure originated from
    pub trigger: Trigger,
}

#[derive(Debug, Clone)]
struct InstanceStatus {
    state: ServiceState,
    last_error: Option<ErrorRecord>,
    started_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

/// Point-in-time copy of one instance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstanceSnapshot {
    /// Service name
    pub name: String,
    /// Service description
    pub description: String,
    /// Current state
    pub state: ServiceState,
    /// Last failure, if any
    pub last_error: Option<ErrorRecord>,
    /// When the instance last reached RUNNING
    pub started_at: Option<DateTime<Utc>>,
    /// When the instance last reached STOPPED
    pub stopped_at: Option<DateTime<Utc>>,
    /// Time of the latest transition
    pub updated_at: DateTime<Utc>,
    /// Metadata from configuration
    pub metadata: Map<String, Value>,
    /// Resolved options
    pub options: ServiceOptions,
    /// Sub-surface operations
    pub operations: Vec<String>,
}

/// Run a service call, turning a panic into an error.
async fn guarded<F>(call: &str, future: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| {
            Err(Error::Other(format!(
                "{} panicked: {}",
                call,
                panic_message(payload.as_ref())
            )))
        })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// One enabled service, as driven by the manager.
///
/// State lives behind a short-lived `RwLock` so readers never wait for a
/// start or stop. Transitions are serialized by `gate`, a FIFO async
/// mutex held for the whole start/stop call: a second request for the same
/// instance queues behind the first instead of failing.
///
/// `epoch` is bumped whenever an in-flight transition is abandoned (stop
/// timeout, panic). A completion carrying an old epoch is discarded.
pub struct ServiceRuntimeInstance {
    /// Static identity
    descriptor: Arc<ServiceDescriptor>,
    /// The service object
    service: Arc<dyn Service>,
    /// Validated options
    options: ServiceOptions,
    /// Metadata from configuration
    metadata: Map<String, Value>,
    /// Live status
    status: RwLock<InstanceStatus>,
    /// Serializes transitions
    gate: tokio::sync::Mutex<()>,
    /// Abandonment counter
    epoch: AtomicU64,
    /// Where transitions are recorded
    lifecycle: Arc<LifecycleLog>,
}

impl ServiceRuntimeInstance {
    /// Create an instance in the UNREGISTERED state
    pub fn new(
        descriptor: Arc<ServiceDescriptor>,
        service: Arc<dyn Service>,
        options: ServiceOptions,
        metadata: Map<String, Value>,
        lifecycle: Arc<LifecycleLog>,
    ) -> Self {
        Self {
            descriptor,
            service,
            options,
            metadata,
            status: RwLock::new(InstanceStatus {
                state: ServiceState::Unregistered,
                last_error: None,
                started_at: None,
                stopped_at: None,
                updated_at: Utc::now(),
            }),
            gate: tokio::sync::Mutex::new(()),
            epoch: AtomicU64::new(0),
            lifecycle,
        }
    }

    /// Get the service name
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// Get the descriptor
    pub fn descriptor(&self) -> &Arc<ServiceDescriptor> {
        &self.descriptor
    }

    /// Get the current state
    pub fn state(&self) -> ServiceState {
        self.read_status().state
    }

    /// Get the resolved options
    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    /// Copy the current status
    pub fn snapshot(&self) -> InstanceSnapshot {
        let status = self.read_status().clone();
        InstanceSnapshot {
            name: self.name().to_string(),
            description: self.descriptor.description().to_string(),
            state: status.state,
            last_error: status.last_error,
            started_at: status.started_at,
            stopped_at: status.stopped_at,
            updated_at: status.updated_at,
            metadata: self.metadata.clone(),
            options: self.options.clone(),
            operations: self
                .service
                .operations()
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }

    // Status guards never panic: a poisoned lock still holds a consistent
    // status because every write is a single assignment block.
    fn read_status(&self) -> RwLockReadGuard<'_, InstanceStatus> {
        self.status.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write_status(&self) -> RwLockWriteGuard<'_, InstanceStatus> {
        self.status.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Apply a trigger. With `expected_epoch`, the trigger is dropped if
    /// the transition it completes has been abandoned in the meantime.
    fn apply(
        &self,
        trigger: Trigger,
        error: Option<String>,
        expected_epoch: Option<u64>,
    ) -> Result<(ServiceState, u64)> {
        let (from, to, epoch) = {
            let mut status = self.write_status();
            let epoch = self.epoch.load(Ordering::SeqCst);

            if let Some(expected) = expected_epoch {
                if expected != epoch {
                    tracing::warn!(
                        service = %self.name(),
                        trigger = %trigger,
                        "Discarding completion of an abandoned transition"
                    );
                    return Err(Error::Other(format!(
                        "transition of '{}' was abandoned",
                        self.name()
                    )));
                }
            }

            let from = status.state;
            let to = from.apply(trigger).ok_or_else(|| Error::InvalidTransition {
                service: self.name().to_string(),
                from,
                trigger,
            })?;

            let now = Utc::now();
            status.state = to;
            status.updated_at = now;
            match to {
                ServiceState::Running => {
                    status.started_at = Some(now);
                    status.last_error = None;
                }
                ServiceState::Stopped => status.stopped_at = Some(now),
                ServiceState::Error => {
                    status.last_error = Some(ErrorRecord {
                        message: error
                            .clone()
                            .unwrap_or_else(|| format!("{} failed", trigger)),
                        timestamp: now,
                        trigger,
                    });
                }
                _ => {}
            }
            (from, to, epoch)
        };

        if to == ServiceState::Error {
            tracing::warn!(service = %self.name(), from = %from, trigger = %trigger, error = ?error, "Service entered ERROR");
        } else {
            tracing::debug!(service = %self.name(), from = %from, to = %to, trigger = %trigger, "Service transition");
        }
        self.lifecycle.record(self.name(), from, to, trigger, error);

        Ok((to, epoch))
    }

    /// Move from UNREGISTERED to INITIALIZING
    pub(crate) fn register(&self) -> Result<ServiceState> {
        self.apply(Trigger::Register, None, None).map(|(s, _)| s)
    }

    /// Hand the resolved options to the service
    pub async fn configure(&self) -> Result<ServiceState> {
        let _gate = self.gate.lock().await;
        self.configure_locked().await
    }

    async fn configure_locked(&self) -> Result<ServiceState> {
        let state = self.state();
        if state.apply(Trigger::Configure).is_none() {
            return Err(Error::InvalidTransition {
                service: self.name().to_string(),
                from: state,
                trigger: Trigger::Configure,
            });
        }

        match guarded("configure", self.service.configure(&self.options)).await {
            Ok(()) => self.apply(Trigger::Configure, None, None).map(|(s, _)| s),
            Err(e) => {
                let e = match e {
                    Error::Configuration { .. } => e,
                    other => Error::configuration(self.name(), other.to_string()),
                };
                self.apply(Trigger::Fault, Some(e.to_string()), None)?;
                Err(e)
            }
        }
    }

    /// Start the service
    pub async fn start(&self) -> Result<ServiceState> {
        let _gate = self.gate.lock().await;
        self.start_locked().await
    }

    async fn start_locked(&self) -> Result<ServiceState> {
        let (_, epoch) = self.apply(Trigger::Start, None, None)?;
        tracing::info!(service = %self.name(), "Starting service");

        match guarded("start", self.service.start()).await {
            Ok(()) => {
                let (state, _) = self.apply(Trigger::StartSucceeded, None, Some(epoch))?;
                tracing::info!(service = %self.name(), "Service running");
                Ok(state)
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(service = %self.name(), error = %message, "Failed to start service");
                if let Err(e) = self.apply(Trigger::StartFailed, Some(message.clone()), Some(epoch)) {
                    tracing::debug!(service = %self.name(), error = %e, "Start failure not recorded");
                }
                Err(Error::ServiceStart {
                    service: self.name().to_string(),
                    message,
                })
            }
        }
    }

    /// Stop the service. Stopping a STOPPED instance is a no-op.
    pub async fn stop(&self) -> Result<ServiceState> {
        let _gate = self.gate.lock().await;
        self.stop_locked().await
    }

    async fn stop_locked(&self) -> Result<ServiceState> {
        if self.state() == ServiceState::Stopped {
            tracing::debug!(service = %self.name(), "Service already stopped");
            return Ok(ServiceState::Stopped);
        }

        let (_, epoch) = self.apply(Trigger::Stop, None, None)?;
        tracing::info!(service = %self.name(), "Stopping service");

        match guarded("stop", self.service.stop()).await {
            Ok(()) => {
                let (state, _) = self.apply(Trigger::StopCompleted, None, Some(epoch))?;
                tracing::info!(service = %self.name(), "Service stopped");
                Ok(state)
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(service = %self.name(), error = %message, "Failed to stop service");
                if let Err(e) = self.apply(Trigger::StopFailed, Some(message.clone()), Some(epoch)) {
                    tracing::debug!(service = %self.name(), error = %e, "Stop failure not recorded");
                }
                Err(Error::ServiceStop {
                    service: self.name().to_string(),
                    message,
                })
            }
        }
    }

    /// Retry a failed service: back to INITIALIZING, configure, start
    pub async fn retry(&self) -> Result<ServiceState> {
        let _gate = self.gate.lock().await;
        self.apply(Trigger::Retry, None, None)?;
        tracing::info!(service = %self.name(), "Retrying service");
        self.configure_locked().await?;
        self.start_locked().await
    }

    /// Record a runtime fault
    pub async fn fault(&self, message: impl Into<String>) -> Result<ServiceState> {
        let _gate = self.gate.lock().await;
        self.apply(Trigger::Fault, Some(message.into()), None)
            .map(|(s, _)| s)
    }

    /// Force the instance into ERROR without waiting for the gate.
    ///
    /// Used when an in-flight transition is abandoned. The pending
    /// completion of that transition will be discarded. Returns `false`
    /// when the current state cannot move to ERROR.
    pub(crate) fn force_error(&self, message: impl Into<String>) -> bool {
        let message = message.into();
        let trigger = match self.state() {
            ServiceState::Stopping => Trigger::StopFailed,
            ServiceState::Starting => Trigger::StartFailed,
            _ => Trigger::Fault,
        };

        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.apply(trigger, Some(message), None).is_ok()
    }

    /// Ask the service for its health, waiting at most `timeout`
    pub async fn health(&self, timeout: Duration) -> HealthReport {
        let (state, last_error) = {
            let status = self.read_status();
            (status.state, status.last_error.clone())
        };

        match state {
            ServiceState::Running => {
                match tokio::time::timeout(timeout, self.service.health()).await {
                    Ok(report) => report,
                    Err(_) => {
                        tracing::warn!(service = %self.name(), timeout = ?timeout, "Health check timed out");
                        HealthReport::degraded(format!(
                            "health check timed out after {}ms",
                            timeout.as_millis()
                        ))
                    }
                }
            }
            ServiceState::Error => HealthReport::unhealthy(
                last_error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "service is in ERROR".to_string()),
            ),
            other => HealthReport::degraded(format!("service is {}", other)),
        }
    }

    /// Forward a sub-surface call. The instance must be RUNNING.
    pub async fn dispatch(&self, operation: &str, payload: Value) -> Result<Value> {
        let state = self.state();
        if state != ServiceState::Running {
            return Err(Error::ServiceUnavailable {
                service: self.name().to_string(),
                state,
            });
        }

        if !self.service.operations().contains(&operation) {
            return Err(Error::UnknownOperation {
                service: self.name().to_string(),
                operation: operation.to_string(),
            });
        }

        tracing::debug!(service = %self.name(), operation, "Dispatching operation");
        self.service
            .call(operation, payload)
            .await
            .map_err(|e| match e {
                Error::UnknownOperation { operation, .. } => Error::UnknownOperation {
                    service: self.name().to_string(),
                    operation,
                },
                other => other,
            })
    }
}

impl fmt::Debug for ServiceRuntimeInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRuntimeInstance")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct TestService {
        panic_on_start: AtomicBool,
        start_delay: Duration,
        start_error: Option<&'static str>,
    }

    #[async_trait]
    impl Service for TestService {
        async fn configure(&self, _options: &ServiceOptions) -> Result<()> {
            Ok(())
        }

        async fn start(&self) -> Result<()> {
            tokio::time::sleep(self.start_delay).await;
            if self.panic_on_start.load(Ordering::SeqCst) {
                panic!("start exploded");
            }
            match self.start_error {
                Some(message) => Err(Error::Other(message.to_string())),
                None => Ok(()),
            }
        }

        async fn stop(&self) -> Result<()> {
            Ok(())
        }

        async fn health(&self) -> HealthReport {
            HealthReport::healthy()
        }
    }

    fn instance_with(service: Arc<TestService>) -> Arc<ServiceRuntimeInstance> {
        Arc::new(ServiceRuntimeInstance::new(
            Arc::new(ServiceDescriptor::new("test", "Test service")),
            service,
            ServiceOptions::default(),
            Map::new(),
            Arc::new(LifecycleLog::new()),
        ))
    }

    fn path_to(state: ServiceState) -> Vec<Trigger> {
        use Trigger::*;
        match state {
            ServiceState::Unregistered => vec![],
            ServiceState::Initializing => vec![Register],
            ServiceState::Starting => vec![Register, Start],
            ServiceState::Running => vec![Register, Start, StartSucceeded],
            ServiceState::Stopping => vec![Register, Start, StartSucceeded, Stop],
            ServiceState::Stopped => vec![Register, Start, StartSucceeded, Stop, StopCompleted],
            ServiceState::Error => vec![Register, Fault],
        }
    }

    #[test]
    fn test_rejected_trigger_keeps_state() {
        for state in ServiceState::ALL {
            for trigger in Trigger::ALL {
                if state.apply(trigger).is_some() {
                    continue;
                }

                let instance = instance_with(Arc::new(TestService::default()));
                for step in path_to(state) {
                    instance.apply(step, None, None).unwrap();
                }
                assert_eq!(instance.state(), state);

                let err = instance.apply(trigger, None, None).unwrap_err();
                assert!(
                    matches!(err, Error::InvalidTransition { from, trigger: t, .. } if from == state && t == trigger),
                    "unexpected error: {}",
                    err
                );
                assert_eq!(instance.state(), state, "{} --{}-->", state, trigger);
            }
        }
    }

    #[tokio::test]
    async fn test_panicking_start_lands_in_error() {
        let service = Arc::new(TestService::default());
        service.panic_on_start.store(true, Ordering::SeqCst);
        let instance = instance_with(service.clone());
        instance.register().unwrap();

        let err = instance.start().await.unwrap_err();
        assert!(matches!(err, Error::ServiceStart { .. }));
        assert!(err.to_string().contains("start exploded"));
        assert_eq!(instance.state(), ServiceState::Error);
        assert_eq!(
            instance.snapshot().last_error.map(|e| e.trigger),
            Some(Trigger::StartFailed)
        );

        service.panic_on_start.store(false, Ordering::SeqCst);
        assert_eq!(instance.retry().await.unwrap(), ServiceState::Running);
    }

    #[tokio::test]
    async fn test_abandoned_start_failure_is_returned() {
        let service = Arc::new(TestService {
            start_delay: Duration::from_millis(100),
            start_error: Some("port in use"),
            ..Default::default()
        });
        let instance = instance_with(service);
        instance.register().unwrap();

        let starting = tokio::spawn({
            let instance = Arc::clone(&instance);
            async move { instance.start().await }
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(instance.force_error("start abandoned"));

        let err = starting.await.unwrap().unwrap_err();
        match err {
            Error::ServiceStart { message, .. } => assert!(message.contains("port in use")),
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(instance.state(), ServiceState::Error);
        assert_eq!(
            instance.snapshot().last_error.map(|e| e.message),
            Some("start abandoned".to_string())
        );
    }
}

//! Transport-independent control surface.
//!
//! [`ControlPlane`] answers every status query from fresh manager
//! snapshots and turns start/stop/restart requests into background tasks,
//! so callers never wait for a service transition to finish.

use crate::error::{Error, Result};
use crate::service::{
    HealthStatus, InstanceSnapshot, ServiceEvent, ServiceHealth, ServiceManager, ServiceState,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Where the application is in its own lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationState {
    /// Built, not started
    Created,
    /// `start_all` in progress
    Starting,
    /// `start_all` returned
    Ready,
    /// Coordinated shutdown in progress
    Stopping,
    /// Shutdown finished
    Stopped,
}

/// Static application identity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppInfo {
    /// Application title
    pub title: String,
    /// Application version
    pub version: String,
    /// Deployment environment
    pub environment: String,
}

/// Aggregate health of the process
#[derive(Debug, Clone, Serialize)]
pub struct HealthOverview {
    /// Overall verdict
    pub verdict: HealthStatus,
    /// When the checks were run
    pub checked_at: DateTime<Utc>,
    /// Per-service health
    pub services: BTreeMap<String, ServiceHealth>,
}

/// Application status, as served at the API root
#[derive(Debug, Clone, Serialize)]
pub struct ApplicationStatus {
    /// Application title
    pub title: String,
    /// Application version
    pub version: String,
    /// Deployment environment
    pub environment: String,
    /// Application state
    pub state: ApplicationState,
    /// State of every service
    pub services: BTreeMap<String, ServiceState>,
}

/// Combine per-service health into one verdict.
///
/// Healthy when every service is healthy (vacuously so with none),
/// unhealthy when there is at least one service and all of them report
/// unhealthy, degraded otherwise. See [`verdict_input`] for how services
/// in ERROR are counted.
pub fn aggregate_verdict<I>(statuses: I) -> HealthStatus
where
    I: IntoIterator<Item = HealthStatus>,
{
    let mut total = 0usize;
    let mut healthy = 0usize;
    let mut unhealthy = 0usize;
    for status in statuses {
        total += 1;
        match status {
            HealthStatus::Healthy => healthy += 1,
            HealthStatus::Degraded => {}
            HealthStatus::Unhealthy => unhealthy += 1,
        }
    }

    if healthy == total {
        HealthStatus::Healthy
    } else if unhealthy == total {
        HealthStatus::Unhealthy
    } else {
        HealthStatus::Degraded
    }
}

/// Status a service contributes to the verdict.
///
/// A service in ERROR keeps its unhealthy report but only degrades the
/// process: the rest of the host keeps serving.
pub fn verdict_input(health: &ServiceHealth) -> HealthStatus {
    match health.state {
        ServiceState::Error => HealthStatus::Degraded,
        _ => health.health.status,
    }
}

struct Shared {
    manager: Arc<ServiceManager>,
    info: AppInfo,
    state: RwLock<ApplicationState>,
}

/// Control surface over a [`ServiceManager`]
///
/// Cheap to clone; every clone sees the same manager and application state.
#[derive(Clone)]
pub struct ControlPlane {
    shared: Arc<Shared>,
}

impl ControlPlane {
    /// Create a control plane in the `Created` state
    pub fn new(manager: Arc<ServiceManager>, info: AppInfo) -> Self {
        Self {
            shared: Arc::new(Shared {
                manager,
                info,
                state: RwLock::new(ApplicationState::Created),
            }),
        }
    }

    /// The underlying manager
    pub fn manager(&self) -> &Arc<ServiceManager> {
        &self.shared.manager
    }

    /// Application identity
    pub fn info(&self) -> &AppInfo {
        &self.shared.info
    }

    /// Current application state
    pub fn state(&self) -> ApplicationState {
        *self.shared.state.read().unwrap_or_else(|p| p.into_inner())
    }

    pub(crate) fn set_state(&self, state: ApplicationState) {
        *self.shared.state.write().unwrap_or_else(|p| p.into_inner()) = state;
        tracing::debug!(state = ?state, "Application state changed");
    }

    /// Whether `start_all` has returned and shutdown has not begun
    pub fn is_ready(&self) -> bool {
        self.state() == ApplicationState::Ready
    }

    /// Check every service and compute the verdict
    pub async fn health(&self) -> HealthOverview {
        let services = self.shared.manager.health_all().await;
        let verdict = aggregate_verdict(services.values().map(verdict_input));
        HealthOverview {
            verdict,
            checked_at: Utc::now(),
            services,
        }
    }

    /// Application identity, state and service states
    pub fn status(&self) -> ApplicationStatus {
        let snapshot = self.shared.manager.snapshot();
        let info = &self.shared.info;
        ApplicationStatus {
            title: info.title.clone(),
            version: info.version.clone(),
            environment: info.environment.clone(),
            state: self.state(),
            services: snapshot
                .services
                .into_iter()
                .map(|(name, s)| (name, s.state))
                .collect(),
        }
    }

    /// Name and description of every service
    pub fn services(&self) -> Map<String, Value> {
        self.shared.manager.descriptions()
    }

    /// Status of one service
    pub fn service_status(&self, name: &str) -> Result<InstanceSnapshot> {
        self.shared.manager.instance_snapshot(name)
    }

    /// Recent lifecycle events of one service, newest first
    pub fn service_events(&self, name: &str, limit: Option<usize>) -> Result<Vec<ServiceEvent>> {
        if !self.shared.manager.contains(name) {
            return Err(Error::ServiceNotFound(name.to_string()));
        }
        Ok(self.shared.manager.lifecycle().service_events(name, limit))
    }

    /// Subscribe to lifecycle events
    pub fn events(&self) -> broadcast::Receiver<ServiceEvent> {
        self.shared.manager.lifecycle().subscribe()
    }

    /// Request a start in the background
    #[tracing::instrument(skip(self))]
    pub fn request_start(&self, name: &str) -> Result<()> {
        self.spawn_request(name, Request::Start)
    }

    /// Request a stop in the background
    #[tracing::instrument(skip(self))]
    pub fn request_stop(&self, name: &str) -> Result<()> {
        self.spawn_request(name, Request::Stop)
    }

    /// Request a restart in the background
    #[tracing::instrument(skip(self))]
    pub fn request_restart(&self, name: &str) -> Result<()> {
        self.spawn_request(name, Request::Restart)
    }

    fn spawn_request(&self, name: &str, request: Request) -> Result<()> {
        let manager = Arc::clone(&self.shared.manager);
        if !manager.contains(name) {
            return Err(Error::ServiceNotFound(name.to_string()));
        }

        let name = name.to_string();
        tracing::info!(service = %name, request = ?request, "Accepted lifecycle request");
        tokio::spawn(async move {
            let result = match request {
                Request::Start => manager.start(&name).await,
                Request::Stop => manager.stop(&name).await,
                Request::Restart => manager.restart(&name).await,
            };
            match result {
                Ok(state) => tracing::info!(service = %name, request = ?request, state = %state, "Lifecycle request finished"),
                Err(e) => tracing::warn!(service = %name, request = ?request, error = %e, "Lifecycle request failed"),
            }
        });
        Ok(())
    }

    /// Route a sub-surface operation
    pub async fn dispatch(&self, name: &str, operation: &str, payload: Value) -> Result<Value> {
        self.shared.manager.dispatch(name, operation, payload).await
    }
}

#[derive(Debug, Clone, Copy)]
enum Request {
    Start,
    Stop,
    Restart,
}

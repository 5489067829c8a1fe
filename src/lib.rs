/*!
 # Service Host

 A Rust library for hosting a dynamic set of pluggable services behind one
 control surface.

 ## Overview

 Service Host provides functionality to:
 - Register service implementations and pick the active ones per deployment
 - Drive every service through a checked lifecycle (start, stop, retry)
 - Start and stop services concurrently, isolating failures
 - Aggregate health and route operations to running services
 - Optionally serve the control surface over HTTP, with an SSE event stream

 ## Basic Usage

 ```no_run
 use service_host::{Application, Result, ServiceRegistry};

 #[tokio::main]
 async fn main() -> Result<()> {
     // Built-in services plus anything the program registers itself
     let registry = ServiceRegistry::with_builtin_services()?;

     // Load the configuration and build every enabled service
     let mut app = Application::from_config_file("service-host.yaml", registry).await?;

     // Start all services, then serve the control API
     let snapshot = app.start().await;
     println!("Started: {:?}", snapshot.services.keys());
     app.serve()?;

     tokio::signal::ctrl_c().await.ok();

     // Stop everything within the configured grace period
     let report = app.shutdown().await;
     std::process::exit(app.exit_code(&report).into());
 }
 ```

 ## Features

 - **Lifecycle**: one state machine per service, illegal transitions rejected
 - **Concurrency**: per-service transition queues, no cross-service locks
 - **Configuration**: YAML/JSON files with `SERVICE_HOST_*` overrides
 - **Monitoring**: optional background health checks with automatic retry
 - **HTTP API**: status, health, readiness, lifecycle requests and events
*/

pub mod api;
pub mod config;
pub mod control;
pub mod error;
pub mod service;
pub mod services;

pub use config::Config;
pub use control::{ApplicationState, ControlPlane};
pub use error::{Error, Result};
pub use service::{
    ManagerSnapshot, Service, ServiceManager, ServiceRegistry, ServiceState, ShutdownOutcome,
    ShutdownReport,
};

use api::{ControlServer, ControlServerHandle};
use control::AppInfo;
use service::{ManagerSettings, ServiceMonitor, ServiceMonitorConfig};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

/// Composition root of the host process
///
/// Builds the service manager from configuration, starts every service,
/// serves the control surface and runs the bounded shutdown.
/// All public methods are instrumented with `tracing` spans.
pub struct Application {
    /// Configuration
    config: Config,
    /// Control plane (owns the manager)
    control: ControlPlane,
    /// Health monitor (if running)
    monitor: Option<ServiceMonitor>,
    /// HTTP server handle (if serving)
    server: Option<ControlServerHandle>,
}

impl Application {
    /// Create an application from a configuration file path.
    ///
    /// `SERVICE_HOST_*` environment variables override file values.
    #[tracing::instrument(skip(path, registry), fields(config_path = ?path.as_ref()))]
    pub async fn from_config_file(
        path: impl AsRef<Path>,
        registry: ServiceRegistry,
    ) -> Result<Self> {
        tracing::info!("Loading configuration from file");
        let mut config = Config::from_file(path)?;
        config.apply_env_overrides()?;
        Self::new(config, registry).await
    }

    /// Create an application from a configuration.
    ///
    /// Fails without starting anything if the configuration is invalid,
    /// an enabled service is unknown, or a service rejects its options.
    #[tracing::instrument(skip(config, registry), fields(title = %config.title))]
    pub async fn new(config: Config, registry: ServiceRegistry) -> Result<Self> {
        config::validate_config(&config)?;

        let enabled = config.enabled_services();
        tracing::info!(enabled = ?enabled, environment = %config.environment, "Building application");

        let settings = ManagerSettings {
            health_check_timeout: config.lifecycle.health_check_timeout(),
        };
        let manager = ServiceManager::build(&registry, &enabled, &config.services, settings).await?;

        let control = ControlPlane::new(
            Arc::new(manager),
            AppInfo {
                title: config.title.clone(),
                version: config.version.clone(),
                environment: config.environment.clone(),
            },
        );

        Ok(Self {
            config,
            control,
            monitor: None,
            server: None,
        })
    }

    /// Configuration in effect
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Control plane handle
    pub fn control(&self) -> ControlPlane {
        self.control.clone()
    }

    /// Service manager
    pub fn manager(&self) -> &Arc<ServiceManager> {
        self.control.manager()
    }

    /// Start every service and mark the application ready.
    ///
    /// Individual service failures are recorded, not returned. The monitor
    /// is started afterwards when enabled.
    #[tracing::instrument(skip(self))]
    pub async fn start(&mut self) -> ManagerSnapshot {
        self.control.set_state(ApplicationState::Starting);
        let snapshot = self.control.manager().start_all().await;
        self.control.set_state(ApplicationState::Ready);
        tracing::info!("Application ready");

        if self.config.monitor.enabled && self.monitor.is_none() {
            let mut monitor = ServiceMonitor::new(
                Arc::clone(self.control.manager()),
                ServiceMonitorConfig::from(&self.config.monitor),
            );
            match monitor.start() {
                Ok(()) => self.monitor = Some(monitor),
                Err(e) => tracing::warn!(error = %e, "Failed to start service monitor"),
            }
        }

        snapshot
    }

    /// Serve the control API when `api.enabled` is set.
    ///
    /// Returns the bound addresses (empty when the API is disabled).
    #[tracing::instrument(skip(self))]
    pub fn serve(&mut self) -> Result<Vec<SocketAddr>> {
        if !self.config.api.enabled {
            tracing::info!("Control API disabled");
            return Ok(Vec::new());
        }
        if let Some(server) = &self.server {
            tracing::debug!("Control API already running");
            return Ok(server.addrs().to_vec());
        }

        let handle = ControlServer::start(self.control.clone(), &self.config.api)?;
        let addrs = handle.addrs().to_vec();
        self.server = Some(handle);
        Ok(addrs)
    }

    /// Stop the monitor, every running service and the control API.
    ///
    /// Services get `lifecycle.shutdown_grace_ms` in total; stops still
    /// running after that are reported as timed out.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&mut self) -> ShutdownReport {
        tracing::info!("Shutting down application");
        self.control.set_state(ApplicationState::Stopping);

        if let Some(mut monitor) = self.monitor.take() {
            if let Err(e) = monitor.stop() {
                tracing::warn!(error = %e, "Failed to stop service monitor");
            }
        }

        let report = self
            .control
            .manager()
            .stop_all(self.config.lifecycle.shutdown_grace())
            .await;

        if let Some(server) = self.server.take() {
            if let Err(e) = server.shutdown().await {
                tracing::warn!(error = %e, "Control API did not shut down cleanly");
            }
        }

        self.control.set_state(ApplicationState::Stopped);
        tracing::info!(outcome = ?report.outcome(), "Application stopped");
        report
    }

    /// Process exit code for a shutdown report
    pub fn exit_code(&self, report: &ShutdownReport) -> u8 {
        report
            .outcome()
            .exit_code(self.config.lifecycle.strict_shutdown_exit)
    }
}

use crate::error::Result;
use crate::service::contract::HealthStatus;
use crate::service::manager::ServiceManager;
use crate::service::state::ServiceState;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

/// Service monitor configuration
#[derive(Debug, Clone)]
pub struct ServiceMonitorConfig {
    /// Check interval
    pub check_interval: Duration,
    /// Maximum number of consecutive unhealthy reports before a running
    /// service is faulted
    pub max_consecutive_failures: u32,
    /// Retry services found in ERROR
    pub auto_retry: bool,
}

impl Default for ServiceMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            max_consecutive_failures: 3,
            auto_retry: false,
        }
    }
}

impl From<&crate::config::MonitorConfig> for ServiceMonitorConfig {
    fn from(config: &crate::config::MonitorConfig) -> Self {
        Self {
            check_interval: Duration::from_millis(config.check_interval_ms),
            max_consecutive_failures: config.max_consecutive_failures,
            auto_retry: config.auto_retry,
        }
    }
}

/// What one round of checks did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorRound {
    /// Services checked
    pub checked: usize,
    /// Running services moved to ERROR
    pub faulted: Vec<String>,
    /// Services retried, with whether they came back
    pub retried: Vec<(String, bool)>,
}

/// Service monitor
///
/// Periodically checks the health of every service. A RUNNING service
/// that reports unhealthy too many times in a row is moved to ERROR; with
/// `auto_retry` set, services in ERROR are retried.
pub struct ServiceMonitor {
    /// Service manager
    manager: Arc<ServiceManager>,
    /// Consecutive unhealthy reports per service
    failure_counts: Arc<Mutex<HashMap<String, u32>>>,
    /// Monitor configuration
    config: ServiceMonitorConfig,
    /// Monitor task
    monitor_task: Option<JoinHandle<()>>,
}

impl ServiceMonitor {
    /// Create a new service monitor
    pub fn new(manager: Arc<ServiceManager>, config: ServiceMonitorConfig) -> Self {
        Self {
            manager,
            failure_counts: Arc::new(Mutex::new(HashMap::new())),
            config,
            monitor_task: None,
        }
    }

    /// Whether the background loop is running
    pub fn is_running(&self) -> bool {
        self.monitor_task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Start the monitor
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }

        let manager = Arc::clone(&self.manager);
        let failure_counts = Arc::clone(&self.failure_counts);
        let config = self.config.clone();

        tracing::info!(interval = ?config.check_interval, auto_retry = config.auto_retry, "Starting service monitor");
        let task = tokio::spawn(async move {
            let mut interval = time::interval(config.check_interval);
            // The first tick completes immediately; services were just started.
            interval.tick().await;

            loop {
                interval.tick().await;
                let round = run_round(&manager, &failure_counts, &config).await;
                tracing::trace!(checked = round.checked, "Monitor round complete");
            }
        });

        self.monitor_task = Some(task);
        Ok(())
    }

    /// Stop the monitor
    ///
    /// Retries already in flight are not cancelled.
    pub fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.monitor_task.take() {
            task.abort();
            tracing::info!("Service monitor stopped");
        }
        Ok(())
    }

    /// Run one round of checks now
    pub async fn check_now(&self) -> MonitorRound {
        run_round(&self.manager, &self.failure_counts, &self.config).await
    }

    /// Current count of consecutive unhealthy reports for a service
    pub fn failure_count(&self, name: &str) -> u32 {
        self.failure_counts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .copied()
            .unwrap_or(0)
    }
}

impl Drop for ServiceMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.monitor_task.take() {
            task.abort();
        }
    }
}

async fn run_round(
    manager: &Arc<ServiceManager>,
    failure_counts: &Mutex<HashMap<String, u32>>,
    config: &ServiceMonitorConfig,
) -> MonitorRound {
    let health = manager.health_all().await;
    let mut round = MonitorRound {
        checked: health.len(),
        ..Default::default()
    };

    let mut to_fault = Vec::new();
    let mut to_retry = Vec::new();
    {
        let mut counts = failure_counts.lock().unwrap_or_else(|p| p.into_inner());
        for (name, report) in &health {
            match report.state {
                ServiceState::Running if report.health.status == HealthStatus::Unhealthy => {
                    let count = counts.entry(name.clone()).or_insert(0);
                    *count += 1;
                    tracing::warn!(service = %name, failures = *count, detail = ?report.health.detail, "Service unhealthy");

                    if *count >= config.max_consecutive_failures {
                        *count = 0;
                        let detail = report
                            .health
                            .detail
                            .clone()
                            .unwrap_or_else(|| "no detail".to_string());
                        to_fault.push((
                            name.clone(),
                            format!(
                                "unhealthy for {} consecutive checks: {}",
                                config.max_consecutive_failures, detail
                            ),
                        ));
                    }
                }
                ServiceState::Error if config.auto_retry => {
                    counts.remove(name);
                    to_retry.push(name.clone());
                }
                _ => {
                    counts.remove(name);
                }
            }
        }
    }

    for (name, message) in to_fault {
        match manager.report_fault(&name, message).await {
            Ok(_) => round.faulted.push(name),
            Err(e) => tracing::debug!(service = %name, error = %e, "Fault not recorded"),
        }
    }

    // Retries run on their own tasks so stopping the monitor never
    // interrupts a start halfway.
    let retries = to_retry.into_iter().map(|name| {
        let manager = Arc::clone(manager);
        let handle = tokio::spawn({
            let name = name.clone();
            async move { manager.retry(&name).await }
        });
        async move {
            let ok = match handle.await {
                Ok(Ok(_)) => true,
                Ok(Err(e)) => {
                    tracing::warn!(service = %name, error = %e, "Automatic retry failed");
                    false
                }
                Err(e) => {
                    tracing::error!(service = %name, error = %e, "Retry task failed");
                    false
                }
            };
            (name, ok)
        }
    });
    round.retried = join_all(retries).await;

    round
}

use crate::error::{Error, Result};
use crate::service::{HealthReport, OptionKind, Service, ServiceDescriptor, ServiceOptions};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time;

/// Registered name
pub const NAME: &str = "monitoring";

/// A sample older than this many intervals degrades health
const STALE_AFTER_INTERVALS: u32 = 3;

/// Descriptor of the monitoring service
pub fn descriptor() -> ServiceDescriptor {
    ServiceDescriptor::new(NAME, "Samples process uptime and system load")
        .with_option(
            "interval_ms",
            OptionKind::Integer,
            Some(json!(5000)),
            "Time between two samples",
        )
        .with_option(
            "collect_load",
            OptionKind::Boolean,
            Some(json!(true)),
            "Read the system load average",
        )
        .exposes_operations()
        .requires_tick()
}

/// Latest metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemMetrics {
    /// Samples taken since start or the last reset
    pub samples: u64,
    /// Time of the last sample
    pub sampled_at: Option<DateTime<Utc>>,
    /// Time since the service started, at the last sample
    pub uptime_ms: u64,
    /// 1, 5 and 15 minute load averages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_average: Option<[f64; 3]>,
}

#[derive(Debug, Clone, Copy)]
struct MonitoringSettings {
    interval: Duration,
    collect_load: bool,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            collect_load: true,
        }
    }
}

/// Monitoring service
///
/// Runs a sampling task between `start` and `stop`.
pub struct MonitoringService {
    name: String,
    settings: Mutex<MonitoringSettings>,
    metrics: Arc<Mutex<SystemMetrics>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MonitoringService {
    /// Create an unconfigured monitoring service
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            settings: Mutex::new(MonitoringSettings::default()),
            metrics: Arc::new(Mutex::new(SystemMetrics::default())),
            task: Mutex::new(None),
        }
    }

    /// Copy of the latest metrics
    pub fn metrics(&self) -> SystemMetrics {
        self.metrics
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    fn settings(&self) -> MonitoringSettings {
        *self.settings.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn sample(metrics: &Mutex<SystemMetrics>, started: Instant, collect_load: bool) {
    let load_average = if collect_load {
        read_load_average()
    } else {
        None
    };

    let mut metrics = metrics.lock().unwrap_or_else(|p| p.into_inner());
    metrics.samples += 1;
    metrics.sampled_at = Some(Utc::now());
    metrics.uptime_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    metrics.load_average = load_average;
}

/// Load averages from `/proc/loadavg`; `None` where unavailable
fn read_load_average() -> Option<[f64; 3]> {
    let content = std::fs::read_to_string("/proc/loadavg").ok()?;
    parse_load_average(&content)
}

fn parse_load_average(content: &str) -> Option<[f64; 3]> {
    let mut fields = content.split_whitespace().map(str::parse::<f64>);
    Some([
        fields.next()?.ok()?,
        fields.next()?.ok()?,
        fields.next()?.ok()?,
    ])
}

#[async_trait]
impl Service for MonitoringService {
    async fn configure(&self, options: &ServiceOptions) -> Result<()> {
        let interval_ms = options.get_i64("interval_ms").unwrap_or(5000);
        if interval_ms <= 0 {
            return Err(Error::configuration(
                &self.name,
                format!("interval_ms must be positive, got {}", interval_ms),
            ));
        }

        let settings = MonitoringSettings {
            interval: Duration::from_millis(interval_ms as u64),
            collect_load: options.get_bool("collect_load").unwrap_or(true),
        };
        tracing::debug!(service = %self.name, interval = ?settings.interval, "Monitoring configured");
        *self.settings.lock().unwrap_or_else(|p| p.into_inner()) = settings;
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let settings = self.settings();
        let metrics = Arc::clone(&self.metrics);
        let started = Instant::now();
        let name = self.name.clone();

        let mut task = self.task.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(previous) = task.take() {
            previous.abort();
        }

        *task = Some(tokio::spawn(async move {
            let mut interval = time::interval(settings.interval);
            loop {
                interval.tick().await;
                sample(&metrics, started, settings.collect_load);
                tracing::trace!(service = %name, "Metrics sampled");
            }
        }));
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some(task) = self.task.lock().unwrap_or_else(|p| p.into_inner()).take() {
            task.abort();
        }
        Ok(())
    }

    async fn health(&self) -> HealthReport {
        let interval = self.settings().interval;
        let metrics = self.metrics();

        let Some(sampled_at) = metrics.sampled_at else {
            return HealthReport::degraded("no sample taken yet");
        };

        let age = (Utc::now() - sampled_at).to_std().unwrap_or_default();
        let stale_after = interval
            .checked_mul(STALE_AFTER_INTERVALS)
            .unwrap_or(Duration::MAX);
        if age > stale_after {
            HealthReport::degraded(format!("last sample is {}ms old", age.as_millis()))
        } else {
            HealthReport::healthy()
        }
    }

    fn operations(&self) -> Vec<&'static str> {
        vec!["metrics", "reset"]
    }

    async fn call(&self, operation: &str, _payload: Value) -> Result<Value> {
        match operation {
            "metrics" => Ok(serde_json::to_value(self.metrics())?),
            "reset" => {
                *self.metrics.lock().unwrap_or_else(|p| p.into_inner()) = SystemMetrics::default();
                Ok(json!({"reset": true}))
            }
            other => Err(Error::UnknownOperation {
                service: self.name.clone(),
                operation: other.to_string(),
            }),
        }
    }
}

impl Drop for MonitoringService {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().unwrap_or_else(|p| p.into_inner()).take() {
            task.abort();
        }
    }
}

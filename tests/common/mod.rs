//! Scripted services shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use service_host::error::{Error, Result};
use service_host::service::{
    HealthReport, HealthStatus, OptionKind, Service, ServiceDescriptor, ServiceOptions,
    ServiceRegistry,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Behaviour of a [`ScriptedService`], adjustable while it runs
#[derive(Debug, Clone)]
pub struct Script {
    pub configure_error: Option<String>,
    pub start_delay: Duration,
    pub start_error: Option<String>,
    pub start_panics: bool,
    pub stop_delay: Duration,
    pub stop_error: Option<String>,
    pub health: HealthStatus,
    pub health_delay: Duration,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            configure_error: None,
            start_delay: Duration::ZERO,
            start_error: None,
            start_panics: false,
            stop_delay: Duration::ZERO,
            stop_error: None,
            health: HealthStatus::Healthy,
            health_delay: Duration::ZERO,
        }
    }
}

/// A service whose every call follows its [`Script`] and is counted
#[derive(Default)]
pub struct ScriptedService {
    script: Mutex<Script>,
    pub configures: AtomicUsize,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    active: AtomicUsize,
    pub max_overlap: AtomicUsize,
    pub last_options: Mutex<Option<ServiceOptions>>,
}

impl ScriptedService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script),
            ..Default::default()
        })
    }

    pub fn script(&self) -> Script {
        self.script.lock().unwrap().clone()
    }

    pub fn update(&self, f: impl FnOnce(&mut Script)) {
        f(&mut self.script.lock().unwrap());
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_overlap.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Service for ScriptedService {
    async fn configure(&self, options: &ServiceOptions) -> Result<()> {
        self.configures.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock().unwrap() = Some(options.clone());
        match self.script().configure_error {
            Some(message) => Err(Error::Other(message)),
            None => Ok(()),
        }
    }

    async fn start(&self) -> Result<()> {
        self.enter();
        self.starts.fetch_add(1, Ordering::SeqCst);
        let script = self.script();
        tokio::time::sleep(script.start_delay).await;
        self.leave();
        if script.start_panics {
            panic!("scripted start panic");
        }
        match script.start_error {
            Some(message) => Err(Error::Other(message)),
            None => Ok(()),
        }
    }

    async fn stop(&self) -> Result<()> {
        self.enter();
        self.stops.fetch_add(1, Ordering::SeqCst);
        let script = self.script();
        tokio::time::sleep(script.stop_delay).await;
        self.leave();
        match script.stop_error {
            Some(message) => Err(Error::Other(message)),
            None => Ok(()),
        }
    }

    async fn health(&self) -> HealthReport {
        let script = self.script();
        tokio::time::sleep(script.health_delay).await;
        match script.health {
            HealthStatus::Healthy => HealthReport::healthy(),
            HealthStatus::Degraded => HealthReport::degraded("scripted degradation"),
            HealthStatus::Unhealthy => HealthReport::unhealthy("scripted failure"),
        }
    }

    fn operations(&self) -> Vec<&'static str> {
        vec!["echo", "fail"]
    }

    async fn call(&self, operation: &str, payload: Value) -> Result<Value> {
        match operation {
            "echo" => Ok(json!({ "echo": payload })),
            "fail" => Err(Error::Other("scripted operation failure".to_string())),
            other => Err(Error::UnknownOperation {
                service: String::new(),
                operation: other.to_string(),
            }),
        }
    }
}

/// Descriptor used for every scripted service
pub fn scripted_descriptor(name: &str) -> ServiceDescriptor {
    ServiceDescriptor::new(name, format!("Scripted service {}", name))
        .with_option("label", OptionKind::String, None, "Free-form label")
        .with_option("retries", OptionKind::Integer, Some(json!(1)), "Retry count")
        .exposes_operations()
}

/// Registry holding the given scripted services; each factory hands out
/// the same shared object so tests can observe and steer it.
pub fn registry_of(services: &[(&str, Arc<ScriptedService>)]) -> ServiceRegistry {
    let mut registry = ServiceRegistry::new();
    for (name, service) in services {
        let service = Arc::clone(service);
        registry
            .register(scripted_descriptor(name), move |_| {
                Arc::clone(&service) as Arc<dyn Service>
            })
            .unwrap();
    }
    registry
}

pub fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

/// Poll `check` until it holds or `timeout` passes
pub async fn eventually(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

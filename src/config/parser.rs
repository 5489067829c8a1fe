use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "SERVICE_HOST_";

/// Configuration for a single service.
///
/// `options` are checked against the service descriptor when the manager
/// is built; `metadata` is carried through to status responses untouched.
///
/// # Examples
///
/// ```
/// use service_host::config::ServiceConfig;
/// use serde_json::{json, Map};
///
/// let mut options = Map::new();
/// options.insert("interval_ms".to_string(), json!(1000));
///
/// let service_config = ServiceConfig {
///     enabled: true,
///     metadata: Map::new(),
///     options,
/// };
/// assert!(service_config.enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Run the service when no explicit enabled list is given.
    /// Defaults to true.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Free-form metadata reported alongside the service status.
    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// Service-specific options.
    #[serde(default)]
    pub options: Map<String, Value>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            metadata: Map::new(),
            options: Map::new(),
        }
    }
}

/// Bearer token authentication configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BearerAuthConfig {
    /// Bearer token
    pub token: String,
}

/// Authentication configuration for the control API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Bearer token authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer: Option<BearerAuthConfig>,
}

/// Configuration of the HTTP control surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Serve the control API at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Address to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Path prefix for every route, e.g. `/api`. Empty for none.
    #[serde(default)]
    pub prefix: String,

    /// Number of actix worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Allow cross-origin requests
    #[serde(default = "default_true")]
    pub cors: bool,

    /// Authentication settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticate: Option<AuthConfig>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port: default_port(),
            prefix: String::new(),
            workers: default_workers(),
            cors: true,
            authenticate: None,
        }
    }
}

impl ApiConfig {
    /// Bearer token required by the API, if any
    pub fn bearer_token(&self) -> Option<&str> {
        self.authenticate
            .as_ref()
            .and_then(|a| a.bearer.as_ref())
            .map(|b| b.token.as_str())
    }

    /// `host:port` to bind
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Timeouts governing startup, health checks and shutdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Upper bound on a single service health check
    #[serde(default = "default_health_check_timeout_ms")]
    pub health_check_timeout_ms: u64,

    /// Grace period for the coordinated shutdown
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,

    /// Exit non-zero when a stop failed within the grace period
    #[serde(default)]
    pub strict_shutdown_exit: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            health_check_timeout_ms: default_health_check_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            strict_shutdown_exit: false,
        }
    }
}

impl LifecycleConfig {
    /// Health check timeout as a `Duration`
    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_millis(self.health_check_timeout_ms)
    }

    /// Shutdown grace period as a `Duration`
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Background health monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Run the monitor
    #[serde(default)]
    pub enabled: bool,

    /// Time between two rounds of checks
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,

    /// Unhealthy reports in a row before a running service is faulted
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Retry services found in ERROR
    #[serde(default)]
    pub auto_retry: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            check_interval_ms: default_check_interval_ms(),
            max_consecutive_failures: default_max_consecutive_failures(),
            auto_retry: false,
        }
    }
}

/// Main configuration for the service host.
///
/// Every section is optional; an empty document is a valid configuration
/// with no services enabled.
///
/// # YAML Schema
///
/// ```yaml
/// title: Service Host
/// version: 0.1.0
/// environment: production
/// enabled_services: [monitoring, clock]
/// api:
///   host: 0.0.0.0
///   port: 8000
///   prefix: /api
/// lifecycle:
///   shutdown_grace_ms: 10000
/// services:
///   monitoring:
///     options:
///       interval_ms: 5000
///   clock:
///     metadata:
///       owner: platform
/// ```
///
/// # Examples
///
/// ```
/// use service_host::config::Config;
///
/// let config = Config::parse_from_str(r#"
/// enabled_services: [clock]
/// services:
///   clock:
///     options:
///       utc_offset_minutes: 60
/// "#).unwrap();
///
/// assert_eq!(config.enabled_services(), vec!["clock".to_string()]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Application title
    #[serde(default = "default_title")]
    pub title: String,

    /// Application version
    #[serde(default = "default_version")]
    pub version: String,

    /// Deployment environment name
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Ordered list of services to run. Takes precedence over the
    /// per-service `enabled` flags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_services: Option<Vec<String>>,

    /// HTTP control surface
    #[serde(default)]
    pub api: ApiConfig,

    /// Lifecycle timeouts
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Health monitor
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Per-service configuration, keyed by service name
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            title: default_title(),
            version: default_version(),
            environment: default_environment(),
            enabled_services: None,
            api: ApiConfig::default(),
            lifecycle: LifecycleConfig::default(),
            monitor: MonitorConfig::default(),
            services: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Loads a configuration from a file path.
    ///
    /// Files ending in `.json` are parsed as JSON, everything else as YAML.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigParse`] if:
    /// * The file cannot be read
    /// * The contents are not valid YAML/JSON
    /// * The document does not conform to the expected schema
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigParse(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        if is_json {
            serde_json::from_str(&content)
                .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON config: {}", e)))
        } else {
            Self::parse_from_str(&content)
        }
    }

    /// Parses a configuration from a YAML (or JSON) string.
    ///
    /// An empty or whitespace-only document yields the default configuration.
    pub fn parse_from_str(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse YAML config: {}", e)))
    }

    /// Apply `SERVICE_HOST_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_env_overrides_from(std::env::vars())
    }

    /// Apply `SERVICE_HOST_*` overrides from the given variables.
    ///
    /// Variables without the prefix and unknown keys are ignored.
    pub fn apply_env_overrides_from<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(key) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.as_ref().trim();

            match key {
                "ENABLED_SERVICES" => {
                    self.enabled_services = Some(
                        value
                            .split(',')
                            .map(str::trim)
                            .filter(|s| !s.is_empty())
                            .map(String::from)
                            .collect(),
                    );
                }
                "API_HOST" => self.api.host = value.to_string(),
                "API_PORT" => {
                    self.api.port = value.parse().map_err(|e| {
                        Error::ConfigParse(format!("Invalid {}API_PORT '{}': {}", ENV_PREFIX, value, e))
                    })?;
                }
                "API_PREFIX" => self.api.prefix = value.to_string(),
                "ENVIRONMENT" => self.environment = value.to_string(),
                "SHUTDOWN_GRACE_MS" => {
                    self.lifecycle.shutdown_grace_ms = value.parse().map_err(|e| {
                        Error::ConfigParse(format!(
                            "Invalid {}SHUTDOWN_GRACE_MS '{}': {}",
                            ENV_PREFIX, value, e
                        ))
                    })?;
                }
                _ => continue,
            }
            tracing::debug!(key, "Applied environment override");
        }
        Ok(())
    }

    /// Ordered list of services to run.
    ///
    /// The explicit `enabled_services` list wins; otherwise every entry of
    /// `services` with `enabled: true`, sorted by name.
    pub fn enabled_services(&self) -> Vec<String> {
        match &self.enabled_services {
            Some(list) => list.clone(),
            None => self
                .services
                .iter()
                .filter(|(_, s)| s.enabled)
                .map(|(name, _)| name.clone())
                .collect(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_workers() -> usize {
    2
}

fn default_health_check_timeout_ms() -> u64 {
    2000
}

fn default_shutdown_grace_ms() -> u64 {
    10_000
}

fn default_check_interval_ms() -> u64 {
    30_000
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_title() -> String {
    "Service Host".to_string()
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

//! Configuration module for the service host.
//!
//! This module handles parsing, validation, and access to configuration
//! settings. Configurations are loaded from YAML or JSON files, then
//! adjusted by `SERVICE_HOST_*` environment variables.
//!
//! # Examples
//!
//! Loading a configuration from a file:
//!
//! ```no_run
//! use service_host::config::Config;
//!
//! let mut config = Config::from_file("service-host.yaml").unwrap();
//! config.apply_env_overrides().unwrap();
//! println!("Enabled services: {:?}", config.enabled_services());
//! ```
//!
//! Creating a configuration programmatically:
//!
//! ```
//! use service_host::config::{Config, ServiceConfig, validate_config};
//!
//! let mut config = Config::default();
//! config.services.insert(
//!     "clock".to_string(),
//!     ServiceConfig { enabled: true, ..Default::default() },
//! );
//!
//! validate_config(&config).unwrap();
//! assert_eq!(config.enabled_services(), vec!["clock".to_string()]);
//! ```
mod parser;
pub mod validator;

pub use parser::{
    ApiConfig, AuthConfig, BearerAuthConfig, Config, ENV_PREFIX, LifecycleConfig, MonitorConfig,
    ServiceConfig,
};
pub use validator::validate_config;

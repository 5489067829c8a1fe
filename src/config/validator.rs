use crate::config::{ApiConfig, Config, LifecycleConfig, MonitorConfig};
use crate::error::{Error, Result};

/// Validates the control API settings
pub fn validate_api_config(api: &ApiConfig) -> Result<()> {
    if !api.enabled {
        return Ok(());
    }

    if api.host.trim().is_empty() {
        return Err(Error::ConfigValidation("api.host must not be empty".to_string()));
    }

    if api.workers == 0 {
        return Err(Error::ConfigValidation("api.workers must be at least 1".to_string()));
    }

    if !api.prefix.is_empty() && (!api.prefix.starts_with('/') || api.prefix.ends_with('/')) {
        return Err(Error::ConfigValidation(format!(
            "api.prefix '{}' must start with '/' and not end with '/'",
            api.prefix
        )));
    }

    if api.bearer_token().is_some_and(|t| t.is_empty()) {
        return Err(Error::ConfigValidation(
            "api.authenticate.bearer.token must not be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates lifecycle timeouts
pub fn validate_lifecycle_config(lifecycle: &LifecycleConfig) -> Result<()> {
    if lifecycle.health_check_timeout_ms == 0 {
        return Err(Error::ConfigValidation(
            "lifecycle.health_check_timeout_ms must be greater than 0".to_string(),
        ));
    }
    Ok(())
}

/// Validates the monitor settings
pub fn validate_monitor_config(monitor: &MonitorConfig) -> Result<()> {
    if monitor.check_interval_ms == 0 {
        return Err(Error::ConfigValidation(
            "monitor.check_interval_ms must be greater than 0".to_string(),
        ));
    }
    if monitor.max_consecutive_failures == 0 {
        return Err(Error::ConfigValidation(
            "monitor.max_consecutive_failures must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Full configuration validation
///
/// Unknown service names are not checked here; they are reported by the
/// registry when the manager is built.
pub fn validate_config(config: &Config) -> Result<()> {
    validate_api_config(&config.api)?;
    validate_lifecycle_config(&config.lifecycle)?;
    validate_monitor_config(&config.monitor)?;

    if let Some(blank) = config
        .enabled_services()
        .iter()
        .position(|name| name.trim().is_empty())
    {
        return Err(Error::ConfigValidation(format!(
            "enabled service at position {} has an empty name",
            blank
        )));
    }

    Ok(())
}

use crate::error::{Error, Result};
use crate::service::{HealthReport, OptionKind, Service, ServiceDescriptor, ServiceOptions};
use async_trait::async_trait;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Offset, SecondsFormat, Utc};
use serde_json::{Value, json};
use std::sync::Mutex;

/// Registered name
pub const NAME: &str = "clock";

/// `format` value selecting RFC 3339 output
pub const RFC3339: &str = "rfc3339";

/// Descriptor of the clock service
pub fn descriptor() -> ServiceDescriptor {
    ServiceDescriptor::new(NAME, "Reports the current time")
        .with_option(
            "utc_offset_minutes",
            OptionKind::Integer,
            Some(json!(0)),
            "Offset from UTC applied to reported times",
        )
        .with_option(
            "format",
            OptionKind::String,
            Some(json!(RFC3339)),
            "'rfc3339' or a strftime pattern",
        )
        .exposes_operations()
}

#[derive(Debug, Clone)]
struct ClockSettings {
    offset: FixedOffset,
    format: String,
}

impl Default for ClockSettings {
    fn default() -> Self {
        Self {
            offset: Utc.fix(),
            format: RFC3339.to_string(),
        }
    }
}

/// Clock service
pub struct ClockService {
    name: String,
    settings: Mutex<ClockSettings>,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

impl ClockService {
    /// Create an unconfigured clock
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            settings: Mutex::new(ClockSettings::default()),
            started_at: Mutex::new(None),
        }
    }

    fn settings(&self) -> ClockSettings {
        self.settings
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Render `instant` with the configured offset and format
    pub fn render(&self, instant: DateTime<Utc>) -> String {
        let settings = self.settings();
        let local = instant.with_timezone(&settings.offset);
        if settings.format == RFC3339 {
            local.to_rfc3339_opts(SecondsFormat::Millis, false)
        } else {
            local.format(&settings.format).to_string()
        }
    }
}

#[async_trait]
impl Service for ClockService {
    async fn configure(&self, options: &ServiceOptions) -> Result<()> {
        let minutes = options.get_i64("utc_offset_minutes").unwrap_or(0);
        let offset = i32::try_from(minutes)
            .ok()
            .and_then(|m| m.checked_mul(60))
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                Error::configuration(
                    &self.name,
                    format!("utc_offset_minutes {} is out of range", minutes),
                )
            })?;

        let format = options.get_str("format").unwrap_or(RFC3339).to_string();
        if format.is_empty() || StrftimeItems::new(&format).any(|i| matches!(i, Item::Error)) {
            return Err(Error::configuration(
                &self.name,
                format!("format '{}' is not a valid strftime pattern", format),
            ));
        }

        tracing::debug!(service = %self.name, offset = %offset, format = %format, "Clock configured");
        *self.settings.lock().unwrap_or_else(|p| p.into_inner()) = ClockSettings { offset, format };
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        *self.started_at.lock().unwrap_or_else(|p| p.into_inner()) = Some(Utc::now());
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        *self.started_at.lock().unwrap_or_else(|p| p.into_inner()) = None;
        Ok(())
    }

    async fn health(&self) -> HealthReport {
        HealthReport::healthy()
    }

    fn operations(&self) -> Vec<&'static str> {
        vec!["now", "uptime"]
    }

    async fn call(&self, operation: &str, _payload: Value) -> Result<Value> {
        let now = Utc::now();
        match operation {
            "now" => Ok(json!({
                "time": self.render(now),
                "unix_ms": now.timestamp_millis(),
                "utc_offset_minutes": self.settings().offset.local_minus_utc() / 60,
            })),
            "uptime" => {
                let started_at = *self.started_at.lock().unwrap_or_else(|p| p.into_inner());
                let started_at = started_at.ok_or_else(|| Error::ServiceUnavailable {
                    service: self.name.clone(),
                    state: crate::service::ServiceState::Stopped,
                })?;
                Ok(json!({
                    "started_at": started_at.to_rfc3339(),
                    "uptime_ms": (now - started_at).num_milliseconds(),
                }))
            }
            other => Err(Error::UnknownOperation {
                service: self.name.clone(),
                operation: other.to_string(),
            }),
        }
    }
}

/// Error handling module for Service Host.
///
/// This module defines the error types used throughout the library.
/// Errors fall into three groups: startup misconfiguration (fatal for the
/// process), lifecycle failures local to one service (recorded on the
/// instance, never propagated to siblings) and control-surface misuse
/// (reported to the caller, no state change).
///
/// # Example
///
/// ```
/// use service_host::error::{Error, Result};
///
/// fn handle_error(result: Result<()>) {
///     match result {
///         Ok(_) => println!("Operation succeeded"),
///         Err(Error::ServiceNotFound(name)) => println!("Service '{}' is not enabled", name),
///         Err(Error::ServiceUnavailable { service, state }) => {
///             println!("Service '{}' is {:?}", service, state)
///         }
///         Err(e) => println!("Other error: {}", e),
///     }
/// }
/// ```
use crate::service::state::{ServiceState, Trigger};
use thiserror::Error;

/// Errors that can occur in the service-host library.
///
/// Each variant carries enough context (service name, state, trigger) to
/// be rendered directly into a log line or an HTTP error body.
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to read or parse the configuration file.
    ///
    /// This error occurs when:
    /// - The file cannot be read
    /// - The YAML/JSON is malformed
    /// - Field types are incorrect
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Service options do not match the declared schema, or the service
    /// rejected them in `configure`.
    ///
    /// This error occurs when:
    /// - An option is not declared by the service descriptor
    /// - A required option is missing
    /// - An option has the wrong type
    #[error("Invalid configuration for service '{service}': {message}")]
    Configuration {
        /// Service whose options were rejected
        service: String,
        /// What was wrong
        message: String,
    },

    /// Configuration parsed but contains values that fail validation checks.
    #[error("Config validation error: {0}")]
    ConfigValidation(String),

    /// A lifecycle trigger was requested from a state that does not accept it.
    #[error("Invalid transition for service '{service}': cannot {trigger} while {from}")]
    InvalidTransition {
        /// Service the transition was requested for
        service: String,
        /// State the instance was in (and remains in)
        from: ServiceState,
        /// Rejected trigger
        trigger: Trigger,
    },

    /// The service failed inside its own `start`.
    #[error("Service '{service}' failed to start: {message}")]
    ServiceStart {
        /// Failing service
        service: String,
        /// Failure detail
        message: String,
    },

    /// The service failed inside its own `stop`.
    #[error("Service '{service}' failed to stop: {message}")]
    ServiceStop {
        /// Failing service
        service: String,
        /// Failure detail
        message: String,
    },

    /// One or more enabled names are not present in the registry.
    #[error("Unknown service(s): {}", .0.join(", "))]
    UnknownService(Vec<String>),

    /// A descriptor with the same name is already registered.
    #[error("Service '{0}' is already registered")]
    DuplicateService(String),

    /// The named service is not part of this process.
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// A sub-surface call targeted a service that is not running.
    #[error("Service '{service}' is unavailable (state {state})")]
    ServiceUnavailable {
        /// Target service
        service: String,
        /// Its current state
        state: ServiceState,
    },

    /// The service's sub-surface does not define the requested operation.
    #[error("Service '{service}' has no operation '{operation}'")]
    UnknownOperation {
        /// Target service
        service: String,
        /// Requested operation
        operation: String,
    },

    /// Operation timed out.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Unauthorized access to the control surface.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Error in serializing or deserializing data.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Any other error not covered by the above categories.
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a [`Error::Configuration`] error.
    pub fn configuration(service: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Configuration {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Whether this error must abort process startup.
    ///
    /// Only registry and configuration resolution errors are fatal; every
    /// other failure stays local to one service or one request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigParse(_)
                | Error::ConfigValidation(_)
                | Error::Configuration { .. }
                | Error::UnknownService(_)
                | Error::DuplicateService(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Result type for service-host operations.
///
/// This is a convenience type alias for `std::result::Result` with the `Error` type
/// from this module.
pub type Result<T> = std::result::Result<T, Error>;

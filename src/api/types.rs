//! Request and response bodies of the control API.

use crate::control::ApplicationState;
use serde::{Deserialize, Serialize};

/// Body of a 202 response to a lifecycle request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceptedResponse {
    /// Target service
    pub service: String,
    /// Accepted request (`start`, `stop`, `restart`)
    pub request: String,
}

/// Body of the readiness probe
#[derive(Debug, Clone, Serialize)]
pub struct ReadyResponse {
    /// Whether the application is ready
    pub ready: bool,
    /// Application state
    pub state: ApplicationState,
}

/// Query string of the events endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventsQuery {
    /// Maximum number of events to return
    pub limit: Option<usize>,
}

/// A message on the SSE stream
#[derive(Debug, Clone, PartialEq)]
pub struct SseMessage {
    /// Event type
    pub event: String,
    /// Event payload (JSON)
    pub data: String,
    /// Optional event ID
    pub id: Option<String>,
}

impl SseMessage {
    /// Create a new SSE message
    pub fn new(event: &str, data: &str, id: Option<&str>) -> Self {
        Self {
            event: event.to_string(),
            data: data.to_string(),
            id: id.map(String::from),
        }
    }
}

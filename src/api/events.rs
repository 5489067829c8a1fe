//! Server-Sent Events rendering of lifecycle events.

use crate::api::types::SseMessage;
use crate::control::ApplicationStatus;
use crate::error::Result;
use crate::service::ServiceEvent;
use actix_web::web::Bytes;

/// Event type of a lifecycle transition
pub const LIFECYCLE_EVENT: &str = "lifecycle";

/// Event type of the status message sent on connect
pub const STATUS_EVENT: &str = "status";

/// SSE message for a lifecycle transition, keyed by the event ID
pub fn lifecycle_message(event: &ServiceEvent) -> Result<SseMessage> {
    let data = serde_json::to_string(event)?;
    Ok(SseMessage::new(
        LIFECYCLE_EVENT,
        &data,
        Some(&event.id.to_string()),
    ))
}

/// SSE message carrying the application status
pub fn status_message(status: &ApplicationStatus) -> Result<SseMessage> {
    let data = serde_json::to_string(status)?;
    Ok(SseMessage::new(STATUS_EVENT, &data, None))
}

/// Format an SseMessage for the wire
pub fn format_sse_message(message: &SseMessage) -> Bytes {
    let mut result = String::new();

    if let Some(id) = &message.id {
        result.push_str(&format!("id: {}\n", id));
    }

    result.push_str(&format!("event: {}\n", message.event));
    for line in message.data.lines() {
        result.push_str(&format!("data: {}\n", line));
    }
    result.push('\n');

    Bytes::from(result)
}

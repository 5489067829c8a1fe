//! HTTP request handlers of the control API.
//!
//! Every handler is a thin adapter over [`ControlPlane`]; status codes
//! come from the `ResponseError` impls in [`crate::api::actix_error`].

use crate::api::actix_error::ApiError;
use crate::api::events::{format_sse_message, lifecycle_message, status_message};
use crate::api::types::{AcceptedResponse, EventsQuery, ReadyResponse};
use crate::control::ControlPlane;
use crate::error::Result;
use crate::service::HealthStatus;

use actix_web::{
    HttpResponse, Responder,
    web::{self, Bytes, Data, Path, Query},
};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;

/// Register every route on `cfg`, relative to the enclosing scope
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource(["", "/"]).route(web::get().to(application_status)))
        .route("/health", web::get().to(health))
        .route("/ready", web::get().to(ready))
        .route("/events", web::get().to(event_stream))
        .route("/services", web::get().to(list_services))
        .route("/services/{name}", web::get().to(service_status))
        .route("/services/{name}/events", web::get().to(service_events))
        .route("/services/{name}/start", web::post().to(start_service))
        .route("/services/{name}/stop", web::post().to(stop_service))
        .route("/services/{name}/restart", web::post().to(restart_service))
        .route(
            "/services/{name}/operations/{operation}",
            web::post().to(call_operation),
        );
}

/// Application title, version, state and service states
pub async fn application_status(control: Data<ControlPlane>) -> impl Responder {
    HttpResponse::Ok().json(control.status())
}

/// Aggregate health; 503 when unhealthy
pub async fn health(control: Data<ControlPlane>) -> impl Responder {
    let overview = control.health().await;
    tracing::debug!(verdict = ?overview.verdict, "Health requested");
    match overview.verdict {
        HealthStatus::Unhealthy => HttpResponse::ServiceUnavailable().json(overview),
        _ => HttpResponse::Ok().json(overview),
    }
}

/// Readiness probe
pub async fn ready(control: Data<ControlPlane>) -> impl Responder {
    let body = ReadyResponse {
        ready: control.is_ready(),
        state: control.state(),
    };
    if body.ready {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}

/// Name and description of every service
pub async fn list_services(control: Data<ControlPlane>) -> impl Responder {
    HttpResponse::Ok().json(control.services())
}

/// Status of one service
pub async fn service_status(
    control: Data<ControlPlane>,
    name: Path<String>,
) -> Result<impl Responder> {
    let snapshot = control.service_status(&name)?;
    Ok(HttpResponse::Ok().json(snapshot))
}

/// Recent lifecycle events of one service
pub async fn service_events(
    control: Data<ControlPlane>,
    name: Path<String>,
    query: Query<EventsQuery>,
) -> Result<impl Responder> {
    let events = control.service_events(&name, query.limit)?;
    Ok(HttpResponse::Ok().json(events))
}

fn accepted(name: String, request: &str) -> HttpResponse {
    HttpResponse::Accepted().json(AcceptedResponse {
        service: name,
        request: request.to_string(),
    })
}

/// Request a start
pub async fn start_service(
    control: Data<ControlPlane>,
    name: Path<String>,
) -> Result<impl Responder> {
    control.request_start(&name)?;
    Ok(accepted(name.into_inner(), "start"))
}

/// Request a stop
pub async fn stop_service(
    control: Data<ControlPlane>,
    name: Path<String>,
) -> Result<impl Responder> {
    control.request_stop(&name)?;
    Ok(accepted(name.into_inner(), "stop"))
}

/// Request a restart
pub async fn restart_service(
    control: Data<ControlPlane>,
    name: Path<String>,
) -> Result<impl Responder> {
    control.request_restart(&name)?;
    Ok(accepted(name.into_inner(), "restart"))
}

/// Call an operation on a running service. An empty body is sent as `null`.
pub async fn call_operation(
    control: Data<ControlPlane>,
    path: Path<(String, String)>,
    body: Bytes,
) -> std::result::Result<impl Responder, ApiError> {
    let (name, operation) = path.into_inner();

    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            tracing::warn!(service = %name, operation = %operation, error = %e, "Rejected operation payload");
            ApiError::InvalidRequest(format!("payload is not valid JSON: {}", e))
        })?
    };

    let result = control.dispatch(&name, &operation, payload).await?;
    Ok(HttpResponse::Ok().json(result))
}

/// SSE stream of lifecycle events, preceded by the current status
pub async fn event_stream(control: Data<ControlPlane>) -> Result<impl Responder> {
    let mut receiver = control.events();
    let initial = format_sse_message(&status_message(&control.status())?);
    tracing::debug!("Client connected to event stream");

    let stream = async_stream::stream! {
        yield Ok::<_, actix_web::Error>(initial);
        loop {
            match receiver.recv().await {
                Ok(event) => match lifecycle_message(&event) {
                    Ok(message) => yield Ok(format_sse_message(&message)),
                    Err(e) => tracing::error!(error = %e, "Failed to serialize lifecycle event"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event stream client fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Ok(HttpResponse::Ok()
        .append_header(("Content-Type", "text/event-stream"))
        .append_header(("Cache-Control", "no-cache"))
        .append_header(("Connection", "keep-alive"))
        .streaming(stream))
}

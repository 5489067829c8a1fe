//! HTTP binding of the control surface.
//!
//! Routes (relative to `api.prefix`):
//! - `GET /` application status
//! - `GET /health`, `GET /ready` probes
//! - `GET /services`, `GET /services/{name}`, `GET /services/{name}/events`
//! - `POST /services/{name}/start|stop|restart` (202, runs in the background)
//! - `POST /services/{name}/operations/{operation}` sub-surface calls
//! - `GET /events` SSE stream of lifecycle events
//!
//! # Examples
//!
//! Mounting the routes in a custom actix application:
//!
//! ```no_run
//! use actix_web::{App, web};
//! use service_host::api;
//! use service_host::control::ControlPlane;
//!
//! fn app(control: ControlPlane) {
//!     let _app = App::new()
//!         .app_data(web::Data::new(control))
//!         .service(web::scope("/api").configure(api::configure));
//! }
//! ```

pub mod actix_error;
pub mod auth;
pub mod events;
pub mod handlers;
pub mod server;
pub mod types;

pub use actix_error::ApiError;
pub use auth::Authentication;
pub use handlers::configure;
pub use server::{ControlServer, ControlServerHandle};

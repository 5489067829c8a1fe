//! Control API server and its handle.

use crate::api::auth::Authentication;
use crate::api::handlers;
use crate::config::ApiConfig;
use crate::control::ControlPlane;
use crate::error::{Error, Result};

use actix_cors::Cors;
use actix_web::{App, HttpServer, dev::ServerHandle, middleware, web};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;

/// How long `shutdown` waits for the server task
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a running control API server
pub struct ControlServerHandle {
    /// actix server handle
    server: ServerHandle,
    /// Server task
    task: JoinHandle<()>,
    /// Bound addresses
    addrs: Vec<SocketAddr>,
}

impl ControlServerHandle {
    /// Addresses the server is listening on
    pub fn addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    /// Stop accepting connections and wait for in-flight requests
    pub async fn shutdown(self) -> Result<()> {
        tracing::info!("Stopping control API server");
        self.server.stop(true).await;

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, self.task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Error while joining control API task");
                Ok(())
            }
            Err(_) => {
                tracing::warn!("Timeout waiting for control API task to finish");
                Err(Error::Timeout("control API did not stop in time".to_string()))
            }
        }
    }
}

/// Control API server
pub struct ControlServer;

impl ControlServer {
    /// Bind the API and serve it on a background task.
    #[tracing::instrument(skip(control, config), fields(address = %config.address()))]
    pub fn start(control: ControlPlane, config: &ApiConfig) -> Result<ControlServerHandle> {
        let data = web::Data::new(control);
        let prefix = config.prefix.clone();
        let token = config.bearer_token().map(String::from);
        let cors_enabled = config.cors;

        let server = HttpServer::new(move || {
            let cors = if cors_enabled {
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600)
            } else {
                Cors::default()
            };

            App::new()
                .wrap(Authentication::new(token.as_deref()))
                .wrap(cors)
                .wrap(middleware::Logger::default())
                .app_data(data.clone())
                .service(web::scope(&prefix).configure(handlers::configure))
        })
        .workers(config.workers)
        .bind(config.address())
        .map_err(|e| Error::Other(format!("Failed to bind control API: {}", e)))?;

        let addrs = server.addrs();
        let server = server.run();
        let handle = server.handle();

        let task = tokio::spawn(async move {
            if let Err(e) = server.await {
                tracing::error!(error = %e, "Control API server error");
            }
        });

        tracing::info!(addrs = ?addrs, prefix = %config.prefix, "Control API listening");
        Ok(ControlServerHandle {
            server: handle,
            task,
            addrs,
        })
    }
}

use std::sync::Arc;

use error_stack::Report;
use poem::get;
use poem::listener::TcpListener;
use poem::middleware::Tracing;
use poem::Endpoint;
use poem::EndpointExt;
use poem::Route;
use poem::Server;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;

use super::handlers::get_metrics;
use super::handlers::healthz;
use super::ApiError;
use crate::infrastructure::metrics::IdleMetrics;

/// HTTP server exposing `/metrics` and `/healthz`
pub struct ApiServer {
    metrics: Arc<IdleMetrics>,
    listen_addr: String,
}

pub(crate) fn routes(metrics: Arc<IdleMetrics>) -> impl Endpoint {
    Route::new()
        .at("/metrics", get(get_metrics))
        .at("/healthz", get(healthz))
        .data(metrics)
        .with(Tracing)
}

impl ApiServer {
    pub fn new(metrics: Arc<IdleMetrics>, listen_addr: String) -> Self {
        Self {
            metrics,
            listen_addr,
        }
    }

    /// Serves until the token is cancelled.
    ///
    /// # Errors
    ///
    /// - [`ApiError::ServerError`] if the server fails to start or bind to the address
    pub async fn run(self, cancellation_token: CancellationToken) -> Result<(), Report<ApiError>> {
        info!("Starting HTTP server on {}", self.listen_addr);

        let app = routes(self.metrics);
        let listener = TcpListener::bind(&self.listen_addr);
        let server = Server::new(listener);

        tokio::select! {
            result = server.run(app) => {
                match result {
                    Ok(()) => {
                        info!("HTTP server stopped normally");
                        Ok(())
                    }
                    Err(e) => {
                        error!("HTTP server failed: {e}");
                        Err(Report::new(ApiError::ServerError {
                            message: format!("failed to serve on {}: {e}", self.listen_addr),
                        }))
                    }
                }
            }
            _ = cancellation_token.cancelled() => {
                info!("HTTP server shutdown requested");
                Ok(())
            }
        }
    }
}

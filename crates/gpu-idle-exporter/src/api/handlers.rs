use std::sync::Arc;

use poem::handler;
use poem::http::StatusCode;
use poem::web::Data;
use poem::Response;
use tracing::error;

use crate::infrastructure::metrics::IdleMetrics;

/// Content type of the Prometheus text exposition format
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[handler]
pub async fn get_metrics(metrics: Data<&Arc<IdleMetrics>>) -> poem::Result<Response> {
    let body = metrics.render().map_err(|report| {
        error!("Failed to render metrics: {report:?}");
        poem::Error::from_string("failed to render metrics", StatusCode::INTERNAL_SERVER_ERROR)
    })?;

    Ok(Response::builder()
        .content_type(PROMETHEUS_CONTENT_TYPE)
        .body(body))
}

#[handler]
pub async fn healthz() -> &'static str {
    "ok\n"
}

//! HTTP endpoints for scraping idle process metrics
//!
//! - `GET /metrics` - Prometheus text exposition of all process and device gauges
//! - `GET /healthz` - liveness check, always `ok`

use core::error::Error;

pub mod handlers;
pub mod server;

pub use server::ApiServer;

/// API errors
#[derive(Debug, derive_more::Display)]
pub enum ApiError {
    #[display("Server error: {message}")]
    ServerError { message: String },
}

impl Error for ApiError {}

mod api;
pub mod app;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use infrastructure::logging;
pub use infrastructure::metrics;

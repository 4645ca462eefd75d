//! Prometheus metrics for the scan loop, the job dispatcher and the HTTP
//! surface, plus the `/metrics` handler and request-recording middleware.

pub mod endpoints;
pub mod metrics;
pub mod middleware;

pub use endpoints::metrics_handler;
pub use middleware::metrics_middleware;

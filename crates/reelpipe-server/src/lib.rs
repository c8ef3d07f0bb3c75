//! HTTP surface for the reelpipe pipeline.
//!
//! Two listeners: one serves only the liveness probe, the other serves
//! the readiness probe and the job API.

pub mod config;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use error::{ApiError, ApiResult};
pub use routes::{liveness_router, readiness_router};
pub use state::AppState;

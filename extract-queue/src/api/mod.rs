//! HTTP API.
//!
//! A thin axum layer over [`JobService`](crate::services::JobService):
//! multipart submission, status, result download, health and version info.

pub mod error;
pub mod models;
pub mod routes;
pub mod server;

pub use error::{ApiError, ApiResult};
pub use server::{ApiServer, ApiServerConfig, AppState};

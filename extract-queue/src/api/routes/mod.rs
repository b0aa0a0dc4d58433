//! API route modules.

pub mod health;
pub mod process;

use axum::Router;

use crate::api::server::AppState;

/// Create the API router, with every route under `prefix`.
pub fn create_router(state: AppState, prefix: &str) -> Router {
    let api = Router::new()
        .merge(process::router())
        .merge(health::router());

    let router = if prefix.is_empty() {
        api
    } else {
        Router::new().nest(prefix, api)
    };

    router.with_state(state)
}

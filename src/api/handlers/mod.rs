//! Endpoint handlers.

pub mod system;

use axum::Router;

use crate::app_state::AppState;

/// Composes every route.
pub fn routes() -> Router<AppState> {
    Router::new().merge(system::routes())
}

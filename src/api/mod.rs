//! HTTP surface: health and migration-status endpoints.
//!
//! Everything is mounted at the root; the gateway's own API lives
//! elsewhere and only consumes this crate as a library.

pub mod dto;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI document for the health surface.
#[derive(Debug, OpenApi)]
#[openapi(
    paths(
        handlers::system::health_handler,
        handlers::system::migrations_handler,
    ),
    components(schemas(
        dto::HealthResponse,
        dto::MigrationStatusDto,
        dto::MigrationStatusResponse,
    )),
    tags((name = "System", description = "Liveness and schema state"))
)]
pub struct ApiDoc;

/// Builds the complete router.
pub fn build_router() -> Router<AppState> {
    let router = Router::new().merge(handlers::routes());

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
}

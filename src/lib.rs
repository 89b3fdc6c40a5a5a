pub mod api;
pub mod config;
pub mod entities;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::config::StorageConfig;
use crate::services::storage::FileStorageManager;
use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::files::serve_file,
        api::handlers::shares::create_share,
        api::handlers::shares::follow_short_link,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            api::handlers::shares::CreateShareRequest,
            api::handlers::shares::ShortLinkResponse,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "files", description = "Material and submission downloads"),
        (name = "shares", description = "Short links"),
        (name = "system", description = "Service status")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub storage: Arc<FileStorageManager>,
    pub config: StorageConfig,
}

impl AppState {
    pub fn new(
        db: DatabaseConnection,
        storage: Arc<FileStorageManager>,
        config: StorageConfig,
    ) -> Self {
        Self {
            db,
            storage,
            config,
        }
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter(|o| o.as_str() != "*")
        .filter_map(|o| o.parse().ok())
        .collect();

    let cors = if origins.is_empty() || allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::new().allow_origin(Any)
    } else {
        CorsLayer::new().allow_origin(origins)
    };

    cors.allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any)
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route(
            "/files/:subject_id/*path",
            get(api::handlers::files::serve_file),
        )
        .route("/shares", post(api::handlers::shares::create_share))
        .route("/s/:code", get(api::handlers::shares::follow_short_link))
        .layer(cors_layer(&state.config.allowed_origins))
        .layer(axum::extract::DefaultBodyLimit::max(
            state.config.max_content_length,
        ))
        .with_state(state)
}

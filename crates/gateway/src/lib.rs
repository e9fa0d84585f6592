//! HTTP surface over the annotation engine.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use axum::Router;
use axum::routing::{get, post};
use state::AppState;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/api/models", get(routes::list_models))
        .route("/api/images", get(routes::list_dataset_images))
        .route("/api/auto_annotate", post(routes::auto_annotate))
        .route("/api/load_model_classes", post(routes::load_model_classes))
        .route(
            "/api/annotations/:image_name",
            get(routes::get_annotations).post(routes::save_annotations),
        )
        .route("/api/export", get(routes::export_coco))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

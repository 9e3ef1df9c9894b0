pub mod error;
pub mod handlers;
pub mod representation;
pub mod routes;

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use routes::{create_routes, AppState};

/// 组装完整的 /jobs 资源层
pub fn create_app(state: AppState) -> Router {
    create_routes(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

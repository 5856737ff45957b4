pub mod public;
pub mod trip;

use axum::Router;
use tower_http::services::ServeDir;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let storage_root = state.config.storage_root.clone();
    Router::new()
        .merge(public::router())
        .nest("/apps/trip", trip::router())
        .nest_service("/static", ServeDir::new("static"))
        .nest_service("/storage", ServeDir::new(storage_root))
        .with_state(state)
}

pub mod checklist;
pub mod groups;
pub mod public;
pub mod trips;

use axum::Router;
use tower_http::services::ServeDir;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(public::router())
        .nest("/trips", trips::router())
        .nest("/checklist", checklist::router())
        .nest("/api/checklist", checklist::api_router())
        .nest("/groups", groups::router())
        .nest_service("/static", ServeDir::new("static"))
        .with_state(state)
}

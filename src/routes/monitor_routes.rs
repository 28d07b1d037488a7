use axum::{Router, routing::{get, post}};
use crate::{AppState, controllers::monitor_controller};

pub fn add_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route("/health", get(monitor_controller::health))
        .route("/health/db", get(monitor_controller::health_db))
        .route("/monitor/status", get(monitor_controller::get_status))
        .route("/monitor/refresh", post(monitor_controller::post_refresh))
        .route("/monitor/sweep", post(monitor_controller::post_sweep))
}

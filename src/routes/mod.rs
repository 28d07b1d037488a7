use axum::Router;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod alerts_routes;
pub mod monitor_routes;
pub mod realtime_routes;

pub fn app(state: AppState) -> Router {
    let router = Router::<AppState>::new();

    let router = monitor_routes::add_routes(router);
    let router = alerts_routes::add_routes(router);
    let router = realtime_routes::add_routes(router);

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

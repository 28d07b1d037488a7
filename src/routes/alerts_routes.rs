use axum::{Router, routing::get};
use crate::{AppState, controllers::alerts_controller};

pub fn add_routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route(
            "/alerts",
            get(alerts_controller::list_alerts).post(alerts_controller::create_alert),
        )
        .route(
            "/alerts/:id",
            get(alerts_controller::get_alert)
                .patch(alerts_controller::update_alert)
                .delete(alerts_controller::delete_alert),
        )
}

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mongodb::bson::oid::ObjectId;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::{
    error::AlertError,
    models::{Alert, AlertCondition, AlertEdit},
    services::alerts_service::{self, NewAlert},
    AppState,
};

fn alert_json(a: &Alert) -> Value {
    json!({
        "id": a.id.to_hex(),
        "user_id": a.user_id.to_hex(),
        "symbol": a.symbol,
        "condition": a.condition,
        "target_price": a.target_price.to_string(),
        "current_price": a.current_price.map(|p| p.to_string()),
        "active": a.active,
        "triggered": a.triggered,
        "triggered_at": a.triggered_at,
        "notification_sent": a.notification_sent,
        "created_at": a.created_at,
        "updated_at": a.updated_at,
    })
}

fn success(status: StatusCode, message: Option<&str>, data: Value) -> Response {
    let mut body = json!({ "status": "success", "data": data });
    if let Some(m) = message {
        body["message"] = Value::String(m.to_string());
    }
    (status, Json(body)).into_response()
}

pub(crate) fn error_response(err: AlertError) -> Response {
    let status = match &err {
        AlertError::Validation(_) => StatusCode::BAD_REQUEST,
        AlertError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "alert request failed");
    }

    (status, Json(json!({ "status": "error", "message": err.to_string() }))).into_response()
}

fn parse_id(raw: &str, what: &str) -> Result<ObjectId, AlertError> {
    ObjectId::parse_str(raw.trim()).map_err(|_| AlertError::Validation(format!("invalid {what}")))
}

// ---------------- Handlers ----------------

#[derive(Deserialize)]
pub struct ListAlertsQuery {
    pub user_id: String,
}

// GET /alerts?user_id=...
pub async fn list_alerts(State(state): State<AppState>, Query(q): Query<ListAlertsQuery>) -> Response {
    let user_id = match parse_id(&q.user_id, "user id") {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    match alerts_service::list_user_alerts(&state, user_id).await {
        Ok(items) => success(StatusCode::OK, None, items.iter().map(alert_json).collect()),
        Err(e) => error_response(e),
    }
}

// GET /alerts/:id
pub async fn get_alert(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let result = match parse_id(&id, "alert id") {
        Ok(id) => alerts_service::get_alert(&state, id).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(a) => success(StatusCode::OK, None, alert_json(&a)),
        Err(e) => error_response(e),
    }
}

#[derive(Deserialize)]
pub struct CreateAlertBody {
    pub user_id: String,
    pub symbol: String,
    pub target_price: Decimal,
    pub condition: AlertCondition,
}

// POST /alerts
pub async fn create_alert(State(state): State<AppState>, Json(body): Json<CreateAlertBody>) -> Response {
    let user_id = match parse_id(&body.user_id, "user id") {
        Ok(id) => id,
        Err(e) => return error_response(e),
    };

    let input = NewAlert {
        user_id,
        symbol: body.symbol,
        target_price: body.target_price,
        condition: body.condition,
    };

    match alerts_service::create_alert(&state, input).await {
        Ok(a) => success(StatusCode::CREATED, Some("Price alert created successfully"), alert_json(&a)),
        Err(e) => error_response(e),
    }
}

// PATCH /alerts/:id
pub async fn update_alert(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(edit): Json<AlertEdit>,
) -> Response {
    let result = match parse_id(&id, "alert id") {
        Ok(id) => alerts_service::update_alert(&state, id, edit).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(a) => success(StatusCode::OK, Some("Alert updated successfully"), alert_json(&a)),
        Err(e) => error_response(e),
    }
}

// DELETE /alerts/:id
pub async fn delete_alert(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let result = match parse_id(&id, "alert id") {
        Ok(id) => alerts_service::delete_alert(&state, id).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "status": "success", "message": "Alert deleted successfully" })),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

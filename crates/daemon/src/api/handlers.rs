/// API request handlers
use super::responses::*;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, error};
use weaver_core::OrchestratorHandle;
use weaver_common::OrderId;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: OrchestratorHandle,
}

/// Handler for GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    debug!("API: GET /api/status");

    let snapshot = state
        .orchestrator
        .snapshot()
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;

    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        orders: snapshot.orders.len(),
        circuits_done: snapshot.total_circuits(),
    }))
}

/// Handler for GET /api/results
pub async fn get_all_results(
    State(state): State<AppState>,
) -> Result<Json<RunResultsResponse>, AppError> {
    debug!("API: GET /api/results");

    let snapshot = state
        .orchestrator
        .snapshot()
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;

    let orders: Vec<OrderResultsResponse> = snapshot
        .orders
        .iter()
        .map(|(id, report)| OrderResultsResponse::from_report(*id, report))
        .collect();

    Ok(Json(RunResultsResponse {
        total_circuits: snapshot.total_circuits(),
        orders,
    }))
}

/// Handler for GET /api/orders/:order_id/results
pub async fn get_order_results(
    State(state): State<AppState>,
    Path(order_id): Path<u64>,
) -> Result<Json<OrderResultsResponse>, AppError> {
    debug!("API: GET /api/orders/{}/results", order_id);

    let order_id = OrderId(order_id);
    let report = state
        .orchestrator
        .report(order_id)
        .await
        .map_err(|e| AppError::internal(e.to_string()))?;

    match report {
        Some(report) => Ok(Json(OrderResultsResponse::from_report(order_id, &report))),
        None => Err(AppError::not_found(format!(
            "no results recorded for {}",
            order_id
        ))),
    }
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    debug!("API: GET /health");
    (StatusCode::OK, "OK")
}

/// Application error type
pub struct AppError {
    message: String,
    status_code: StatusCode,
}

impl AppError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("API Error: {}", self.message);

        let body = Json(ErrorResponse::new(
            self.message,
            self.status_code.as_u16(),
        ));

        (self.status_code, body).into_response()
    }
}

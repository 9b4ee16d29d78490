//! HTTP handlers for `/api/data`

use super::JsonFileStore;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch},
    Json, Router,
};
use serde::Serialize;
use serde_json::{Map, Value};
use tower_http::cors::{Any, CorsLayer};

#[derive(Debug, Serialize)]
struct SuccessResponse {
    success: bool,
}

#[derive(Debug, Serialize)]
struct UpdatedResponse {
    success: bool,
    updated: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn create_router(store: JsonFileStore) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/data", get(get_data).post(save_data))
        .route("/api/data/:field", patch(update_field))
        .layer(cors)
        .with_state(store)
}

async fn get_data(State(store): State<JsonFileStore>) -> Json<Map<String, Value>> {
    Json(store.read().await)
}

async fn save_data(
    State(store): State<JsonFileStore>,
    Json(body): Json<Value>,
) -> Result<Json<SuccessResponse>, AppError> {
    let Value::Object(data) = body else {
        return Err(AppError::BadRequest("Body must be a JSON object".to_string()));
    };
    store
        .replace(data)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    tracing::debug!("State document replaced");
    Ok(Json(SuccessResponse { success: true }))
}

async fn update_field(
    State(store): State<JsonFileStore>,
    Path(field): Path<String>,
    Json(value): Json<Value>,
) -> Result<Json<UpdatedResponse>, AppError> {
    if field.trim().is_empty() {
        return Err(AppError::BadRequest("Field name is empty".to_string()));
    }
    let stored = store
        .set_field(&field, value)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    tracing::debug!(field = %field, "State field updated");

    let mut updated = Map::new();
    updated.insert(field, stored);
    Ok(Json(UpdatedResponse {
        success: true,
        updated,
    }))
}

// Error handling

enum AppError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal(msg) => {
                tracing::warn!(error = %msg, "State write failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;

// ── Health ──────────────────────────────────────────────────────────────

pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
}

async fn index() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "sessionlog collector",
        "status": "running"
    }))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// ── Log intake ──────────────────────────────────────────────────────────

pub fn log_routes() -> Router<AppState> {
    Router::new().route("/log", post(receive_log))
}

/// Accept one flattened session record and append it to the log file.
async fn receive_log(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let record = match body {
        serde_json::Value::Object(map) => map,
        other => {
            return Err((
                StatusCode::BAD_REQUEST,
                format!("expected a JSON object, got {}", value_kind(&other)),
            ));
        }
    };

    tracing::debug!(fields = record.len(), "received log record");
    state
        .store
        .append(&record)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(serde_json::json!({ "status": "success" })))
}

fn value_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

//! HTTP collector for sessionlog summary records.
//!
//! Accepts one flattened record per `POST /log` and appends it to a local
//! JSON-lines file. The transport contract matches what `HttpSink` in
//! `sessionlog-sink` emits.

pub mod routes;
pub mod state;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use sessionlog_core::AppConfig;
use subtle::ConstantTimeEq;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::{AppState, LogStore};

/// Middleware that validates a bearer token from the Authorization header.
///
/// Uses constant-time comparison (`subtle::ConstantTimeEq`) to prevent
/// timing-based side-channel attacks that could leak the token.
async fn auth_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let expected = match &state.config.server.auth_token {
        Some(t) => t,
        None => return next.run(req).await,
    };

    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    match auth_header {
        Some(value) if value.starts_with("Bearer ") => {
            let provided = &value[7..];
            // Constant-time comparison: both operands are compared in full,
            // regardless of where they first differ.
            if provided.as_bytes().ct_eq(expected.as_bytes()).into() {
                next.run(req).await
            } else {
                (StatusCode::UNAUTHORIZED, "Invalid or missing bearer token").into_response()
            }
        }
        _ => (StatusCode::UNAUTHORIZED, "Invalid or missing bearer token").into_response(),
    }
}

/// Build the axum Router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let config = &state.config;

    // Log intake requires auth when a token is configured.
    let protected = Router::new()
        .merge(routes::log_routes())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // Health and banner never require auth.
    let public = Router::new().merge(routes::health_routes());

    let mut app = Router::new()
        .merge(protected)
        .merge(public)
        .with_state(state.clone());

    app = app.layer(TraceLayer::new_for_http());

    if config.server.cors {
        let cors = if config.server.auth_token.is_some() {
            CorsLayer::new()
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers([
                    axum::http::header::CONTENT_TYPE,
                    axum::http::header::AUTHORIZATION,
                ])
                .allow_origin(Any)
        } else {
            CorsLayer::permissive()
        };
        app = app.layer(cors);
    }

    app
}

/// Start the collector.
pub async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let state = AppState::new(config.clone());
    tracing::info!(log_file = %state.store.path().display(), "collector log file");
    let router = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Starting collector on {}", addr);

    if config.server.auth_token.is_none() {
        tracing::warn!("No auth_token configured — collector is unauthenticated!");
    }

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state(auth_token: Option<String>) -> (AppState, tempfile::TempDir) {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = AppConfig::default();
        config.server.auth_token = auth_token;
        config.server.log_file = Some(tmp.path().join("received_logs.jsonl"));
        (AppState::new(config), tmp)
    }

    fn log_request(auth: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/log")
            .header("content-type", "application/json");
        if let Some(token) = auth {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_health_no_auth_required() {
        let (state, _tmp) = test_state(Some("secret-token".into()));
        let app = build_router(state);

        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_log_appends_record() {
        let (state, _tmp) = test_state(None);
        let store = state.store.clone();
        let app = build_router(state);

        let resp = app
            .oneshot(log_request(None, r#"{"session_id":"s1","apply_count":3}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_log_rejects_non_object_body() {
        let (state, _tmp) = test_state(None);
        let store = state.store.clone();
        let app = build_router(state);

        let resp = app
            .oneshot(log_request(None, r#"[1, 2, 3]"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_log_rejects_without_token() {
        let (state, _tmp) = test_state(Some("secret-token".into()));
        let app = build_router(state);

        let resp = app
            .oneshot(log_request(None, r#"{"session_id":"s1"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_log_rejects_wrong_token() {
        let (state, _tmp) = test_state(Some("secret-token".into()));
        let app = build_router(state);

        let resp = app
            .oneshot(log_request(Some("wrong-token"), r#"{"session_id":"s1"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_log_accepts_correct_token() {
        let (state, _tmp) = test_state(Some("secret-token".into()));
        let store = state.store.clone();
        let app = build_router(state);

        let resp = app
            .oneshot(log_request(Some("secret-token"), r#"{"session_id":"s1"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(store.count().await.unwrap(), 1);
    }
}

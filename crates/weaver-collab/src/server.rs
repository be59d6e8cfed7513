use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::info;
use weaver_persist::{PersistError, Persistence, SharedDocument};

use crate::config::ServerConfig;
use crate::error::{CollabError, ServerError};
use crate::rooms::RoomRegistry;
use crate::telemetry;

/// Room opened when the request names none
pub const DEFAULT_ROOM: &str = "default-room";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub persistence: Arc<Persistence>,
    pub rooms: Arc<RoomRegistry>,
}

impl AppState {
    pub fn new(persistence: Persistence) -> Self {
        let persistence = Arc::new(persistence);
        Self {
            rooms: Arc::new(RoomRegistry::new(persistence.clone())),
            persistence,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/room", get(open_room))
        .route("/xrpc/_health", get(health))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn root() -> &'static str {
    "okay"
}

async fn metrics() -> String {
    telemetry::render()
}

#[derive(Debug, Deserialize)]
struct RoomParams {
    room: Option<String>,
}

#[derive(Debug, Serialize)]
struct RoomResponse {
    room: String,
    length: usize,
    text: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

async fn open_room(
    State(state): State<AppState>,
    Query(params): Query<RoomParams>,
) -> Response {
    let room = params.room.unwrap_or_else(|| DEFAULT_ROOM.to_string());
    match state.rooms.open(&room).await {
        Ok(document) => {
            let text = document.text();
            Json(RoomResponse {
                length: document.len(),
                room,
                text,
            })
            .into_response()
        }
        Err(e @ PersistError::Key(_)) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
            .into_response(),
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    persistence: &'static str,
    store: bool,
    open_rooms: usize,
}

/// Returns 200 with stats if healthy, 503 if the store is unreachable.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let store_ok = state.persistence.ping().await.is_ok();

    let response = HealthResponse {
        status: if store_ok { "ok" } else { "degraded" },
        persistence: state.persistence.mode().as_str(),
        store: store_ok,
        open_rooms: state.rooms.len(),
    };

    let status = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(response))
}

/// Run the HTTP server until a shutdown signal, then write every open room.
pub async fn run(state: AppState, config: ServerConfig) -> Result<(), CollabError> {
    let addr = config.addr()?;
    let app = router(state.clone());

    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind { addr, source: e })?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ServerError::Serve { source: e })?;

    let written = state.rooms.flush_all().await;
    state.persistence.cancel_pending();
    info!(rooms = written, "wrote open rooms, shutting down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;

    fn app() -> (AppState, Router) {
        let state = AppState::new(Persistence::disabled());
        (state.clone(), router(state))
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_root_says_okay() {
        let (_, app) = app();
        let (status, body) = get(app, "/").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "okay");
    }

    #[tokio::test]
    async fn test_room_defaults_when_unnamed() {
        let (state, app) = app();
        let (status, body) = get(app, "/room").await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["room"], DEFAULT_ROOM);
        assert_eq!(json["length"], 0);
        assert_eq!(state.rooms.len(), 1);
        assert!(state.persistence.is_bound(DEFAULT_ROOM));
    }

    #[tokio::test]
    async fn test_room_returns_existing_text() {
        let (state, app) = app();
        let doc = state.rooms.open("notes").await.unwrap();
        doc.insert(0, "draft").unwrap();

        let (status, body) = get(app, "/room?room=notes").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["text"], "draft");
        assert_eq!(state.rooms.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_room_is_bad_request() {
        let (state, app) = app();
        let (status, _) = get(app, "/room?room=a%2F%2Fb").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(state.rooms.is_empty());
    }

    #[tokio::test]
    async fn test_health_reports_mode_and_rooms() {
        let (state, app) = app();
        state.rooms.open("one").await.unwrap();

        let (status, body) = get(app, "/xrpc/_health").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["persistence"], "disabled");
        assert_eq!(json["open_rooms"], 1);
    }

    #[tokio::test]
    async fn test_metrics_renders() {
        let (_, app) = app();
        let (status, _) = get(app, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
    }
}

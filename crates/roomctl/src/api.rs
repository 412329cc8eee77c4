use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::engine::EngineHandle;
use crate::engine::Trigger;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Key combinations an external hotkey daemon should bind to the trigger
/// endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct Hotkeys {
    pub show: String,
    pub quit: String,

    /// Absent when voice control is disabled.
    pub voice: Option<String>,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
    title: String,
    hotkeys: Hotkeys,
}

/// Response for the trigger endpoints
#[derive(Serialize)]
struct AcceptedResponse {
    accepted: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    version: &'static str,
    hotkeys: Hotkeys,
    engine: EngineHandle,
}

impl AppState {
    pub fn new(engine: EngineHandle, hotkeys: Hotkeys) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            hotkeys,
            engine,
        }
    }
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
            title: state.engine.snapshot().title,
            hotkeys: state.hotkeys.clone(),
        }),
    )
}

/// Handler for GET /v1/status
#[tracing::instrument(skip(state))]
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.engine.snapshot()))
}

async fn accept(state: &AppState, name: &str, trigger: Trigger) -> Response {
    if state.engine.send(trigger).await {
        (
            StatusCode::ACCEPTED,
            Json(AcceptedResponse {
                accepted: name.to_string(),
            }),
        )
            .into_response()
    } else {
        tracing::warn!("Engine stopped, rejecting {}", name);
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "engine stopped".to_string(),
            }),
        )
            .into_response()
    }
}

/// Handler for POST /v1/show
#[tracing::instrument(skip(state))]
async fn show(State(state): State<Arc<AppState>>) -> Response {
    accept(&state, "show", Trigger::Show).await
}

/// Handler for POST /v1/hide
#[tracing::instrument(skip(state))]
async fn hide(State(state): State<Arc<AppState>>) -> Response {
    accept(&state, "hide", Trigger::Hide).await
}

/// Handler for POST /v1/scan
#[tracing::instrument(skip(state))]
async fn scan(State(state): State<Arc<AppState>>) -> Response {
    accept(&state, "scan", Trigger::Scan).await
}

/// Handler for POST /v1/voice
#[tracing::instrument(skip(state))]
async fn voice(State(state): State<Arc<AppState>>) -> Response {
    if state.hotkeys.voice.is_none() {
        return (
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: "voice control is disabled".to_string(),
            }),
        )
            .into_response();
    }
    accept(&state, "voice", Trigger::Voice).await
}

/// Handler for POST /v1/toggle/{entity_id}
#[tracing::instrument(skip(state))]
async fn toggle(State(state): State<Arc<AppState>>, Path(entity_id): Path<String>) -> Response {
    match entity_id.split_once('.') {
        Some((domain, object_id)) if !domain.is_empty() && !object_id.is_empty() => {}
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: format!("'{}' is not an entity ID", entity_id),
                }),
            )
                .into_response();
        }
    }

    let name = format!("toggle {}", entity_id);
    accept(&state, &name, Trigger::Toggle(entity_id)).await
}

/// Handler for POST /v1/quit
#[tracing::instrument(skip(state))]
async fn quit(State(state): State<Arc<AppState>>) -> Response {
    accept(&state, "quit", Trigger::Quit).await
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/status", get(status))
        .route("/v1/show", post(show))
        .route("/v1/hide", post(hide))
        .route("/v1/scan", post(scan))
        .route("/v1/voice", post(voice))
        .route("/v1/toggle/:entity_id", post(toggle))
        .route("/v1/quit", post(quit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the control API server
///
/// Binds to `listen:port` and serves until `shutdown_rx` fires.
pub async fn serve(
    listen: &str,
    port: u16,
    state: AppState,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<(), std::io::Error> {
    let app = create_router(Arc::new(state));

    let addr: SocketAddr = format!("{}:{}", listen, port)
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
    tracing::info!("Starting control API on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("Control API shutting down gracefully");
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::AppContext;
    use crate::engine::Engine;
    use crate::beacon::BeaconMapping;
    use crate::beacon::MockScanner;
    use crate::config::DisplayConfig;
    use crate::config::FiltersConfig;
    use crate::config::ScanConfig;
    use crate::feedback::Feedback;
    use crate::hub::Hub;
    use crate::hub::HubPool;
    use crate::hub::MockHub;
    use crate::locator::RoomLocator;
    use crate::window::WindowTimers;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use tower::ServiceExt;

    fn hotkeys(voice: bool) -> Hotkeys {
        Hotkeys {
            show: "ctrl+shift+space".to_string(),
            quit: "ctrl+shift+q".to_string(),
            voice: voice.then(|| "ctrl+shift+i".to_string()),
        }
    }

    fn engine() -> (Engine, EngineHandle) {
        let hub: Arc<dyn Hub> = Arc::new(MockHub::new("http://mock"));
        Engine::new(AppContext {
            display: DisplayConfig::default(),
            filters: FiltersConfig::default(),
            scan: ScanConfig::default(),
            timers: WindowTimers::default(),
            hubs: Arc::new(HubPool::new(vec![hub])),
            locator: RoomLocator::new(
                Arc::new(MockScanner::new()),
                Arc::new(BeaconMapping::default()),
                None,
            ),
            voice: None,
            feedback: Feedback::new(false),
            settle: Duration::ZERO,
        })
    }

    /// Router backed by an engine that is not running; triggers sit in its
    /// queue.
    fn router(voice: bool) -> (Router, Engine) {
        let (engine, handle) = engine();
        (
            create_router(Arc::new(AppState::new(handle, hotkeys(voice)))),
            engine,
        )
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_ping() {
        let (app, _engine) = router(false);
        let response = app
            .oneshot(Request::builder().uri("/v1/ping").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn test_info_lists_hotkeys() {
        let (app, _engine) = router(true);
        let response = app
            .oneshot(Request::builder().uri("/v1/info").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["title"], "roomctl");
        assert_eq!(json["hotkeys"]["show"], "ctrl+shift+space");
        assert_eq!(json["hotkeys"]["voice"], "ctrl+shift+i");
    }

    #[tokio::test]
    async fn test_status_is_snapshot() {
        let (app, _engine) = router(false);
        let response = app
            .oneshot(Request::builder().uri("/v1/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "Idle");
        assert_eq!(json["visible"], false);
        assert_eq!(json["devices"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_triggers_are_accepted() {
        let (app, _engine) = router(true);
        for (uri, name) in [
            ("/v1/show", "show"),
            ("/v1/hide", "hide"),
            ("/v1/scan", "scan"),
            ("/v1/voice", "voice"),
            ("/v1/toggle/light.desk", "toggle light.desk"),
            ("/v1/quit", "quit"),
        ] {
            let response = app.clone().oneshot(post(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::ACCEPTED, "{}", uri);
            assert_eq!(body_json(response).await["accepted"], name);
        }
    }

    #[tokio::test]
    async fn test_toggle_rejects_bad_entity() {
        let (app, _engine) = router(false);
        let response = app.oneshot(post("/v1/toggle/desk")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_voice_disabled() {
        let (app, _engine) = router(false);
        let response = app.oneshot(post("/v1/voice")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_stopped_engine() {
        let (app, engine) = router(false);
        drop(engine);

        let response = app.oneshot(post("/v1/show")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_get_on_trigger_not_allowed() {
        let (app, _engine) = router(false);
        let response = app
            .oneshot(Request::builder().uri("/v1/show").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}

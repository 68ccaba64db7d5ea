use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use pulse_bus::{BackoffPolicy, BusConnector, BusConsumer, ConsumerState};
use pulse_settings::{PulseSettings, ServerSettings};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::broadcast::Broadcaster;
use crate::error::ServerError;
use crate::health::{health_check, HealthResponse};
use crate::registry::ClientRegistry;
use crate::relay::RelayHandler;
use crate::shutdown::ShutdownCoordinator;
use crate::sse::events_handler;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ClientRegistry>,
    pub settings: Arc<ServerSettings>,
    pub consumer_state: watch::Receiver<ConsumerState>,
    pub started_at: Instant,
    pub metrics: Option<PrometheusHandle>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Result<Router, ServerError> {
    let cors = cors_layer(&state.settings.cors_origins)?;

    let mut router = Router::new()
        .route("/events", get(events_handler))
        .route("/health", get(health_handler));
    if state.settings.metrics_enabled && state.metrics.is_some() {
        router = router.route("/metrics", get(metrics_handler));
    }

    Ok(router
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}

/// Any origin when the list is empty (or contains `*`), otherwise exactly
/// the listed origins.
fn cors_layer(origins: &[String]) -> Result<CorsLayer, ServerError> {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return Ok(CorsLayer::permissive());
    }

    let allowed = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|_| ServerError::InvalidOrigin(origin.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::CACHE_CONTROL]))
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let bus = *state.consumer_state.borrow();
    Json(health_check(
        state.started_at,
        state.registry.open_count(),
        bus,
        state.registry.is_drained(),
    ))
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            pulse_telemetry::render(handle),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Bind the listener, start the bus consumer and serve viewers.
///
/// Only startup can fail: a bad CORS origin or an unbindable address. Bus
/// trouble after this point is retried in the background while viewers keep
/// being served.
pub async fn start(
    settings: &PulseSettings,
    connector: Arc<dyn BusConnector>,
    metrics: Option<PrometheusHandle>,
) -> Result<RelayHandle, ServerError> {
    let server_settings = Arc::new(settings.server.clone());
    let registry = Arc::new(ClientRegistry::new());

    let broadcaster = Arc::new(Broadcaster::from_settings(Arc::clone(&registry), &server_settings));
    let consumer = BusConsumer::new(
        connector,
        Arc::new(RelayHandler::new(broadcaster)),
        BackoffPolicy::from(&settings.bus.backoff),
    );
    let consumer_state = consumer.state();

    let router = build_router(AppState {
        registry: Arc::clone(&registry),
        settings: Arc::clone(&server_settings),
        consumer_state: consumer_state.clone(),
        started_at: Instant::now(),
        metrics,
    })?;

    let addr = format!("{}:{}", server_settings.host, server_settings.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: addr.clone(),
            source,
        })?;
    let local_addr = listener.local_addr()?;

    let coordinator = ShutdownCoordinator::new();
    let consumer_task = tokio::spawn(consumer.run(coordinator.token()));

    let token = coordinator.token();
    let server_task = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await;
        if let Err(e) = result {
            error!(error = %e, "http server failed");
        }
    });

    info!(
        addr = %local_addr,
        source = settings.bus.source.as_str(),
        topic = %settings.bus.topic,
        wire_format = %server_settings.wire_format,
        "relay started"
    );

    Ok(RelayHandle {
        local_addr,
        registry,
        consumer_state,
        coordinator,
        shutdown_timeout: server_settings.shutdown_timeout(),
        consumer: consumer_task,
        server: server_task,
    })
}

/// Handle returned by `start()`; owns the background tasks.
pub struct RelayHandle {
    local_addr: SocketAddr,
    registry: Arc<ClientRegistry>,
    consumer_state: watch::Receiver<ConsumerState>,
    coordinator: ShutdownCoordinator,
    shutdown_timeout: Duration,
    consumer: JoinHandle<()>,
    server: JoinHandle<()>,
}

impl RelayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    pub fn consumer_state(&self) -> watch::Receiver<ConsumerState> {
        self.consumer_state.clone()
    }

    /// Stop the consumer, drain the registry, then stop the listener.
    ///
    /// Drained viewers still flush frames already queued for them. Each stage
    /// gets the configured deadline; connections still writing when the
    /// listener's deadline passes are aborted.
    pub async fn shutdown(self) {
        info!("relay shutting down");
        self.coordinator.shutdown();

        let _ = self
            .coordinator
            .join_within("bus consumer", self.consumer, self.shutdown_timeout)
            .await;
        let finished = self.registry.drain();
        let _ = self
            .coordinator
            .join_within("http server", self.server, self.shutdown_timeout)
            .await;

        info!(drained_sessions = finished, "relay stopped");
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tower::ServiceExt;

    use super::*;

    fn state_with(settings: ServerSettings, metrics: Option<PrometheusHandle>) -> AppState {
        let (_tx, rx) = watch::channel(ConsumerState::Consuming);
        AppState {
            registry: Arc::new(ClientRegistry::new()),
            settings: Arc::new(settings),
            consumer_state: rx,
            started_at: Instant::now(),
            metrics,
        }
    }

    fn state() -> AppState {
        state_with(ServerSettings::default(), None)
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_clients_and_bus() {
        let app = build_router(state()).unwrap();
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["clients"], 0);
        assert_eq!(json["bus"], "consuming");
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn events_is_an_event_stream() {
        let state = state();
        let registry = Arc::clone(&state.registry);
        let app = build_router(state).unwrap();
        let resp = app
            .oneshot(Request::get("/events").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
        assert_eq!(registry.len(), 1);
        drop(resp);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn drained_registry_refuses_viewers() {
        let state = state();
        let _ = state.registry.drain();
        let app = build_router(state).unwrap();
        let resp = app
            .oneshot(Request::get("/events").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn metrics_route_requires_handle() {
        let app = build_router(state()).unwrap();
        let resp = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let handle = PrometheusBuilder::new().build_recorder().handle();
        let app = build_router(state_with(ServerSettings::default(), Some(handle))).unwrap();
        let resp = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get(header::CONTENT_TYPE).unwrap();
        assert!(content_type.to_str().unwrap().starts_with("text/plain"));
    }

    #[tokio::test]
    async fn metrics_can_be_disabled() {
        let settings = ServerSettings {
            metrics_enabled: false,
            ..ServerSettings::default()
        };
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let app = build_router(state_with(settings, Some(handle))).unwrap();
        let resp = app
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn permissive_cors_by_default() {
        let app = build_router(state()).unwrap();
        let resp = app
            .oneshot(
                Request::get("/health")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            resp.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn cors_origin_list() {
        let settings = ServerSettings {
            cors_origins: vec!["http://localhost:3000".into()],
            ..ServerSettings::default()
        };
        let app = build_router(state_with(settings, None)).unwrap();

        let allowed = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/events")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            allowed.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "http://localhost:3000"
        );

        let denied = app
            .oneshot(
                Request::get("/health")
                    .header(header::ORIGIN, "http://evil.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(denied.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[test]
    fn invalid_cors_origin_rejected() {
        let result = cors_layer(&["http://bad\norigin".to_string()]);
        assert!(matches!(result, Err(ServerError::InvalidOrigin(_))));
    }
}

//! Axum server assembly: shared state, routes, startup and graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arrows_core::Clock;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::{JwtVerifier, PermissionChecker, RoleClaimPermissions, TokenVerifier};
use crate::config::{ServerConfig, Settings};
use crate::coordinator::{CoordinatorDeps, CoordinatorOptions, SHUTDOWN_REASON};
use crate::health::HealthReport;
use crate::registry::SessionRegistry;
use crate::router::ConnectionRouter;
use crate::transport::{ConnectionHub, MessageTransport};
use crate::websocket::socket_handler;

/// How long to wait for the listener to drain before giving up.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Routing policy and session lookup.
    pub router: Arc<ConnectionRouter>,
    /// Live connections.
    pub hub: Arc<ConnectionHub>,
    /// Live sessions.
    pub registry: Arc<SessionRegistry>,
    /// Listener settings.
    pub config: Arc<ServerConfig>,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/socket/{session_id}/{role}", get(socket_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// The arrows server, before it is bound.
pub struct ArrowsServer {
    settings: Settings,
    state: AppState,
}

impl ArrowsServer {
    /// Wire the default collaborators: JWT verifier, role-claim permissions,
    /// connection hub and registry.
    pub fn new(settings: Settings, clock: Arc<dyn Clock>) -> Self {
        let verifier: Arc<dyn TokenVerifier> = Arc::new(JwtVerifier::new(
            &settings.auth.jwt_secret,
            settings.auth.leeway_secs,
        ));
        Self::with_policy(settings, clock, verifier, Arc::new(RoleClaimPermissions))
    }

    /// Wire custom verification and permission collaborators.
    pub fn with_policy(
        settings: Settings,
        clock: Arc<dyn Clock>,
        verifier: Arc<dyn TokenVerifier>,
        permissions: Arc<dyn PermissionChecker>,
    ) -> Self {
        let hub = Arc::new(ConnectionHub::new(settings.server.send_queue_capacity));
        let transport: Arc<dyn MessageTransport> = hub.clone();
        let registry = Arc::new(SessionRegistry::new(CoordinatorDeps {
            transport,
            clock,
            options: CoordinatorOptions {
                mailbox_capacity: settings.session.mailbox_capacity,
                trial_timeout: settings.session.trial_timeout(),
            },
        }));
        let router = Arc::new(ConnectionRouter::new(
            Arc::clone(&registry),
            verifier,
            permissions,
        ));
        let state = AppState {
            router,
            hub,
            registry,
            config: Arc::new(settings.server.clone()),
            metrics: None,
            start_time: Instant::now(),
        };
        Self { settings, state }
    }

    /// Serve `/metrics` from `handle`.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.state.metrics = Some(handle);
        self
    }

    /// Session registry, for seeding sessions before or after start.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.state.registry
    }

    /// Connection hub.
    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.state.hub
    }

    /// Axum router over this server's state.
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Bind and serve in the background.
    pub async fn start(self) -> std::io::Result<ServerHandle> {
        let addr = format!("{}:{}", self.settings.server.host, self.settings.server.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let local_addr = listener.local_addr()?;

        let shutdown = CancellationToken::new();
        let router = self.router();
        let serve_token = shutdown.clone();
        let server = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, router)
                .with_graceful_shutdown(serve_token.cancelled_owned())
                .await
            {
                warn!(error = %err, "server exited with error");
            }
        });

        let sweeper = self.settings.session.ttl().map(|ttl| {
            Arc::clone(&self.state.registry).start_sweeper(
                Duration::from_secs(self.settings.session.sweep_interval_secs),
                ttl,
                shutdown.clone(),
            )
        });

        info!(%local_addr, "arrows server started");
        Ok(ServerHandle {
            local_addr,
            shutdown,
            registry: Arc::clone(&self.state.registry),
            server,
            sweeper,
        })
    }
}

/// Handle returned by [`ArrowsServer::start`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    registry: Arc<SessionRegistry>,
    server: JoinHandle<()>,
    sweeper: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Token cancelled when shutdown begins.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Abort live sessions, stop accepting, and wait for the listener to drain.
    pub async fn shutdown(self) {
        info!("shutting down");
        self.registry.shutdown_all(SHUTDOWN_REASON).await;
        self.shutdown.cancel();

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.server).await.is_err() {
            warn!(timeout = ?SHUTDOWN_TIMEOUT, "server did not drain in time");
        }
        if let Some(sweeper) = self.sweeper {
            let _ = sweeper.await;
        }
        info!("shutdown complete");
    }
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport::collect(
        state.start_time,
        &state.hub,
        &state.registry,
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

//! The Registry Service: one HTTP server per machine, shared by every
//! process that starts against the same well-known port.

use crate::client::RegistryClient;
use crate::features::observability::controller::ObservabilityController;
use crate::features::registration::controller::RegistrationController;
use crate::features::registration::repo::{
    FilesystemRegistryRepository, InMemoryRegistryRepository, RegistryRepository,
};
use crate::features::registration::service::RegistrationService;
use crate::shared::config::RegistryConfig;
use crate::shared::error::{RegistryError, RegistryResult};
use axum::body::Bytes;
use axum::extract::{MatchedPath, Path, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use devlink_core::{InstanceRecord, RegistrySnapshot, RegistrySource};
use devlink_proto::HealthResponse;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const PROBE_ATTEMPTS: u32 = 3;
const PROBE_BACKOFF: Duration = Duration::from_millis(100);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Application state shared across handlers.
pub struct AppState {
    pub controller: RegistrationController,
    pub observability: Arc<ObservabilityController>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/workers", get(handle_list))
        .route("/workers/init", post(handle_init))
        .route(
            "/workers/:name",
            get(handle_get).post(handle_register).delete(handle_unregister),
        )
        .route("/health", get(handle_health))
        .route("/metrics", get(handle_metrics))
        .route_layer(middleware::from_fn_with_state(state.clone(), track_metrics))
        .with_state(state)
}

async fn track_metrics(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let started = Instant::now();

    let response = next.run(request).await;

    state.observability.record_api_request(
        &endpoint,
        response.status().as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn handle_init(State(state): State<Arc<AppState>>) -> RegistryResult<StatusCode> {
    state.controller.reset().await?;
    Ok(StatusCode::OK)
}

async fn handle_register(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> RegistryResult<StatusCode> {
    let record: InstanceRecord = serde_json::from_slice(&body)?;
    state.controller.register(name, record).await?;
    Ok(StatusCode::OK)
}

async fn handle_unregister(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> RegistryResult<StatusCode> {
    state.controller.unregister(name).await?;
    Ok(StatusCode::OK)
}

async fn handle_get(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> RegistryResult<Json<InstanceRecord>> {
    Ok(Json(state.controller.get(name).await?))
}

async fn handle_list(State(state): State<Arc<AppState>>) -> RegistryResult<Json<RegistrySnapshot>> {
    Ok(Json(state.controller.list().await?))
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}

async fn handle_metrics(State(state): State<Arc<AppState>>) -> RegistryResult<Response> {
    let body = state.observability.render_metrics()?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

/// The authoritative Registry Service, serving on a socket this process owns.
pub struct RegistryServer {
    addr: SocketAddr,
    service: Arc<RegistrationService>,
    shutdown: Option<oneshot::Sender<()>>,
    serve: JoinHandle<()>,
    sweep: JoinHandle<()>,
}

impl RegistryServer {
    /// Serves the registry API on an already-bound listener.
    pub async fn serve(config: &RegistryConfig, listener: TcpListener) -> RegistryResult<Self> {
        let addr = listener.local_addr()?;

        let repo: Arc<dyn RegistryRepository> = match &config.registry_dir {
            Some(dir) => {
                info!(dir = %dir.display(), "Using filesystem-backed registry");
                Arc::new(FilesystemRegistryRepository::new(dir.clone()))
            }
            None => Arc::new(InMemoryRegistryRepository::new()),
        };
        let observability = ObservabilityController::create()?;
        let service = Arc::new(RegistrationService::new(repo, observability.clone()));
        let state = Arc::new(AppState {
            controller: RegistrationController::new(service.clone()),
            observability,
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(state);
        let serve = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(error) = result {
                error!(error = %error, "Registry server stopped with an error");
            }
        });

        let sweep = service.clone().spawn_eviction_sweep(
            config.heartbeat_interval.max(MIN_SWEEP_INTERVAL),
            config.stale_after,
        );

        info!(%addr, "Registry service listening");

        Ok(Self {
            addr,
            service,
            shutdown: Some(shutdown_tx),
            serve,
            sweep,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn service(&self) -> &Arc<RegistrationService> {
        &self.service
    }

    /// Closes the socket and discards in-memory registrations.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.sweep.abort();
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut self.serve)
            .await
            .is_err()
        {
            warn!(addr = %self.addr, "Registry server did not drain in time; aborting");
            self.serve.abort();
        }

        if !self.service.is_persistent() {
            if let Err(error) = self.service.reset().await {
                warn!(error = %error, "Failed to discard registry state");
            }
        }
        info!(addr = %self.addr, "Registry service stopped");
    }
}

impl Drop for RegistryServer {
    fn drop(&mut self) {
        self.sweep.abort();
    }
}

/// How this process takes part in the shared registry.
pub enum RegistryRole {
    /// This process bound the well-known port and owns the registry.
    Authoritative(RegistryServer),
    /// Another compatible registry already owns the port.
    Client(RegistryClient),
}

impl RegistryRole {
    pub fn is_authoritative(&self) -> bool {
        matches!(self, RegistryRole::Authoritative(_))
    }

    pub fn addr(&self) -> Option<SocketAddr> {
        match self {
            RegistryRole::Authoritative(server) => Some(server.local_addr()),
            RegistryRole::Client(client) => client
                .base_url()
                .socket_addrs(|| None)
                .ok()
                .and_then(|addrs| addrs.into_iter().next()),
        }
    }

    /// Read access for the binding facade and tunnels.
    pub fn source(&self) -> Arc<dyn RegistrySource> {
        match self {
            RegistryRole::Authoritative(server) => server.service().clone(),
            RegistryRole::Client(client) => Arc::new(client.clone()),
        }
    }

    /// Stopping a client is a no-op.
    pub async fn stop(self) {
        match self {
            RegistryRole::Authoritative(server) => server.stop().await,
            RegistryRole::Client(_) => {}
        }
    }
}

/// Starts the Registry Service, or joins the one already running.
///
/// Losing the bind race to another devlink process is the expected path and
/// yields [`RegistryRole::Client`]. A port held by anything that does not
/// answer the health probe as a devlink registry is an error.
pub async fn start(config: &RegistryConfig) -> RegistryResult<RegistryRole> {
    match TcpListener::bind(config.addr).await {
        Ok(listener) => Ok(RegistryRole::Authoritative(
            RegistryServer::serve(config, listener).await?,
        )),
        Err(bind_error) if bind_error.kind() == ErrorKind::AddrInUse => {
            let client = RegistryClient::new(config.addr)?;
            let mut last_error = None;
            for attempt in 1..=PROBE_ATTEMPTS {
                match client.health().await {
                    Ok(_) => {
                        info!(addr = %config.addr, "Joined existing registry service");
                        return Ok(RegistryRole::Client(client));
                    }
                    Err(error) => {
                        warn!(addr = %config.addr, attempt, error = %error, "Registry health probe failed");
                        last_error = Some(error);
                        tokio::time::sleep(PROBE_BACKOFF).await;
                    }
                }
            }
            let reason = last_error.map(|error| error.to_string()).unwrap_or_default();
            error!(addr = %config.addr, reason = %reason, "Registry port is held by an incompatible process");
            Err(RegistryError::RegistryUnavailable(format!(
                "{} is in use by something other than a devlink registry: {reason}",
                config.addr
            )))
        }
        Err(bind_error) => Err(RegistryError::RegistryUnavailable(format!(
            "cannot bind {}: {bind_error}",
            config.addr
        ))),
    }
}

use crate::features::inspector_tunnel::repo::InspectorTargetRepository;
use crate::features::inspector_tunnel::service::{failed_response, InspectorSession, SessionOptions};
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use devlink_proto::inspector::{CLOSE_TOO_MANY_CLIENTS, TOO_MANY_CLIENTS_REASON};
use devlink_proto::{InspectorCommand, TargetDescriptor, VersionInfo};
use futures::stream::FuturesUnordered;
use futures::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// Close code for a session whose instance could not be reached.
const CLOSE_UPSTREAM_UNAVAILABLE: u16 = 1011;

pub struct InspectorController {
    repo: Arc<dyn InspectorTargetRepository>,
    options: SessionOptions,
    /// Advertised in discovery documents when the request has no `Host`.
    public_addr: SocketAddr,
    attached: Mutex<HashSet<String>>,
}

impl InspectorController {
    pub fn new(
        repo: Arc<dyn InspectorTargetRepository>,
        options: SessionOptions,
        public_addr: SocketAddr,
    ) -> Self {
        Self {
            repo,
            options,
            public_addr,
            attached: Mutex::new(HashSet::new()),
        }
    }

    pub async fn targets(&self, authority: &str) -> Vec<TargetDescriptor> {
        self.repo
            .debuggable()
            .await
            .iter()
            .map(|record| {
                TargetDescriptor::for_instance(&record.name, authority, &record.address.origin())
            })
            .collect()
    }

    /// Marks `name` as having a client. Returns `None` when one is already
    /// attached.
    fn claim(self: &Arc<Self>, name: &str) -> Option<AttachGuard> {
        let mut attached = self.attached.lock().unwrap_or_else(PoisonError::into_inner);
        if !attached.insert(name.to_string()) {
            return None;
        }
        Some(AttachGuard {
            controller: self.clone(),
            name: name.to_string(),
        })
    }
}

struct AttachGuard {
    controller: Arc<InspectorController>,
    name: String,
}

impl Drop for AttachGuard {
    fn drop(&mut self) {
        self.controller
            .attached
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

pub fn router(controller: Arc<InspectorController>) -> Router {
    Router::new()
        .route("/json/version", get(handle_version))
        .route("/json", get(handle_targets))
        .route("/json/list", get(handle_targets))
        .route("/:name", get(handle_attach))
        .with_state(controller)
}

async fn handle_version() -> Json<VersionInfo> {
    Json(VersionInfo::current())
}

async fn handle_targets(
    State(controller): State<Arc<InspectorController>>,
    headers: HeaderMap,
) -> Json<Vec<TargetDescriptor>> {
    let authority = headers
        .get(header::HOST)
        .and_then(|host| host.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| controller.public_addr.to_string());
    Json(controller.targets(&authority).await)
}

async fn handle_attach(
    State(controller): State<Arc<InspectorController>>,
    Path(name): Path<String>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    if controller.repo.inspector_url(&name).await.is_none() {
        return (
            StatusCode::NOT_FOUND,
            format!("No running devlink instance named \"{name}\" exposes a debugger"),
        )
            .into_response();
    }
    match ws {
        Some(ws) => ws.on_upgrade(move |socket| attach(socket, controller, name)),
        None => (
            StatusCode::UPGRADE_REQUIRED,
            format!("Connect to /{name} with a WebSocket debugger client"),
        )
            .into_response(),
    }
}

async fn close_with(mut socket: WebSocket, code: u16, reason: String) {
    let frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
    let _ = socket.flush().await;
}

async fn attach(socket: WebSocket, controller: Arc<InspectorController>, name: String) {
    let Some(_guard) = controller.claim(&name) else {
        info!(name = %name, "Rejecting second debugger client");
        close_with(socket, CLOSE_TOO_MANY_CLIENTS, TOO_MANY_CLIENTS_REASON.to_string()).await;
        return;
    };

    let session =
        match InspectorSession::open(name.clone(), controller.repo.clone(), controller.options).await {
            Ok(session) => session,
            Err(error) => {
                warn!(name = %name, error = %error, "Could not open inspector session");
                close_with(socket, CLOSE_UPSTREAM_UNAVAILABLE, error.to_string()).await;
                return;
            }
        };
    info!(name = %name, "Debugger attached");

    let (mut client_tx, mut client_rx) = socket.split();
    let mut events = session.subscribe();
    let mut in_flight = FuturesUnordered::new();

    loop {
        tokio::select! {
            message = client_rx.next() => {
                let text = match message {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(error)) => {
                        debug!(name = %name, error = %error, "Debugger socket failed");
                        break;
                    }
                };
                let command = match InspectorCommand::parse(&text) {
                    Ok(command) => command,
                    Err(error) => {
                        debug!(name = %name, error = %error, "Ignoring malformed debugger command");
                        continue;
                    }
                };
                let Some(client_id) = command.id else {
                    debug!(name = %name, method = %command.method, "Ignoring debugger command without an id");
                    continue;
                };
                match session.submit(command) {
                    Ok(response) => in_flight.push(async move { (client_id, response.await) }),
                    Err(_) => break,
                }
            }
            Some((client_id, outcome)) = in_flight.next(), if !in_flight.is_empty() => {
                let response = match outcome {
                    Ok(Ok(response)) => response,
                    Ok(Err(error)) => failed_response(client_id, &error),
                    Err(_) => break,
                };
                let text = serde_json::to_string(&response).unwrap_or_default();
                if client_tx.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(name = %name, skipped, "Debugger client fell behind; events dropped");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let text = serde_json::to_string(&event).unwrap_or_default();
                if client_tx.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    }

    drop(in_flight);
    session.close().await;
    info!(name = %name, "Debugger detached");
}

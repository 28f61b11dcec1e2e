//! One debugging session per instance name.
//!
//! A session owns its upstream socket on a dedicated task. Commands from the
//! client are renumbered into the session's own id space on the way up, and
//! each response is handed back through the oneshot registered for it, with
//! the client's original id restored. The task re-reads the registry on
//! every poll tick; when the instance's debug endpoint moves (a restart) it
//! fails whatever is still pending, reconnects, and replays every domain the
//! client had enabled.

use crate::features::inspector_tunnel::repo::{InspectorTargetRepository, UpstreamSocket};
use crate::shared::error::TunnelResult;
use devlink_core::{CoreError, Result};
use devlink_proto::inspector::KEEPALIVE_METHOD;
use devlink_proto::{InspectorCommand, InspectorEvent, InspectorResponse, UpstreamMessage};
use futures::{SinkExt, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

const EVENT_BUFFER: usize = 256;
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// JSON-RPC error code for commands lost to an upstream reset.
pub const UPSTREAM_RESET_CODE: i64 = -32000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub poll_interval: Duration,
    pub keepalive_interval: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            keepalive_interval: Duration::from_secs(10),
        }
    }
}

type Reply = oneshot::Sender<Result<InspectorResponse>>;

struct Submit {
    client_id: u64,
    command: InspectorCommand,
    reply: Reply,
}

/// Client-facing handle; stays valid across upstream reconnects.
pub struct InspectorSession {
    name: String,
    requests: mpsc::UnboundedSender<Submit>,
    events: broadcast::Sender<InspectorEvent>,
    task: JoinHandle<()>,
}

impl InspectorSession {
    /// Connects to the debug endpoint `name` is registered with.
    pub async fn open(
        name: impl Into<String>,
        repo: Arc<dyn InspectorTargetRepository>,
        options: SessionOptions,
    ) -> TunnelResult<Self> {
        let name = name.into();
        let url = repo
            .inspector_url(&name)
            .await
            .ok_or_else(|| CoreError::UnregisteredBinding(name.clone()))?;
        let socket = repo.connect(&url).await?;
        info!(name = %name, upstream = %url, "Inspector session opened");

        let (requests, requests_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let actor = SessionActor {
            name: name.clone(),
            repo,
            upstream: Some(Upstream { url, socket }),
            pending: HashMap::new(),
            next_id: 1,
            enabled: BTreeSet::new(),
            events: events.clone(),
        };
        let task = tokio::spawn(actor.run(requests_rx, options));

        Ok(Self {
            name,
            requests,
            events,
            task,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Forwards `command` and returns the channel its response arrives on.
    /// The response carries the command's own id; commands without one are
    /// rejected.
    pub fn submit(
        &self,
        command: InspectorCommand,
    ) -> Result<oneshot::Receiver<Result<InspectorResponse>>> {
        let Some(client_id) = command.id else {
            return Err(CoreError::InvalidRecord(format!(
                "inspector command {} has no id",
                command.method
            )));
        };
        let (reply, response) = oneshot::channel();
        self.requests
            .send(Submit {
                client_id,
                command,
                reply,
            })
            .map_err(|_| self.closed())?;
        Ok(response)
    }

    pub async fn send(&self, command: InspectorCommand) -> Result<InspectorResponse> {
        self.submit(command)?.await.map_err(|_| self.closed())?
    }

    /// Events from whichever upstream is current.
    pub fn subscribe(&self) -> broadcast::Receiver<InspectorEvent> {
        self.events.subscribe()
    }

    /// Fails pending commands and disconnects the upstream.
    pub async fn close(self) {
        let Self {
            name,
            requests,
            task,
            ..
        } = self;
        drop(requests);
        if let Err(error) = task.await {
            warn!(name = %name, error = %error, "Inspector session task failed");
        }
        info!(name = %name, "Inspector session closed");
    }

    fn closed(&self) -> CoreError {
        CoreError::UpstreamReset(format!("inspector session for \"{}\" is closed", self.name))
    }
}

struct Upstream {
    url: String,
    socket: UpstreamSocket,
}

enum Pending {
    Client { client_id: u64, reply: Reply },
    /// Keepalives and replayed `enable`s; the response is dropped.
    Internal,
}

struct SessionActor {
    name: String,
    repo: Arc<dyn InspectorTargetRepository>,
    upstream: Option<Upstream>,
    pending: HashMap<u64, Pending>,
    next_id: u64,
    enabled: BTreeSet<String>,
    events: broadcast::Sender<InspectorEvent>,
}

impl SessionActor {
    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<Submit>, options: SessionOptions) {
        let mut poll = tokio::time::interval(options.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut keepalive = tokio::time::interval(options.keepalive_interval);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
        poll.tick().await;
        keepalive.tick().await;

        loop {
            tokio::select! {
                request = requests.recv() => match request {
                    Some(Submit { client_id, command, reply }) => {
                        self.submit(client_id, command, reply).await
                    }
                    None => break,
                },
                message = next_message(&mut self.upstream) => self.on_upstream(message).await,
                _ = poll.tick() => self.check_address().await,
                _ = keepalive.tick() => self.keepalive().await,
            }
        }

        self.disconnect("session closed", false).await;
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    async fn submit(&mut self, client_id: u64, command: InspectorCommand, reply: Reply) {
        if self.upstream.is_none() {
            let _ = reply.send(Err(CoreError::UpstreamReset(format!(
                "\"{}\" is not connected; waiting for it to restart",
                self.name
            ))));
            return;
        }

        if let Some(domain) = command.enabled_domain() {
            self.enabled.insert(domain.to_string());
        }
        if let Some(domain) = command.disabled_domain() {
            self.enabled.remove(domain);
        }

        let id = self.allocate_id();
        match self.send_upstream(command.with_id(id)).await {
            Ok(()) => {
                self.pending.insert(id, Pending::Client { client_id, reply });
            }
            Err(error) => {
                let _ = reply.send(Err(CoreError::UpstreamReset(error.to_string())));
                self.disconnect("upstream write failed", true).await;
            }
        }
    }

    async fn send_internal(&mut self, command: InspectorCommand) {
        let id = self.allocate_id();
        match self.send_upstream(command.with_id(id)).await {
            Ok(()) => {
                self.pending.insert(id, Pending::Internal);
            }
            Err(error) => {
                debug!(name = %self.name, error = %error, "Internal inspector command failed");
                self.disconnect("upstream write failed", true).await;
            }
        }
    }

    async fn send_upstream(&mut self, command: InspectorCommand) -> std::result::Result<(), tungstenite::Error> {
        let Some(upstream) = self.upstream.as_mut() else {
            return Err(tungstenite::Error::AlreadyClosed);
        };
        let text = serde_json::to_string(&command).unwrap_or_default();
        upstream.socket.send(Message::Text(text)).await
    }

    async fn on_upstream(&mut self, message: Option<std::result::Result<Message, tungstenite::Error>>) {
        let text = match message {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(_))) | None => {
                self.disconnect("upstream closed", true).await;
                return;
            }
            Some(Ok(_)) => return,
            Some(Err(error)) => {
                debug!(name = %self.name, error = %error, "Upstream inspector socket failed");
                self.disconnect("upstream failed", true).await;
                return;
            }
        };

        match UpstreamMessage::parse(&text) {
            Ok(UpstreamMessage::Response(response)) => match self.pending.remove(&response.id) {
                Some(Pending::Client { client_id, reply }) => {
                    let _ = reply.send(Ok(response.with_id(client_id)));
                }
                Some(Pending::Internal) => {}
                None => debug!(name = %self.name, id = response.id, "Response for unknown command"),
            },
            Ok(UpstreamMessage::Event(event)) => {
                // No subscribers is fine; events are not buffered for later.
                let _ = self.events.send(event);
            }
            Err(error) => debug!(name = %self.name, error = %error, "Ignoring unparsable upstream message"),
        }
    }

    async fn check_address(&mut self) {
        let current = self.repo.inspector_url(&self.name).await;
        let connected = self.upstream.as_ref().map(|upstream| upstream.url.clone());

        match (current, connected) {
            (Some(url), Some(connected)) if url == connected => {}
            (Some(url), connected) => {
                if connected.is_some() {
                    info!(name = %self.name, upstream = %url, "Instance restarted; reconnecting inspector");
                    self.disconnect("instance restarted", true).await;
                }
                self.reconnect(url).await;
            }
            (None, Some(_)) => {
                info!(name = %self.name, "Instance left the registry; inspector detached");
                self.disconnect("instance stopped", true).await;
            }
            (None, None) => {}
        }
    }

    async fn reconnect(&mut self, url: String) {
        match self.repo.connect(&url).await {
            Ok(socket) => {
                info!(name = %self.name, upstream = %url, "Inspector upstream reconnected");
                self.upstream = Some(Upstream { url, socket });
                for domain in self.enabled.clone() {
                    self.send_internal(InspectorCommand::new(format!("{domain}.enable")))
                        .await;
                }
            }
            Err(error) => {
                debug!(name = %self.name, error = %error, "Inspector upstream not reachable yet");
            }
        }
    }

    async fn keepalive(&mut self) {
        if self.upstream.is_some() {
            self.send_internal(InspectorCommand::new(KEEPALIVE_METHOD)).await;
        }
    }

    /// Drops the upstream, failing every pending command. When `notify` is
    /// set and a socket was open, the client is told its contexts are gone.
    async fn disconnect(&mut self, reason: &str, notify: bool) {
        let had_upstream = match self.upstream.take() {
            Some(mut upstream) => {
                let _ = tokio::time::timeout(CLOSE_GRACE, upstream.socket.close(None)).await;
                true
            }
            None => false,
        };

        for (_, pending) in self.pending.drain() {
            if let Pending::Client { reply, .. } = pending {
                let _ = reply.send(Err(CoreError::UpstreamReset(format!(
                    "\"{}\": {reason}",
                    self.name
                ))));
            }
        }

        if had_upstream && notify {
            let _ = self.events.send(InspectorEvent::execution_contexts_cleared());
        }
    }
}

async fn next_message(
    upstream: &mut Option<Upstream>,
) -> Option<std::result::Result<Message, tungstenite::Error>> {
    match upstream {
        Some(upstream) => upstream.socket.next().await,
        None => std::future::pending().await,
    }
}

/// Client-visible error for a command the session could not complete.
pub fn failed_response(client_id: u64, error: &CoreError) -> InspectorResponse {
    InspectorResponse::failed(client_id, UPSTREAM_RESET_CODE, error.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::features::inspector_tunnel::repo::RegistryInspectorTargets;
    use devlink_core::{InspectorAddress, InstanceAddress, InstanceRecord, RegistryStore};
    use devlink_proto::inspector::EXECUTION_CONTEXTS_CLEARED;
    use serde_json::{json, Value};
    use tokio::net::TcpListener;

    /// Debug endpoint stand-in: answers every command with its method and
    /// the id it arrived with, and emits one event per `*.enable`.
    pub(crate) struct FakeInspector {
        pub port: u16,
        pub received: mpsc::UnboundedReceiver<Value>,
    }

    pub(crate) async fn spawn_fake_inspector() -> FakeInspector {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (seen, received) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let seen = seen.clone();
                tokio::spawn(async move {
                    let Ok(mut socket) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(message)) = socket.next().await {
                        let Message::Text(text) = message else { continue };
                        let command: Value = serde_json::from_str(&text).unwrap();
                        let _ = seen.send(command.clone());
                        let method = command["method"].as_str().unwrap_or_default().to_string();
                        let reply = json!({ "id": command["id"], "result": { "method": method, "upstreamId": command["id"] } });
                        if socket.send(Message::Text(reply.to_string())).await.is_err() {
                            break;
                        }
                        if let Some(domain) = method.strip_suffix(".enable") {
                            let event = json!({ "method": format!("{domain}.enabledEvent"), "params": {} });
                            let _ = socket.send(Message::Text(event.to_string())).await;
                        }
                    }
                });
            }
        });
        FakeInspector { port, received }
    }

    pub(crate) fn record_with_inspector(name: &str, port: u16) -> InstanceRecord {
        InstanceRecord::local(name, InstanceAddress::http("127.0.0.1", 8787)).with_inspector(
            InspectorAddress {
                host: "127.0.0.1".to_string(),
                port,
                path: "/".to_string(),
            },
        )
    }

    pub(crate) fn fast_options() -> SessionOptions {
        SessionOptions {
            poll_interval: Duration::from_millis(50),
            keepalive_interval: Duration::from_secs(60),
        }
    }

    async fn open(store: &RegistryStore, name: &str) -> InspectorSession {
        InspectorSession::open(
            name,
            Arc::new(RegistryInspectorTargets::new(Arc::new(store.clone()))),
            fast_options(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_open_unregistered_instance_fails() {
        let result = InspectorSession::open(
            "ghost",
            Arc::new(RegistryInspectorTargets::new(Arc::new(RegistryStore::new()))),
            fast_options(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_command_without_id_is_rejected() {
        let fake = spawn_fake_inspector().await;
        let store = RegistryStore::new();
        store.upsert("billing", record_with_inspector("billing", fake.port));
        let session = open(&store, "billing").await;

        let error = session
            .send(InspectorCommand::new("Runtime.evaluate"))
            .await
            .unwrap_err();
        assert!(matches!(error, CoreError::InvalidRecord(_)));

        let response = session
            .send(InspectorCommand::new("Runtime.evaluate").with_id(3))
            .await
            .unwrap();
        assert_eq!(response.id, 3);

        session.close().await;
    }

    #[tokio::test]
    async fn test_sessions_keep_separate_id_spaces() {
        let billing = spawn_fake_inspector().await;
        let inventory = spawn_fake_inspector().await;
        let store = RegistryStore::new();
        store.upsert("billing", record_with_inspector("billing", billing.port));
        store.upsert("inventory", record_with_inspector("inventory", inventory.port));

        let a = open(&store, "billing").await;
        let b = open(&store, "inventory").await;

        let (ra, rb) = tokio::join!(
            a.send(InspectorCommand::new("Runtime.evaluate").with_id(1)),
            b.send(InspectorCommand::new("Debugger.getScriptSource").with_id(1)),
        );
        let (ra, rb) = (ra.unwrap(), rb.unwrap());

        assert_eq!(ra.id, 1);
        assert_eq!(rb.id, 1);
        assert_eq!(ra.result.unwrap()["method"], "Runtime.evaluate");
        assert_eq!(rb.result.unwrap()["method"], "Debugger.getScriptSource");

        a.close().await;
        b.close().await;
    }

    #[tokio::test]
    async fn test_client_ids_are_restored_on_responses() {
        let fake = spawn_fake_inspector().await;
        let store = RegistryStore::new();
        store.upsert("billing", record_with_inspector("billing", fake.port));
        let session = open(&store, "billing").await;

        let first = session
            .send(InspectorCommand::new("Runtime.enable").with_id(900))
            .await
            .unwrap();
        let second = session
            .send(InspectorCommand::new("Runtime.evaluate").with_id(17))
            .await
            .unwrap();

        assert_eq!(first.id, 900);
        assert_eq!(second.id, 17);
        let upstream_ids = (
            first.result.unwrap()["upstreamId"].as_u64().unwrap(),
            second.result.unwrap()["upstreamId"].as_u64().unwrap(),
        );
        assert_ne!(upstream_ids.0, upstream_ids.1);
        session.close().await;
    }

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let fake = spawn_fake_inspector().await;
        let store = RegistryStore::new();
        store.upsert("billing", record_with_inspector("billing", fake.port));
        let session = open(&store, "billing").await;
        let mut events = session.subscribe();

        session
            .send(InspectorCommand::new("Debugger.enable").with_id(1))
            .await
            .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.method, "Debugger.enabledEvent");
        session.close().await;
    }

    #[tokio::test]
    async fn test_restart_reconnects_and_replays_enabled_domains() {
        let before = spawn_fake_inspector().await;
        let mut after = spawn_fake_inspector().await;
        let store = RegistryStore::new();
        store.upsert("billing", record_with_inspector("billing", before.port));
        let session = open(&store, "billing").await;
        let mut events = session.subscribe();

        session
            .send(InspectorCommand::new("Debugger.enable").with_id(1))
            .await
            .unwrap();
        session
            .send(InspectorCommand::new("Profiler.enable").with_id(2))
            .await
            .unwrap();
        session
            .send(InspectorCommand::new("Profiler.disable").with_id(3))
            .await
            .unwrap();

        store.upsert("billing", record_with_inspector("billing", after.port));

        let cleared = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = events.recv().await.unwrap();
                if event.method == EXECUTION_CONTEXTS_CLEARED {
                    return event;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(cleared.method, EXECUTION_CONTEXTS_CLEARED);

        let replayed = tokio::time::timeout(Duration::from_secs(5), after.received.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replayed["method"], "Debugger.enable");

        let response = tokio::time::timeout(
            Duration::from_secs(5),
            session.send(InspectorCommand::new("Runtime.evaluate").with_id(4)),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(response.id, 4);

        let next = after.received.recv().await.unwrap();
        assert_eq!(next["method"], "Runtime.evaluate");
        session.close().await;
    }

    #[tokio::test]
    async fn test_deregistration_detaches_and_fails_new_commands() {
        let fake = spawn_fake_inspector().await;
        let store = RegistryStore::new();
        store.upsert("billing", record_with_inspector("billing", fake.port));
        let session = open(&store, "billing").await;
        let mut events = session.subscribe();

        store.remove("billing");
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.method, EXECUTION_CONTEXTS_CLEARED);

        let error = session
            .send(InspectorCommand::new("Runtime.evaluate").with_id(9))
            .await
            .unwrap_err();
        assert!(matches!(error, CoreError::UpstreamReset(_)));
        let response = failed_response(9, &error);
        assert_eq!(response.id, 9);
        assert_eq!(response.error.unwrap()["code"], UPSTREAM_RESET_CODE);
        session.close().await;
    }
}

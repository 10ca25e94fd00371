//! Relay server.
//!
//! A small authoritative-store server speaking the client's protocol, used by
//! the integration tests and the `relay` binary:
//! - `POST /register` hands out a socket URL per registration
//! - `GET /game` returns the unit store
//! - `/ws/:token` accepts the socket; commands update the store and the
//!   resulting state is broadcast to every connected client, sender included
//!
//! Tests can also inject frames with [`Relay::push`], fail registrations, and
//! drop every socket to exercise reconnects.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{bail, Context};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use tokio::{net::TcpListener, sync::mpsc, task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};
use world_shared::net::{
    ClientCommand, CreateUnit, GameStateSnapshot, RegisterRequest, RegisterResponse,
    ServerMessage, SetUnitDestination, SetUnitPosition, UnitState,
};

/// A registered client. `sender` is set while its socket is open.
#[derive(Debug)]
struct Registration {
    user_id: u64,
    sender: Option<mpsc::UnboundedSender<String>>,
}

#[derive(Debug, Default)]
struct RelayState {
    units: GameStateSnapshot,
    clients: HashMap<String, Registration>,
    next_token: u64,
    next_unit: u64,
    failing_registrations: u32,
    registrations: u32,
}

impl RelayState {
    /// Applies one client command. Returns what to broadcast.
    fn apply(&mut self, cmd: ClientCommand) -> Option<ServerMessage> {
        match cmd {
            ClientCommand::CreateUnit { position } => {
                self.next_unit += 1;
                let id = format!("unit-{}", self.next_unit);
                self.units.insert(
                    id.clone(),
                    UnitState {
                        id: id.clone(),
                        position,
                        destination: position,
                    },
                );
                info!(id = %id, x = position.0, z = position.1, "Unit created");
                Some(ServerMessage::CreateUnit(CreateUnit {
                    id,
                    position,
                    destination: Some(position),
                }))
            }
            ClientCommand::SetUnitPosition { id, position } => {
                let Some(unit) = self.units.get_mut(&id) else {
                    warn!(id = %id, "Position for unknown unit");
                    return None;
                };
                unit.position = position;
                Some(ServerMessage::SetUnitPosition(SetUnitPosition { id, position }))
            }
            ClientCommand::SetUnitDestination { id, destination } => {
                let Some(unit) = self.units.get_mut(&id) else {
                    warn!(id = %id, "Destination for unknown unit");
                    return None;
                };
                unit.destination = destination;
                Some(ServerMessage::SetUnitDestination(SetUnitDestination {
                    id,
                    destination,
                }))
            }
        }
    }

    /// Sends `text` to every open socket. Returns how many received it.
    fn broadcast(&self, text: &str) -> usize {
        self.clients
            .values()
            .filter_map(|c| c.sender.as_ref())
            .filter(|tx| tx.send(text.to_string()).is_ok())
            .count()
    }

    fn connected(&self) -> usize {
        self.clients.values().filter(|c| c.sender.is_some()).count()
    }
}

#[derive(Clone)]
struct RelayCtx {
    state: Arc<Mutex<RelayState>>,
    addr: SocketAddr,
}

impl RelayCtx {
    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A running relay. Stops when dropped.
pub struct Relay {
    ctx: RelayCtx,
    task: Option<JoinHandle<()>>,
}

impl Relay {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("bind {addr}"))?;
        let addr = listener.local_addr().context("relay local_addr")?;
        let ctx = RelayCtx {
            state: Arc::new(Mutex::new(RelayState::default())),
            addr,
        };

        let app = Router::new()
            .route("/health", get(health))
            .route("/register", post(register))
            .route("/register/:token", delete(unregister))
            .route("/game", get(game_state))
            .route("/ws/:token", get(ws_upgrade))
            .with_state(ctx.clone());

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                warn!(error = %e, "Relay stopped");
            }
        });
        info!(addr = %addr, "Relay listening");

        Ok(Self {
            ctx,
            task: Some(task),
        })
    }

    /// Binds to an ephemeral localhost port.
    pub async fn bind_ephemeral() -> anyhow::Result<Self> {
        Self::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)).await
    }

    pub fn addr(&self) -> SocketAddr {
        self.ctx.addr
    }

    /// Base URL for the client's `api_base`.
    pub fn api_base(&self) -> String {
        format!("http://{}", self.ctx.addr)
    }

    /// Rejects the next `n` registrations with 503.
    pub fn fail_registrations(&self, n: u32) {
        self.ctx.lock().failing_registrations = n;
    }

    /// Registration requests seen, rejected ones included.
    pub fn registrations(&self) -> u32 {
        self.ctx.lock().registrations
    }

    pub fn connected_clients(&self) -> usize {
        self.ctx.lock().connected()
    }

    pub fn units(&self) -> GameStateSnapshot {
        self.ctx.lock().units.clone()
    }

    /// Seeds the store without telling anyone.
    pub fn insert_unit(&self, unit: UnitState) {
        self.ctx.lock().units.insert(unit.id.clone(), unit);
    }

    /// Sends `msg` to every connected client. Returns how many received it.
    pub fn push(&self, msg: &ServerMessage) -> anyhow::Result<usize> {
        let text = msg.to_json()?;
        Ok(self.ctx.lock().broadcast(&text))
    }

    /// Sends a raw frame to every connected client.
    pub fn push_raw(&self, text: &str) -> usize {
        self.ctx.lock().broadcast(text)
    }

    /// Closes every open socket. Registrations are kept.
    pub fn disconnect_all(&self) {
        let mut state = self.ctx.lock();
        for client in state.clients.values_mut() {
            client.sender = None;
        }
    }

    /// Waits until `n` sockets are open.
    pub async fn wait_for_clients(&self, n: usize, timeout: Duration) -> anyhow::Result<()> {
        let deadline = Instant::now() + timeout;
        while self.connected_clients() < n {
            if Instant::now() >= deadline {
                bail!("timed out waiting for {n} clients");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(())
    }

    /// Serves until the listener fails.
    pub async fn join(mut self) -> anyhow::Result<()> {
        if let Some(task) = self.task.take() {
            task.await.context("relay task")?;
        }
        Ok(())
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn register(
    State(ctx): State<RelayCtx>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, StatusCode> {
    let mut state = ctx.lock();
    state.registrations += 1;
    if state.failing_registrations > 0 {
        state.failing_registrations -= 1;
        warn!(user_id = req.user_id, "Rejecting registration");
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    state.next_token += 1;
    let token = format!("{}-{}", req.user_id, state.next_token);
    state.clients.insert(
        token.clone(),
        Registration {
            user_id: req.user_id,
            sender: None,
        },
    );
    info!(user_id = req.user_id, token = %token, "Registered");
    Ok(Json(RegisterResponse {
        url: format!("ws://{}/ws/{}", ctx.addr, token),
    }))
}

async fn unregister(State(ctx): State<RelayCtx>, Path(token): Path<String>) -> StatusCode {
    match ctx.lock().clients.remove(&token) {
        Some(_) => StatusCode::OK,
        None => StatusCode::NOT_FOUND,
    }
}

async fn game_state(State(ctx): State<RelayCtx>) -> Json<GameStateSnapshot> {
    Json(ctx.lock().units.clone())
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(ctx): State<RelayCtx>,
    Path(token): Path<String>,
) -> Response {
    if !ctx.lock().clients.contains_key(&token) {
        return StatusCode::NOT_FOUND.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, token, ctx))
}

async fn handle_socket(socket: WebSocket, token: String, ctx: RelayCtx) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let user_id = {
        let mut state = ctx.lock();
        let Some(client) = state.clients.get_mut(&token) else {
            return;
        };
        client.sender = Some(tx);
        client.user_id
    };
    info!(user_id, token = %token, "Socket connected");

    tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(token = %token, error = %e, "Socket read failed");
                break;
            }
        };
        handle_text(&ctx, &token, &text);
    }

    if let Some(client) = ctx.lock().clients.get_mut(&token) {
        client.sender = None;
    }
    info!(user_id, token = %token, "Socket disconnected");
}

fn handle_text(ctx: &RelayCtx, token: &str, text: &str) {
    if text.trim() == "ping" {
        return;
    }
    let cmd: ClientCommand = match serde_json::from_str(text) {
        Ok(cmd) => cmd,
        Err(e) => {
            warn!(
                token = %token,
                error = %e,
                r#"Bad command, expected e.g. {{"CreateUnit":{{"position":[10.0,15.0]}}}}"#
            );
            return;
        }
    };
    debug!(token = %token, ?cmd, "Command");

    let mut state = ctx.lock();
    let Some(reply) = state.apply(cmd) else {
        return;
    };
    match reply.to_json() {
        Ok(text) => {
            state.broadcast(&text);
        }
        Err(e) => warn!(error = %e, "Failed to encode broadcast"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_assigns_ids_and_stores_units() {
        let mut state = RelayState::default();
        let reply = state.apply(ClientCommand::CreateUnit {
            position: (10.0, 15.0),
        });
        assert_eq!(
            reply,
            Some(ServerMessage::CreateUnit(CreateUnit {
                id: "unit-1".to_string(),
                position: (10.0, 15.0),
                destination: Some((10.0, 15.0)),
            }))
        );
        assert_eq!(state.units["unit-1"].destination, (10.0, 15.0));
    }

    #[test]
    fn updates_for_unknown_units_are_not_broadcast() {
        let mut state = RelayState::default();
        let reply = state.apply(ClientCommand::SetUnitDestination {
            id: "nope".to_string(),
            destination: (1.0, 1.0),
        });
        assert!(reply.is_none());
        assert!(state.units.is_empty());
    }

    #[test]
    fn updates_modify_store() {
        let mut state = RelayState::default();
        state.apply(ClientCommand::CreateUnit {
            position: (0.0, 0.0),
        });
        state.apply(ClientCommand::SetUnitDestination {
            id: "unit-1".to_string(),
            destination: (4.0, 2.0),
        });
        state.apply(ClientCommand::SetUnitPosition {
            id: "unit-1".to_string(),
            position: (4.0, 2.0),
        });
        let unit = &state.units["unit-1"];
        assert_eq!(unit.position, (4.0, 2.0));
        assert_eq!(unit.destination, (4.0, 2.0));
    }
}

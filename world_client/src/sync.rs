//! Server synchronization client.
//!
//! The client maintains:
//! - The connection state machine (register, open socket, retry with linear
//!   backoff)
//! - Typed inbound handlers keyed by message kind
//! - A shared outbound slot so commands can be sent from anywhere on the
//!   loop without holding the client
//!
//! Network calls never run inline. [`SyncClient::connect`] and
//! [`SyncClient::request_game_state`] only start work; the in-flight futures
//! are owned by the client and driven by [`SyncClient::next_event`], which
//! the caller polls next to its frame timer.
//!
//! Handlers receive a caller-owned context `C` at dispatch time, which keeps
//! the client free of references into the world it feeds.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::pending;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use futures::future::{FutureExt, LocalBoxFuture};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tracing::{debug, info, warn, Span};
use world_shared::{
    config::ClientConfig,
    net::{ClientCommand, GameStateSnapshot, Inbound, MessageKind, ServerMessage},
};

use crate::transport::{SocketChannel, SocketEvent, Transport};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No socket. A retry may be pending.
    Disconnected,
    /// Registration or socket open in progress.
    Registering,
    /// Socket open.
    Connected,
}

/// What woke the client up.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// One inbound text frame, not yet parsed.
    Message(String),
    /// The pending retry deadline passed.
    RetryDue,
    /// A connection attempt finished and the socket is open.
    Connected,
    /// A connection attempt failed. The next retry is already scheduled.
    ConnectFailed,
    /// A requested game state arrived.
    GameState(GameStateSnapshot),
    /// The socket closed or failed.
    ConnectionLost,
}

pub type MessageHandler<C> = Box<dyn FnMut(&mut C, &ServerMessage)>;

type OutboundSlot = Rc<RefCell<Option<UnboundedSender<String>>>>;

type InFlight<T> = LocalBoxFuture<'static, anyhow::Result<T>>;

/// Fire-and-forget command handle. Cheap to clone.
#[derive(Clone)]
pub struct CommandSender {
    slot: OutboundSlot,
    log: Span,
}

impl CommandSender {
    /// Queues `cmd` on the socket. Dropped with a debug log while
    /// disconnected. Returns whether it was queued.
    pub fn send(&self, cmd: &ClientCommand) -> bool {
        let slot = self.slot.borrow();
        let Some(tx) = slot.as_ref() else {
            debug!(parent: &self.log, ?cmd, "Not connected, dropping command");
            return false;
        };
        match cmd.to_json() {
            Ok(text) => tx.send(text).is_ok(),
            Err(e) => {
                warn!(parent: &self.log, error = %e, "Failed to encode command");
                false
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.slot.borrow().is_some()
    }
}

/// Raw outcome of one wait in [`SyncClient::next_event`].
enum Woke {
    Socket(Option<SocketEvent>),
    RetryDue,
    Opened(anyhow::Result<SocketChannel>),
    Fetched(anyhow::Result<GameStateSnapshot>),
}

pub struct SyncClient<C> {
    transport: Arc<dyn Transport>,
    user_id: u64,
    state: ConnectionState,
    attempt: u32,
    retry_at: Option<Instant>,
    backoff_base: Duration,
    backoff_max: Duration,
    connect_timeout: Duration,
    opening: Option<InFlight<SocketChannel>>,
    fetching: Option<InFlight<GameStateSnapshot>>,
    handlers: HashMap<MessageKind, Vec<MessageHandler<C>>>,
    outbound: OutboundSlot,
    inbound: Option<UnboundedReceiver<SocketEvent>>,
    log: Span,
}

impl<C: 'static> SyncClient<C> {
    pub fn new(transport: Box<dyn Transport>, cfg: &ClientConfig, log: Span) -> Self {
        Self {
            transport: Arc::from(transport),
            user_id: cfg.user_id,
            state: ConnectionState::Disconnected,
            attempt: 0,
            retry_at: None,
            backoff_base: cfg.backoff_base(),
            backoff_max: cfg.backoff_max(),
            connect_timeout: cfg.connect_timeout(),
            opening: None,
            fetching: None,
            handlers: HashMap::new(),
            outbound: Rc::new(RefCell::new(None)),
            inbound: None,
            log,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Consecutive failures since the last successful connection.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Delay before the retry that follows failure number `attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(attempt)
            .min(self.backoff_max)
    }

    pub fn command_sender(&self) -> CommandSender {
        CommandSender {
            slot: Rc::clone(&self.outbound),
            log: self.log.clone(),
        }
    }

    /// Registers a handler for inbound messages carrying `M`.
    ///
    /// Handlers accumulate: registering twice means being called twice.
    pub fn add_message_handler<M, F>(&mut self, mut handler: F)
    where
        M: Inbound,
        F: FnMut(&mut C, &M) + 'static,
    {
        self.handlers
            .entry(M::KIND)
            .or_default()
            .push(Box::new(move |ctx: &mut C, msg: &ServerMessage| {
                if let Some(payload) = M::from_message(msg) {
                    handler(ctx, payload);
                }
            }));
    }

    /// Starts registering and opening the socket. Returns whether a new
    /// attempt started.
    ///
    /// A no-op while registering or connected. Otherwise any pending retry
    /// deadline is consumed by this attempt. The outcome is reported by
    /// [`next_event`](Self::next_event).
    pub fn connect(&mut self) -> bool {
        if self.state != ConnectionState::Disconnected {
            debug!(parent: &self.log, state = ?self.state, "Connect ignored");
            return false;
        }
        self.retry_at = None;
        self.state = ConnectionState::Registering;
        info!(parent: &self.log, user_id = self.user_id, attempt = self.attempt, "Registering");

        let transport = Arc::clone(&self.transport);
        let user_id = self.user_id;
        let limit = self.connect_timeout;
        self.opening = Some(
            async move {
                let open = async {
                    let url = transport.register(user_id).await.context("register")?;
                    transport.open_socket(&url).await.context("open socket")
                };
                tokio::time::timeout(limit, open)
                    .await
                    .with_context(|| format!("no answer within {limit:?}"))?
            }
            .boxed_local(),
        );
        true
    }

    /// Starts a connection attempt if needed and waits for its outcome.
    pub async fn connect_and_wait(&mut self) -> anyhow::Result<()> {
        self.connect();
        let Some(attempt) = self.opening.as_mut() else {
            return Ok(());
        };
        let result = attempt.await;
        self.opening = None;
        self.finish_connect(result)
    }

    fn finish_connect(&mut self, result: anyhow::Result<SocketChannel>) -> anyhow::Result<()> {
        match result {
            Ok(channel) => {
                *self.outbound.borrow_mut() = Some(channel.outbound);
                self.inbound = Some(channel.inbound);
                self.state = ConnectionState::Connected;
                self.attempt = 0;
                info!(parent: &self.log, "Connected");
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                self.schedule_retry();
                warn!(
                    parent: &self.log,
                    error = %format!("{e:#}"),
                    attempt = self.attempt,
                    "Connection attempt failed"
                );
                Err(e)
            }
        }
    }

    fn schedule_retry(&mut self) {
        self.attempt += 1;
        let delay = self.backoff_delay(self.attempt);
        self.retry_at = Some(Instant::now() + delay);
        debug!(parent: &self.log, attempt = self.attempt, ?delay, "Retry scheduled");
    }

    /// Drops the socket and schedules a reconnect after one backoff step.
    pub fn connection_lost(&mut self) {
        if self.state != ConnectionState::Connected {
            return;
        }
        warn!(parent: &self.log, "Connection lost");
        *self.outbound.borrow_mut() = None;
        self.inbound = None;
        self.state = ConnectionState::Disconnected;
        self.attempt = 0;
        self.schedule_retry();
    }

    /// Waits for the next inbound frame, socket loss, retry deadline, or
    /// in-flight network result.
    ///
    /// Cancel safe: in-flight work lives in the client and resumes on the
    /// next call. Pends forever when there is nothing to wait for. A failed
    /// state fetch is logged and not reported.
    pub async fn next_event(&mut self) -> SyncEvent {
        loop {
            let woke = {
                let retry_at = self.retry_at;
                let inbound = self.inbound.as_mut();
                let opening = self.opening.as_mut();
                let fetching = self.fetching.as_mut();

                tokio::select! {
                    event = async move {
                        match inbound {
                            Some(rx) => rx.recv().await,
                            None => pending().await,
                        }
                    } => Woke::Socket(event),
                    () = async move {
                        match retry_at {
                            Some(at) => tokio::time::sleep_until(at).await,
                            None => pending().await,
                        }
                    } => Woke::RetryDue,
                    result = async move {
                        match opening {
                            Some(attempt) => attempt.await,
                            None => pending().await,
                        }
                    } => Woke::Opened(result),
                    result = async move {
                        match fetching {
                            Some(fetch) => fetch.await,
                            None => pending().await,
                        }
                    } => Woke::Fetched(result),
                }
            };

            match woke {
                Woke::Socket(Some(SocketEvent::Text(text))) => return SyncEvent::Message(text),
                Woke::Socket(Some(SocketEvent::Closed) | None) => return SyncEvent::ConnectionLost,
                Woke::RetryDue => return SyncEvent::RetryDue,
                Woke::Opened(result) => {
                    self.opening = None;
                    return match self.finish_connect(result) {
                        Ok(()) => SyncEvent::Connected,
                        Err(_) => SyncEvent::ConnectFailed,
                    };
                }
                Woke::Fetched(result) => {
                    self.fetching = None;
                    match result {
                        Ok(state) => return SyncEvent::GameState(state),
                        Err(e) => {
                            warn!(parent: &self.log, error = %format!("{e:#}"), "Could not fetch game state")
                        }
                    }
                }
            }
        }
    }

    /// Parses one frame and runs every handler registered for its kind.
    /// Unknown or malformed frames are ignored.
    pub fn dispatch(&mut self, ctx: &mut C, text: &str) {
        let msg = match ServerMessage::from_json(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(parent: &self.log, error = %format!("{e:#}"), frame = %text, "Ignoring inbound frame");
                return;
            }
        };
        let Some(handlers) = self.handlers.get_mut(&msg.kind()) else {
            debug!(parent: &self.log, kind = ?msg.kind(), "No handler registered");
            return;
        };
        for handler in handlers.iter_mut() {
            handler(ctx, &msg);
        }
    }

    /// Starts fetching the server's game state. The snapshot arrives as
    /// [`SyncEvent::GameState`]. A fetch already in flight is replaced.
    pub fn request_game_state(&mut self) {
        let transport = Arc::clone(&self.transport);
        let limit = self.connect_timeout;
        self.fetching = Some(
            async move {
                tokio::time::timeout(limit, transport.fetch_game_state())
                    .await
                    .with_context(|| format!("no answer within {limit:?}"))?
                    .context("fetch game state")
            }
            .boxed_local(),
        );
    }

    /// Fetches the server's game state and waits for it.
    pub async fn fetch_game_state(&self) -> anyhow::Result<GameStateSnapshot> {
        tokio::time::timeout(self.connect_timeout, self.transport.fetch_game_state())
            .await
            .with_context(|| format!("no answer within {:?}", self.connect_timeout))?
            .context("fetch game state")
    }
}

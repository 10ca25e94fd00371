//! Network transport.
//!
//! The sync client talks to the server through [`Transport`]: two HTTP calls
//! and one persistent text socket. The socket is exposed as a pair of
//! channels pumped by background tasks, so the client loop only ever moves
//! strings.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info};
use world_shared::net::{GameStateSnapshot, RegisterRequest, RegisterResponse};

/// Something observed on the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Text(String),
    /// Peer closed or the connection failed. Nothing follows.
    Closed,
}

/// An open socket as a pair of channels.
#[derive(Debug)]
pub struct SocketChannel {
    pub outbound: UnboundedSender<String>,
    pub inbound: UnboundedReceiver<SocketEvent>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Registers `user_id` and returns the socket URL to open.
    async fn register(&self, user_id: u64) -> anyhow::Result<String>;

    /// Fetches every unit currently known to the server.
    async fn fetch_game_state(&self) -> anyhow::Result<GameStateSnapshot>;

    async fn open_socket(&self, url: &str) -> anyhow::Result<SocketChannel>;
}

/// HTTP + websocket transport.
///
/// Every request and the socket handshake fail after `timeout`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    api_base: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(api_base: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn register(&self, user_id: u64) -> anyhow::Result<String> {
        let url = format!("{}/register", self.api_base);
        let resp: RegisterResponse = self
            .http
            .post(&url)
            .json(&RegisterRequest { user_id })
            .send()
            .await
            .with_context(|| format!("POST {url}"))?
            .error_for_status()
            .context("register rejected")?
            .json()
            .await
            .context("decode register response")?;
        debug!(user_id, socket = %resp.url, "Registered");
        Ok(resp.url)
    }

    async fn fetch_game_state(&self) -> anyhow::Result<GameStateSnapshot> {
        let url = format!("{}/game", self.api_base);
        let state = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?
            .error_for_status()
            .context("game state rejected")?
            .json()
            .await
            .context("decode game state")?;
        Ok(state)
    }

    async fn open_socket(&self, url: &str) -> anyhow::Result<SocketChannel> {
        let (ws, _) = tokio::time::timeout(self.timeout, tokio_tungstenite::connect_async(url))
            .await
            .with_context(|| format!("open socket {url}: no answer within {:?}", self.timeout))?
            .with_context(|| format!("open socket {url}"))?;
        info!(socket = %url, "Socket open");

        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!(error = %e, "Socket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(SocketEvent::Text(text)).is_err() {
                            return;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "Socket read failed");
                        break;
                    }
                }
            }
            let _ = in_tx.send(SocketEvent::Closed);
        });

        Ok(SocketChannel {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transport for unit tests.

    use std::sync::{Arc, Mutex};

    use anyhow::bail;

    use super::*;

    /// Far ends of the sockets handed out: what the client wrote, and a
    /// sender to push frames at it.
    pub(crate) type Peers = Arc<Mutex<Vec<(UnboundedReceiver<String>, UnboundedSender<SocketEvent>)>>>;

    #[derive(Default)]
    pub(crate) struct FakeTransport {
        /// Registration never answers.
        pub hang: bool,
        pub failures_left: Mutex<u32>,
        pub registrations: Arc<Mutex<u32>>,
        pub state: Mutex<GameStateSnapshot>,
        pub peers: Peers,
    }

    impl FakeTransport {
        pub(crate) fn failing(times: u32) -> Self {
            Self {
                failures_left: Mutex::new(times),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn register(&self, _user_id: u64) -> anyhow::Result<String> {
            *self.registrations.lock().unwrap() += 1;
            if self.hang {
                return std::future::pending().await;
            }
            let mut left = self.failures_left.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                bail!("503 Service Unavailable");
            }
            Ok("ws://fake/abc".to_string())
        }

        async fn fetch_game_state(&self) -> anyhow::Result<GameStateSnapshot> {
            Ok(self.state.lock().unwrap().clone())
        }

        async fn open_socket(&self, url: &str) -> anyhow::Result<SocketChannel> {
            assert_eq!(url, "ws://fake/abc");
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            self.peers.lock().unwrap().push((out_rx, in_tx));
            Ok(SocketChannel {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    /// Accepts connections and never answers.
    async fn silent_peer() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        addr
    }

    #[tokio::test]
    async fn silent_server_fails_within_timeout() {
        let addr = silent_peer().await;
        let transport =
            HttpTransport::new(format!("http://{addr}/"), Duration::from_millis(200)).unwrap();
        assert_eq!(transport.api_base(), format!("http://{addr}"));

        let started = std::time::Instant::now();
        assert!(transport.register(1).await.is_err());
        assert!(transport.fetch_game_state().await.is_err());
        assert!(transport
            .open_socket(&format!("ws://{addr}/ws/token"))
            .await
            .is_err());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

//! Standalone relay server.
//!
//! Usage:
//!   cargo run -p world_tests --bin relay -- [--addr 127.0.0.1:8000]

use std::env;
use std::net::SocketAddr;

use anyhow::Context;
use tracing::info;
use world_tests::Relay;

fn parse_args() -> anyhow::Result<SocketAddr> {
    let args: Vec<String> = env::args().collect();
    let mut addr = "127.0.0.1:8000".to_string();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                addr = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    addr.parse().with_context(|| format!("parse --addr {addr}"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let addr = parse_args()?;
    let relay = Relay::bind(addr).await?;
    info!(api = %relay.api_base(), "Relay ready");
    relay.join().await
}

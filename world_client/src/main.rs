//! Headless console client.
//!
//! Usage:
//!   cargo run -p world_client --bin client -- [--api http://127.0.0.1:8000] [--user-id 1] [--config client.json]
//!
//! The client registers with the server, mirrors the shared world into an
//! in-memory scene, and simulates movement locally.
//!
//! Console commands (coordinates are on the ground plane):
//!   create <x> <z> - Ask the server for a new unit
//!   click <x> <z>  - Select the unit under the point
//!   rclick <x> <z> - Send selected units to the point
//!   hover <x> <z>  - Highlight the unit under the point
//!   status         - Show connection and units
//!   quit           - Exit client

use std::env;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, info_span};
use world_client::game::UserCommand;
use world_client::transport::HttpTransport;
use world_client::Game;
use world_shared::config::ClientConfig;
use world_shared::headless::HeadlessScene;

fn parse_args() -> anyhow::Result<ClientConfig> {
    let args: Vec<String> = env::args().collect();

    let mut cfg = match args.iter().position(|a| a == "--config") {
        Some(i) if i + 1 < args.len() => ClientConfig::from_file(&PathBuf::from(&args[i + 1]))?,
        _ => ClientConfig::default(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--api" if i + 1 < args.len() => {
                cfg.api_base = args[i + 1].clone();
                i += 2;
            }
            "--user-id" if i + 1 < args.len() => {
                cfg.user_id = args[i + 1].parse().context("parse --user-id")?;
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(api = %cfg.api_base, user_id = cfg.user_id, "Starting client");

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build runtime")?;

    // Set up console input channel.
    let (console_tx, console_rx) = mpsc::channel::<UserCommand>(32);

    // Spawn stdin reader thread. Dropping the sender stops the game.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        loop {
            print!("] ");
            let _ = stdout.flush();
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "quit" {
                break;
            }
            match UserCommand::parse(line) {
                Ok(cmd) => {
                    if console_tx.blocking_send(cmd).is_err() {
                        break;
                    }
                }
                Err(e) => println!("Error: {e}"),
            }
        }
    });

    println!("Type 'status' for info, 'quit' to exit.");
    println!();

    let transport = HttpTransport::new(cfg.api_base.clone(), cfg.connect_timeout())?;
    let scene = HeadlessScene::new();
    let mut game = Game::new(
        &cfg,
        Box::new(scene.clone()),
        Box::new(scene.factory(0.5)),
        Box::new(transport),
        info_span!("client", user_id = cfg.user_id),
    );

    runtime.block_on(game.run(console_rx, |line| println!("{line}")));
    Ok(())
}

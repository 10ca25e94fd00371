//! `world_client`
//!
//! Client-side world mirror:
//! - Per-object world data with dirty tracking
//! - Game objects with optional destination seeking
//! - The game world: ownership, picking, selection and change listeners
//! - Server sync with registration, reconnect backoff and typed handlers
//! - The orchestrator wiring both directions and scheduling frames

pub mod frame;
pub mod game;
pub mod game_object;
pub mod game_world;
pub mod input;
pub mod sync;
pub mod transport;
pub mod world_data;

pub use game::Game;

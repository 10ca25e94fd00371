//! `world_shared`
//!
//! Libraries shared by the sync client, its relay server and tests.
//!
//! Design goals:
//! - Plain values and explicit setters; no interception tricks.
//! - Traits at the seams to out-of-scope collaborators (scene, visuals, assets).
//! - No `unsafe`.

pub mod config;
pub mod dirty;
pub mod headless;
pub mod math;
pub mod net;
pub mod scene;

//! # billsync API
//!
//! Command-line and HTTP surface of billsync.
//!
//! This crate contains:
//! - The `billsync` CLI (clap) and its command handlers
//! - The HTTP trigger API (axum)
//! - Application context (dependency injection)
//! - Logging setup and health reporting
//!
//! ## Architecture
//! - Depends on `domain`, `core`, and `infra`
//! - Wires the SQLite adapters and the remote client into the engine

pub mod cli;
pub mod commands;
pub mod context;
pub mod server;
pub mod utils;

pub use context::AppContext;

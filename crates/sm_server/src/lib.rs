//! sm_server — SecuMSG envelope delivery server
//!
//! Thin boundary over `sm_store`: accepts envelopes, answers history and
//! conversation queries, and pushes pending envelopes to each connected
//! device over a long-lived WebSocket. The server never sees plaintext;
//! ciphertext and header blobs pass through opaque.
//!
//! # Modules
//! - `config`    — clap-derived server configuration
//! - `routes`    — axum router and HTTP handlers
//! - `delivery`  — per-device stream coordinator (poll → push → mark)
//! - `directory` — in-memory key directory (publish/fetch contract)
//! - `state`     — shared application state

pub mod config;
pub mod delivery;
pub mod directory;
pub mod routes;
pub mod state;

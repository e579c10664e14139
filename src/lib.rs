/// Heartline - matching and real-time engine for a dating backend
///
/// Swipes and match formation, ranked discovery, 1:1 chat with presence,
/// per-user realtime fan-out and WebRTC call signaling over SQLite.

pub mod account;
pub mod api;
pub mod auth;
pub mod calls;
pub mod chat;
pub mod config;
pub mod context;
pub mod db;
pub mod discovery;
pub mod error;
pub mod jobs;
pub mod matching;
pub mod metrics;
pub mod presence;
pub mod profile;
pub mod rate_limit;
pub mod realtime;
pub mod server;

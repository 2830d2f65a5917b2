//! Mixer GW - browser gateway for a networked mixing engine
//!
//! Mirrors the engine's device tree over its NUL-framed TCP protocol and
//! relays it to browser sessions over WebSocket.

pub mod api;
pub mod config;
pub mod engine;
pub mod mirror;
pub mod paths;
pub mod protocol;
pub mod upstream;

//! HTTP surface: health, notification reads, real-time subscriptions.
//!
//! Contact-point and policy CRUD lives in a separate service; this daemon
//! only exposes the read side of its own records plus the WebSocket
//! endpoint that feeds the push bus.

mod handlers;
mod server;

pub use server::{serve, ApiState};

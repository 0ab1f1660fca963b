//! # arrows-server
//!
//! Axum `WebSocket` gateway for live two-subject arrows sessions.
//!
//! - `WebSocket` route `/socket/{sessionId}/{role}` with JWT authentication
//! - One coordinator task per session, fed through a bounded mailbox
//! - JSON envelope codec for `trial.*` and `session.*` messages
//! - Health and Prometheus endpoints
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]
pub mod auth;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod server;
pub mod transport;
pub mod websocket;

pub use config::{Settings, SettingsError};
pub use coordinator::{SessionHandle, SessionSnapshot};
pub use registry::SessionRegistry;
pub use server::{ArrowsServer, ServerHandle};

//! # appcast-core
//!
//! Foundation types for the appcast engine.
//!
//! This crate provides the shared vocabulary the engine and transports
//! depend on:
//!
//! - **Messages**: [`messages::Message`], [`messages::AppConfig`],
//!   [`messages::ServerConfig`], [`messages::SessionStartArgs`]
//! - **Update operations**: [`updates::UpdateOp`] — the closed tagged family
//!   of incremental operations mirrored to remote viewers
//! - **Errors**: [`errors::TransportError`] and friends via `thiserror`
//! - **Connection abstraction**: [`connection::Connection`] and
//!   [`connection::Connector`] capability traits, one implementation per
//!   transport
//! - **Retry**: [`retry::reconnect_delay`] backoff schedule for the
//!   app-level reconnection protocol
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by `appcast-engine` and `appcast-client`.

#![deny(unsafe_code)]

pub mod connection;
pub mod errors;
pub mod messages;
pub mod retry;
pub mod updates;

pub use connection::{Connection, Connector};
pub use errors::{ContextError, EngineError, TransportError, UpdateError};
pub use messages::{AppConfig, Message, RecoveryConfig, ServerConfig, SessionStartArgs};
pub use updates::{Eviction, UpdateOp};

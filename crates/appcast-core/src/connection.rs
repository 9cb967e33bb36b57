//! Transport-agnostic connection abstraction.
//!
//! One [`Connection`] per open link (app-level or user-level), produced by
//! a [`Connector`]. The engine and sessions depend only on these traits;
//! each transport implements them once.

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::TransportError;
use crate::messages::{AppConfig, Message, RecoveryConfig, ServerConfig, SessionStartArgs};

/// A bidirectional message channel over some transport.
///
/// Inbound control tokens (`"off"`, `"ping"`) are interpreted by the
/// implementation: a keepalive is silently discarded and a graceful close
/// ends the sequence with `Ok(None)` — it is never an error.
#[async_trait]
pub trait Connection: Send {
    /// Send one payload. Fails with [`TransportError`] on a broken link.
    async fn publish(&mut self, payload: &Value) -> Result<(), TransportError>;

    /// Receive the next inbound message.
    ///
    /// Returns `Ok(None)` when the remote closed cleanly (the `"off"`
    /// control token or a normal closure code). Any other closure or
    /// network fault is a [`TransportError`].
    async fn next(&mut self) -> Result<Option<Message>, TransportError>;

    /// Perform the app init handshake: send `config`, await exactly one
    /// reply, parse it into a [`ServerConfig`].
    ///
    /// Used only on the app-level connection's first connect.
    async fn init_app(&mut self, config: &AppConfig) -> Result<ServerConfig, TransportError>;

    /// Receive the re-issued recovery key, the first message on a resumed
    /// app connection.
    ///
    /// `Ok(None)` means the remote closed cleanly before re-issuing one.
    async fn next_recovery(&mut self) -> Result<Option<RecoveryConfig>, TransportError> {
        match self.next().await? {
            Some(msg) => {
                let conf: RecoveryConfig = serde_json::from_value(msg.payload)
                    .map_err(|e| TransportError::Protocol(format!("bad recovery message: {e}")))?;
                Ok(Some(conf))
            }
            None => Ok(None),
        }
    }

    /// Receive the next session start descriptor.
    ///
    /// Specialization of [`Connection::next`] that parses each payload into
    /// [`SessionStartArgs`]. `Ok(None)` means the remote closed cleanly.
    async fn next_start(&mut self) -> Result<Option<SessionStartArgs>, TransportError> {
        match self.next().await? {
            Some(msg) => {
                let args: SessionStartArgs = serde_json::from_value(msg.payload)
                    .map_err(|e| TransportError::Protocol(format!("bad start message: {e}")))?;
                Ok(Some(args))
            }
            None => Ok(None),
        }
    }
}

/// Factory opening connections against the endpoint family of one transport.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open the app-level connection to the start endpoint, optionally
    /// scoped to a registered app name.
    async fn connect_start(
        &self,
        app_name: Option<&str>,
    ) -> Result<Box<dyn Connection>, TransportError>;

    /// Open the app-level connection to the recovery endpoint for `key`,
    /// resuming the start stream without repeating the handshake.
    async fn connect_recovery(&self, key: &str) -> Result<Box<dyn Connection>, TransportError>;

    /// Open the user-level connection for one session.
    async fn connect_user(
        &self,
        args: &SessionStartArgs,
    ) -> Result<Box<dyn Connection>, TransportError>;
}

//! Error taxonomy for the engine and its transports.
//!
//! A graceful remote close is never represented as an error: connections
//! surface it by ending their inbound sequence (`Ok(None)` from
//! [`crate::connection::Connection::next`]). Everything in
//! [`TransportError`] is a genuine fault.

use std::sync::Arc;

/// Network or protocol fault on a connection.
///
/// On the app-level connection this drives the reconnection protocol; on a
/// user connection it terminates that session only.
#[derive(Clone, Debug, thiserror::Error)]
pub enum TransportError {
    /// The link broke or could not be established.
    #[error("network error: {0}")]
    Network(String),
    /// The remote closed with a non-normal closure code.
    #[error("connection closed abnormally (code {code}): {reason}")]
    Closed {
        /// Transport-specific closure code.
        code: u16,
        /// Reason supplied by the remote, if any.
        reason: String,
    },
    /// A frame violated the wire protocol (unexpected type, bad JSON).
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The app init handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

/// A context lookup outside its valid scope.
///
/// Always a programmer error, and deliberately distinct from "value
/// absent" so application code can use it to detect which scope it runs in.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// The slot is not bound in the current task.
    #[error("{slot} context is not bound in this task")]
    NotBound {
        /// Which slot was looked up (`"app"` or `"user"`).
        slot: &'static str,
    },
    /// The slot is bound, but to a value of a different type.
    #[error("{slot} context holds a different type")]
    TypeMismatch {
        /// Which slot was looked up.
        slot: &'static str,
    },
}

impl ContextError {
    pub(crate) const APP: &'static str = "app";
    pub(crate) const USER: &'static str = "user";

    /// App-slot lookup failure.
    pub fn app_not_bound() -> Self {
        Self::NotBound { slot: Self::APP }
    }

    /// User-slot lookup failure.
    pub fn user_not_bound() -> Self {
        Self::NotBound { slot: Self::USER }
    }
}

/// Failure to route an update operation to its viewers.
#[derive(Clone, Debug, thiserror::Error)]
pub enum UpdateError {
    /// A user-scoped update was emitted outside any session.
    #[error("no session bound in this task")]
    NoSession,
    /// The target session already ended.
    #[error("session {request_id} is gone")]
    ChannelClosed {
        /// The session the update was addressed to.
        request_id: String,
    },
    /// The target session's outbound queue is full; the frame was dropped
    /// rather than blocking the caller.
    #[error("session {request_id} outbound queue full, frame dropped")]
    ChannelFull {
        /// The slow session.
        request_id: String,
    },
    /// The update could not be serialized.
    #[error("serialize error: {0}")]
    Serialize(String),
    /// Required scope state was missing.
    #[error(transparent)]
    Context(#[from] ContextError),
}

impl From<serde_json::Error> for UpdateError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialize(err.to_string())
    }
}

/// Top-level engine failure, surfaced from `run`.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Unrecovered transport fault on the app connection.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The projected reconnect delay exceeded the ceiling; retrying is
    /// pointless because the server has expired the app by then.
    #[error("giving up after {failures} consecutive failures (next delay {delay_secs}s exceeds ceiling)")]
    BackoffExceeded {
        /// Consecutive failure count at the time of giving up.
        failures: u32,
        /// The delay that crossed the ceiling, in seconds.
        delay_secs: u64,
    },
    /// An app-level callback (`on_start`) faulted.
    #[error("app callback failed: {0}")]
    Callback(Arc<anyhow::Error>),
    /// One session's callback pipeline faulted.
    #[error("session {request_id} failed: {fault}")]
    Session {
        /// The failed session.
        request_id: String,
        /// The captured fault.
        fault: Arc<anyhow::Error>,
    },
    /// A session task panicked or was aborted outside the engine's control.
    #[error("session task panicked: {0}")]
    TaskPanic(String),
    /// Every failing task of a run, so a caller can inspect all of them.
    #[error("{} task(s) failed", .0.len())]
    Aggregate(Vec<EngineError>),
}

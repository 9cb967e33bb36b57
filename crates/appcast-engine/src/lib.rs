//! # appcast-engine
//!
//! The runtime engine behind a server-driven interactive app: one
//! persistent app-level connection accepts new user sessions, each session
//! gets its own connection and callback pipeline, and mutable references
//! are mirrored incrementally to remote viewers.
//!
//! - **[`App`]**: owns the app-level connection, the reconnection protocol,
//!   and the set of live sessions. Built through [`AppBuilder`].
//! - **[`session`]**: per-user session task — `Open → Dispatching → Closing
//!   → Ended`, with `on_open`/`on_message`/`on_close`/`on_end` hooks.
//! - **[`context`]**: task-scoped app/user contexts, strictly isolated
//!   across concurrently running sessions.
//! - **[`feed`]**: the [`feed::Feed`] bounded sequence and update routing by
//!   [`feed::Scope`].
//! - **[`interact`]**: wait-for-input helpers built atop message dispatch.
//!
//! ## Crate Position
//!
//! Depends on `appcast-core`. Transports (e.g. `appcast-client`) plug in
//! through the `Connector` trait.

#![deny(unsafe_code)]

pub mod app;
pub mod callbacks;
pub mod context;
pub mod feed;
pub mod interact;
pub mod session;

pub use app::{App, AppBuilder};
pub use appcast_core::{
    AppConfig, Connection, Connector, ContextError, EngineError, Eviction, Message, RecoveryConfig,
    ServerConfig, SessionStartArgs, TransportError, UpdateError, UpdateOp,
};
pub use callbacks::{CallbackId, SessionFault, TempCallbacks};
pub use context::{app_context, current_session, request_id, user_context};
pub use feed::{Feed, Reference, Scope, show};
pub use interact::{next_message, wait_for_all, wait_for_any, wait_for_message};
pub use session::SessionHandle;

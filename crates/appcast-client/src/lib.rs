//! # appcast-client
//!
//! The WebSocket transport for the appcast engine: [`WsConnector`]
//! implements the engine's `Connector` trait over `tokio-tungstenite`,
//! configured through [`ClientSettings`] (compiled defaults plus
//! `APPCAST_*` environment overrides).
//!
//! ```no_run
//! use appcast_client::WsConnector;
//! use std::sync::Arc;
//!
//! let connector = Arc::new(WsConnector::from_env());
//! // App::builder(connector) ...
//! ```

#![deny(unsafe_code)]

pub mod settings;
pub mod websocket;

pub use settings::ClientSettings;
pub use websocket::{WsConnection, WsConnector};

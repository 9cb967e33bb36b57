//! Wire messages exchanged over a connection after the handshake.
//!
//! The app-level handshake is:
//!
//! 1. Client → Server: [`AppConfig`]
//! 2. Server → Client: [`ServerConfig`]
//! 3. Server → Client: stream of start descriptors, one per new user
//!    session, parsed into [`SessionStartArgs`]
//!
//! A recovery connect skips steps 1–2: the server re-issues a
//! [`RecoveryConfig`] as its first message, then resumes at step 3.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Control token signalling a graceful remote close.
pub const TOKEN_CLOSE: &str = "off";
/// Control token for transport keepalive; discarded, never yielded as data.
pub const TOKEN_KEEPALIVE: &str = "ping";

/// Returns true if `text` is the graceful-close control token.
///
/// Control tokens are compared case-insensitively.
pub fn is_close_token(text: &str) -> bool {
    text.eq_ignore_ascii_case(TOKEN_CLOSE)
}

/// Returns true if `text` is the keepalive control token.
pub fn is_keepalive_token(text: &str) -> bool {
    text.eq_ignore_ascii_case(TOKEN_KEEPALIVE)
}

/// Client identity sent at app init. Immutable once sent.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Client library version.
    pub version: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Configuration returned by the server at app init.
///
/// `app_name` and `app_url` are fixed for the app's lifetime. The
/// `recovery_key` carried here is only the first issue; every later
/// reconnect receives a fresh one via [`RecoveryConfig`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server-assigned app name.
    pub app_name: String,
    /// Public URL where viewers reach this app.
    pub app_url: String,
    /// Opaque token enabling resumption after a transport fault.
    #[serde(default)]
    pub recovery_key: Option<String>,
}

/// Re-issued recovery key, the first message on a resumed app connection.
///
/// A key is single-use: presenting it consumes it, and the server hands
/// out the replacement before the start stream resumes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Opaque token for the next resumption.
    pub recovery_key: String,
}

/// Start descriptor for one user session, delivered over the app connection.
///
/// `request_id` is unique per session for its lifetime. The wire field for
/// the user endpoint is `channel`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStartArgs {
    /// Unique id of the user session.
    pub request_id: String,
    /// Endpoint the session connection should be opened against.
    #[serde(rename = "channel")]
    pub user_url: String,
}

/// The unit exchanged over any connection after the handshake.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Identifier of the connection the message arrived on (its endpoint).
    pub source: String,
    /// Session request id, when the connection belongs to one session.
    pub request_id: Option<String>,
    /// Structured payload.
    pub payload: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn control_tokens_case_insensitive() {
        assert!(is_close_token("off"));
        assert!(is_close_token("OFF"));
        assert!(is_close_token("Off"));
        assert!(!is_close_token("offline"));

        assert!(is_keepalive_token("ping"));
        assert!(is_keepalive_token("PING"));
        assert!(!is_keepalive_token("pong"));
    }

    #[test]
    fn app_config_default_carries_crate_version() {
        let conf = AppConfig::default();
        assert_eq!(conf.version, env!("CARGO_PKG_VERSION"));
        let json = serde_json::to_value(&conf).unwrap();
        assert!(json["version"].is_string());
    }

    #[test]
    fn server_config_recovery_key_optional() {
        let conf: ServerConfig = serde_json::from_value(json!({
            "app_name": "app-1234",
            "app_url": "https://example.org/apps/app-1234",
        }))
        .unwrap();
        assert_eq!(conf.app_name, "app-1234");
        assert!(conf.recovery_key.is_none());

        let conf: ServerConfig = serde_json::from_value(json!({
            "app_name": "app-1234",
            "app_url": "https://example.org/apps/app-1234",
            "recovery_key": "rk-1",
        }))
        .unwrap();
        assert_eq!(conf.recovery_key.as_deref(), Some("rk-1"));
    }

    #[test]
    fn start_args_channel_field_maps_to_user_url() {
        let args: SessionStartArgs = serde_json::from_value(json!({
            "request_id": "1234",
            "channel": "wss://example.org/session/app-1234/1234",
        }))
        .unwrap();
        assert_eq!(args.request_id, "1234");
        assert_eq!(args.user_url, "wss://example.org/session/app-1234/1234");

        let json = serde_json::to_value(&args).unwrap();
        assert_eq!(json["channel"], "wss://example.org/session/app-1234/1234");
    }
}

//! WebSocket transport — thin client over `tokio-tungstenite`.
//!
//! One [`WsConnection`] per open socket. Inbound control tokens are
//! interpreted here so the engine never sees them: `"off"` ends the
//! sequence, `"ping"` is discarded. A normal close frame also ends the
//! sequence; any other closure code is a [`TransportError::Closed`].
//!
//! Keepalive probing is client-driven: after `keepalive_ping_interval` of
//! inbound silence a protocol ping is sent, and a link that stays silent
//! for `keepalive_ping_timeout` more is reported as a network fault.

use std::time::Duration;

use appcast_core::messages::{is_close_token, is_keepalive_token};
use appcast_core::{AppConfig, Connection, Connector, Message, ServerConfig, SessionStartArgs,
    TransportError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Bytes, Message as WsMessage};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use crate::settings::ClientSettings;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection factory over the endpoint family of one server.
pub struct WsConnector {
    settings: ClientSettings,
}

impl WsConnector {
    /// A connector using the given settings.
    pub fn new(settings: ClientSettings) -> Self {
        Self { settings }
    }

    /// A connector configured from defaults plus `APPCAST_*` overrides.
    pub fn from_env() -> Self {
        Self::new(ClientSettings::from_env())
    }

    /// The settings this connector opens connections with.
    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    async fn open(
        &self,
        url: String,
        request_id: Option<String>,
    ) -> Result<Box<dyn Connection>, TransportError> {
        debug!(url = %url, "opening websocket");
        let (ws, _response) = timeout(self.settings.timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| TransportError::Network(format!("connect to {url} timed out")))?
            .map_err(|e| TransportError::Network(format!("connect to {url} failed: {e}")))?;
        Ok(Box::new(WsConnection {
            ws,
            source: url,
            request_id,
            ping_interval: self.settings.keepalive_ping_interval,
            ping_timeout: self.settings.keepalive_ping_timeout,
        }))
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect_start(
        &self,
        app_name: Option<&str>,
    ) -> Result<Box<dyn Connection>, TransportError> {
        self.open(self.settings.start_url(app_name), None).await
    }

    async fn connect_recovery(&self, key: &str) -> Result<Box<dyn Connection>, TransportError> {
        self.open(self.settings.recovery_url(key), None).await
    }

    async fn connect_user(
        &self,
        args: &SessionStartArgs,
    ) -> Result<Box<dyn Connection>, TransportError> {
        self.open(args.user_url.clone(), Some(args.request_id.clone()))
            .await
    }
}

/// One open WebSocket, app-level or user-level.
pub struct WsConnection {
    ws: WsStream,
    source: String,
    request_id: Option<String>,
    ping_interval: Duration,
    ping_timeout: Duration,
}

impl WsConnection {
    /// One raw frame, with keepalive probing on idle. `Ok(None)` is the
    /// end of the stream.
    async fn recv_frame(&mut self) -> Result<Option<WsMessage>, TransportError> {
        match timeout(self.ping_interval, self.ws.next()).await {
            Ok(frame) => flatten(frame),
            Err(_) => {
                self.ws
                    .send(WsMessage::Ping(Bytes::new()))
                    .await
                    .map_err(|e| TransportError::Network(e.to_string()))?;
                match timeout(self.ping_timeout, self.ws.next()).await {
                    Ok(frame) => flatten(frame),
                    Err(_) => Err(TransportError::Network("keepalive timeout".into())),
                }
            }
        }
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn publish(&mut self, payload: &Value) -> Result<(), TransportError> {
        let frame =
            serde_json::to_string(payload).map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.ws
            .send(WsMessage::text(frame))
            .await
            .map_err(|e| TransportError::Network(e.to_string()))
    }

    async fn next(&mut self) -> Result<Option<Message>, TransportError> {
        loop {
            match self.recv_frame().await? {
                None => return Ok(None),
                Some(WsMessage::Text(text)) => {
                    if is_close_token(text.as_str()) {
                        return Ok(None);
                    }
                    if is_keepalive_token(text.as_str()) {
                        continue;
                    }
                    let payload: Value = serde_json::from_str(text.as_str())
                        .map_err(|e| TransportError::Protocol(format!("bad frame: {e}")))?;
                    return Ok(Some(Message {
                        source: self.source.clone(),
                        request_id: self.request_id.clone(),
                        payload,
                    }));
                }
                Some(WsMessage::Close(frame)) => return close_result(frame),
                Some(WsMessage::Binary(_)) => {
                    return Err(TransportError::Protocol("unexpected binary frame".into()));
                }
                // Pings are answered by the stream itself.
                Some(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => {}
            }
        }
    }

    async fn init_app(&mut self, config: &AppConfig) -> Result<ServerConfig, TransportError> {
        let frame =
            serde_json::to_string(config).map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.ws
            .send(WsMessage::text(frame))
            .await
            .map_err(|e| TransportError::Handshake(format!("sending app config: {e}")))?;

        loop {
            match self.recv_frame().await? {
                None | Some(WsMessage::Close(_)) => {
                    return Err(TransportError::Handshake(
                        "connection closed during init".into(),
                    ));
                }
                Some(WsMessage::Text(text)) => {
                    if is_keepalive_token(text.as_str()) {
                        continue;
                    }
                    return serde_json::from_str(text.as_str())
                        .map_err(|e| TransportError::Handshake(format!("bad server config: {e}")));
                }
                Some(WsMessage::Binary(_)) => {
                    return Err(TransportError::Handshake("unexpected binary frame".into()));
                }
                Some(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => {}
            }
        }
    }
}

fn flatten(
    frame: Option<Result<WsMessage, tokio_tungstenite::tungstenite::Error>>,
) -> Result<Option<WsMessage>, TransportError> {
    match frame {
        None => Ok(None),
        Some(Ok(msg)) => Ok(Some(msg)),
        Some(Err(e)) => Err(TransportError::Network(e.to_string())),
    }
}

fn close_result(frame: Option<CloseFrame>) -> Result<Option<Message>, TransportError> {
    match frame {
        None => Ok(None),
        Some(frame) if frame.code == CloseCode::Normal => Ok(None),
        Some(frame) => Err(TransportError::Closed {
            code: u16::from(frame.code),
            reason: frame.reason.to_string(),
        }),
    }
}

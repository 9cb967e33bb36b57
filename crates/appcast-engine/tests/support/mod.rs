//! Scripted in-memory transport for engine tests.
//!
//! A [`MockServer`] plays the remote side of every connection: tests queue
//! app-level connections (or failures) up front, then drive session starts,
//! inbound messages, closes and faults through the returned handles while
//! the engine runs.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};

use appcast_engine::{
    AppConfig, Connection, Connector, Message, RecoveryConfig, ServerConfig, SessionStartArgs,
    TransportError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

/// One recorded app-level connect attempt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectKind {
    /// `connect_start` with the optional app name.
    Start(Option<String>),
    /// `connect_recovery` with the key presented.
    Recovery(String),
}

enum AppEvent {
    Start(SessionStartArgs),
    Close,
    Fault(String),
}

enum UserEvent {
    Message(Value),
    Close,
    Fault(String),
}

/// The remote side of one scripted app-level connection.
pub struct AppRemote {
    events: mpsc::UnboundedSender<AppEvent>,
}

impl AppRemote {
    /// Deliver a session start descriptor.
    pub fn start_session(&self, request_id: &str, user_url: &str) {
        let _ = self.events.send(AppEvent::Start(SessionStartArgs {
            request_id: request_id.into(),
            user_url: user_url.into(),
        }));
    }

    /// Close the app connection gracefully.
    pub fn close(&self) {
        let _ = self.events.send(AppEvent::Close);
    }

    /// Break the app connection with a transport fault.
    pub fn fault(&self, reason: &str) {
        let _ = self.events.send(AppEvent::Fault(reason.into()));
    }
}

/// The remote side of one scripted user-level connection.
pub struct UserEndpoint {
    events: mpsc::UnboundedSender<UserEvent>,
    outbound: mpsc::UnboundedReceiver<Value>,
}

impl UserEndpoint {
    /// Deliver one inbound message payload to the session.
    pub fn send(&self, payload: Value) {
        let _ = self.events.send(UserEvent::Message(payload));
    }

    /// Close the user connection gracefully.
    pub fn close(&self) {
        let _ = self.events.send(UserEvent::Close);
    }

    /// Break the user connection with a transport fault.
    pub fn fault(&self, reason: &str) {
        let _ = self.events.send(UserEvent::Fault(reason.into()));
    }

    /// Await the next frame the session published.
    pub async fn next_outbound(&mut self) -> Value {
        self.outbound.recv().await.expect("session gone")
    }

    /// The next already-published frame, if any.
    pub fn try_outbound(&mut self) -> Option<Value> {
        self.outbound.try_recv().ok()
    }
}

/// Scripted remote for every connection an engine opens.
///
/// An app-level connect with nothing queued fails with a network error, so
/// an unscripted reconnect storm terminates in backoff instead of hanging.
#[derive(Default)]
pub struct MockServer {
    app_queue: Mutex<VecDeque<Result<MockAppConn, TransportError>>>,
    users: Mutex<HashMap<String, VecDeque<Result<MockUserConn, TransportError>>>>,
    connects: Mutex<Vec<ConnectKind>>,
}

impl MockServer {
    /// Queue a fresh app connection whose init handshake returns `config`.
    pub fn script_app(&self, config: ServerConfig) -> AppRemote {
        let (tx, rx) = mpsc::unbounded_channel();
        self.app_queue.lock().push_back(Ok(MockAppConn {
            init: Some(Ok(config)),
            reissued_key: None,
            events: rx,
        }));
        AppRemote { events: tx }
    }

    /// Queue a resumed app connection: calling init on it is an error, and
    /// `reissued_key` is handed out as the replacement recovery key.
    pub fn script_resumed_app(&self, reissued_key: &str) -> AppRemote {
        let (tx, rx) = mpsc::unbounded_channel();
        self.app_queue.lock().push_back(Ok(MockAppConn {
            init: None,
            reissued_key: Some(reissued_key.to_string()),
            events: rx,
        }));
        AppRemote { events: tx }
    }

    /// Queue an app-level connect failure.
    pub fn script_connect_failure(&self, reason: &str) {
        self.app_queue
            .lock()
            .push_back(Err(TransportError::Network(reason.into())));
    }

    /// Queue an app connection whose init handshake fails.
    pub fn script_init_failure(&self, reason: &str) {
        let (_tx, rx) = mpsc::unbounded_channel();
        self.app_queue.lock().push_back(Ok(MockAppConn {
            init: Some(Err(TransportError::Handshake(reason.into()))),
            reissued_key: None,
            events: rx,
        }));
    }

    /// Queue a user connection for `request_id`.
    pub fn script_user(&self, request_id: &str) -> UserEndpoint {
        let (etx, erx) = mpsc::unbounded_channel();
        let (otx, orx) = mpsc::unbounded_channel();
        self.users
            .lock()
            .entry(request_id.to_string())
            .or_default()
            .push_back(Ok(MockUserConn {
                request_id: request_id.to_string(),
                events: erx,
                outbound: otx,
            }));
        UserEndpoint {
            events: etx,
            outbound: orx,
        }
    }

    /// Queue a user-level connect failure for `request_id`.
    pub fn script_user_failure(&self, request_id: &str, reason: &str) {
        self.users
            .lock()
            .entry(request_id.to_string())
            .or_default()
            .push_back(Err(TransportError::Network(reason.into())));
    }

    /// Every app-level connect attempt, in order.
    pub fn connects(&self) -> Vec<ConnectKind> {
        self.connects.lock().clone()
    }

    fn pop_app(&self) -> Result<Box<dyn Connection>, TransportError> {
        match self.app_queue.lock().pop_front() {
            Some(Ok(conn)) => Ok(Box::new(conn)),
            Some(Err(err)) => Err(err),
            None => Err(TransportError::Network("no scripted connection".into())),
        }
    }
}

#[async_trait]
impl Connector for MockServer {
    async fn connect_start(
        &self,
        app_name: Option<&str>,
    ) -> Result<Box<dyn Connection>, TransportError> {
        self.connects
            .lock()
            .push(ConnectKind::Start(app_name.map(String::from)));
        self.pop_app()
    }

    async fn connect_recovery(&self, key: &str) -> Result<Box<dyn Connection>, TransportError> {
        self.connects.lock().push(ConnectKind::Recovery(key.into()));
        self.pop_app()
    }

    async fn connect_user(
        &self,
        args: &SessionStartArgs,
    ) -> Result<Box<dyn Connection>, TransportError> {
        match self
            .users
            .lock()
            .get_mut(&args.request_id)
            .and_then(VecDeque::pop_front)
        {
            Some(Ok(conn)) => Ok(Box::new(conn)),
            Some(Err(err)) => Err(err),
            None => Err(TransportError::Network(format!(
                "no scripted user connection for {}",
                args.request_id
            ))),
        }
    }
}

struct MockAppConn {
    init: Option<Result<ServerConfig, TransportError>>,
    reissued_key: Option<String>,
    events: mpsc::UnboundedReceiver<AppEvent>,
}

#[async_trait]
impl Connection for MockAppConn {
    async fn publish(&mut self, _payload: &Value) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next(&mut self) -> Result<Option<Message>, TransportError> {
        Ok(None)
    }

    async fn init_app(&mut self, _config: &AppConfig) -> Result<ServerConfig, TransportError> {
        match self.init.take() {
            Some(result) => result,
            None => Err(TransportError::Handshake(
                "init on a resumed connection".into(),
            )),
        }
    }

    async fn next_recovery(&mut self) -> Result<Option<RecoveryConfig>, TransportError> {
        match self.reissued_key.take() {
            Some(recovery_key) => Ok(Some(RecoveryConfig { recovery_key })),
            None => Err(TransportError::Protocol(
                "no reissued key scripted for this connection".into(),
            )),
        }
    }

    async fn next_start(&mut self) -> Result<Option<SessionStartArgs>, TransportError> {
        // A dropped remote handle counts as a graceful close.
        match self.events.recv().await {
            Some(AppEvent::Start(args)) => Ok(Some(args)),
            Some(AppEvent::Close) | None => Ok(None),
            Some(AppEvent::Fault(reason)) => Err(TransportError::Network(reason)),
        }
    }
}

struct MockUserConn {
    request_id: String,
    events: mpsc::UnboundedReceiver<UserEvent>,
    outbound: mpsc::UnboundedSender<Value>,
}

#[async_trait]
impl Connection for MockUserConn {
    async fn publish(&mut self, payload: &Value) -> Result<(), TransportError> {
        let _ = self.outbound.send(payload.clone());
        Ok(())
    }

    async fn next(&mut self) -> Result<Option<Message>, TransportError> {
        match self.events.recv().await {
            Some(UserEvent::Message(payload)) => Ok(Some(Message {
                source: format!("mock://session/{}", self.request_id),
                request_id: Some(self.request_id.clone()),
                payload,
            })),
            Some(UserEvent::Close) | None => Ok(None),
            Some(UserEvent::Fault(reason)) => Err(TransportError::Network(reason)),
        }
    }

    async fn init_app(&mut self, _config: &AppConfig) -> Result<ServerConfig, TransportError> {
        Err(TransportError::Handshake("not an app connection".into()))
    }
}

/// A server config for tests.
pub fn server_config(name: &str, recovery_key: Option<&str>) -> ServerConfig {
    ServerConfig {
        app_name: name.to_string(),
        app_url: format!("https://example.org/apps/{name}"),
        recovery_key: recovery_key.map(String::from),
    }
}

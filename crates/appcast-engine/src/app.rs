//! The engine: app-level connection, reconnection protocol, and session
//! spawning.
//!
//! Run states: `Idle → Connecting → Initializing → Listening ⇄ Reconnecting
//! → Stopped`. Initializing only happens on a fresh connect; a reconnect
//! with a recovery key skips it and passes through Recovering, which awaits
//! the key the server re-issues for the next resumption. The backoff
//! ceiling is a first-class transition to a fatal
//! [`EngineError::BackoffExceeded`], not an incidental failure path.
//!
//! All session tasks are children of one [`JoinSet`] owned by the run:
//! stopping the engine cancels every child and awaits their Closing/Ended
//! transitions before `run` returns. Faults from individual sessions are
//! collected and surfaced together.

use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use appcast_core::errors::EngineError;
use appcast_core::retry::reconnect_delay;
use appcast_core::{AppConfig, Connection, Connector, SessionStartArgs, TransportError};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::callbacks::{
    CallbackId, Callbacks, SessionFault, TempCallbacks, end_hook, message_hook, start_hook,
};
use crate::context::{APP_SCOPE, AppScope, ServerState};
use crate::session::{self, OUTBOUND_BUFFER, SessionHandle, SessionSet, SessionTask};

type UserDataFactory = Arc<dyn Fn() -> Arc<dyn Any + Send + Sync> + Send + Sync>;

/// Builder for [`App`].
pub struct AppBuilder {
    connector: Arc<dyn Connector>,
    app_name: Option<String>,
    config: AppConfig,
    app_data: Arc<dyn Any + Send + Sync>,
    user_data: UserDataFactory,
}

impl AppBuilder {
    /// Use a registered app name (scopes the start endpoint path).
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }

    /// Override the client version sent at app init.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.version = version.into();
        self
    }

    /// Attach the app context value, readable from every task of this
    /// engine via [`crate::context::app_context`].
    pub fn app_context<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.app_data = Arc::new(value);
        self
    }

    /// Attach a factory producing one user context value per session,
    /// readable inside that session via [`crate::context::user_context`].
    pub fn user_context<T, F>(mut self, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        self.user_data = Arc::new(move || Arc::new(factory()));
        self
    }

    /// Finish the builder.
    pub fn build(self) -> App {
        App {
            inner: Arc::new(AppInner {
                connector: self.connector,
                app_name: self.app_name,
                config: self.config,
                callbacks: Arc::new(Callbacks::default()),
                app_data: self.app_data,
                user_data: self.user_data,
                sessions: SessionSet::default(),
                cancel: CancellationToken::new(),
            }),
        }
    }
}

struct AppInner {
    connector: Arc<dyn Connector>,
    app_name: Option<String>,
    config: AppConfig,
    callbacks: Arc<Callbacks>,
    app_data: Arc<dyn Any + Send + Sync>,
    user_data: UserDataFactory,
    sessions: SessionSet,
    cancel: CancellationToken,
}

/// One running app instance: cheap-clone handle over shared engine state.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

/// Engine run states. Connections travel inside the states so a resumed
/// connect can skip Initializing.
enum EngineState {
    Connecting,
    Initializing(Box<dyn Connection>),
    Recovering(Box<dyn Connection>, Arc<ServerState>),
    Listening(Box<dyn Connection>, Arc<ServerState>),
    Reconnecting(TransportError),
}

/// Why the listen loop returned.
enum ListenOutcome {
    /// Remote closed cleanly — stop without error.
    Closed,
    /// Engine shutdown requested.
    Cancelled,
    /// Transport fault — reconnect.
    Fault(TransportError),
}

impl App {
    /// Start building an app around a transport.
    pub fn builder(connector: Arc<dyn Connector>) -> AppBuilder {
        AppBuilder {
            connector,
            app_name: None,
            config: AppConfig::default(),
            app_data: Arc::new(()),
            user_data: Arc::new(|| Arc::new(())),
        }
    }

    /// An app with default configuration.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self::builder(connector).build()
    }

    /// Request shutdown: cancels the listen loop and every session task.
    /// `run` returns once all of them finished their cleanup.
    pub fn stop(&self) {
        self.inner.cancel.cancel();
    }

    /// Token cancelled when [`App::stop`] is called.
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Number of currently live sessions.
    pub async fn session_count(&self) -> usize {
        self.inner.sessions.len().await
    }

    /// Register an `on_start` hook, run once after app init.
    pub fn on_start<F, Fut>(&self, hook: F) -> CallbackId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner.callbacks.add_start(start_hook(hook))
    }

    /// Register an `on_open` hook, run when a session opens.
    pub fn on_open<F, Fut>(&self, hook: F) -> CallbackId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner.callbacks.add_open(start_hook(hook))
    }

    /// Register an `on_message` hook, run for each inbound session message.
    pub fn on_message<F, Fut>(&self, hook: F) -> CallbackId
    where
        F: Fn(appcast_core::Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner.callbacks.add_message(message_hook(hook))
    }

    /// Register an `on_close` hook, run while the session scope is still
    /// bound, with the fault that closed the session, if any.
    pub fn on_close<F, Fut>(&self, hook: F) -> CallbackId
    where
        F: Fn(Option<SessionFault>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner.callbacks.add_close(end_hook(hook))
    }

    /// Register an `on_end` hook, run after the session scope is gone.
    pub fn on_end<F, Fut>(&self, hook: F) -> CallbackId
    where
        F: Fn(Option<SessionFault>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.inner.callbacks.add_end(end_hook(hook))
    }

    /// Remove a previously registered hook.
    pub fn remove_callback(&self, id: CallbackId) {
        self.inner.callbacks.remove(id);
    }

    /// Guard for registrations valid only within a dynamic extent; hooks
    /// registered through it are revoked when the guard drops.
    pub fn temp(&self) -> TempCallbacks {
        TempCallbacks::new(Arc::clone(&self.inner.callbacks))
    }

    /// Run the engine until the remote closes, a fatal fault occurs, or
    /// [`App::stop`] is called.
    ///
    /// Any faults collected from session tasks (and the terminating fault,
    /// if the run itself failed) are surfaced together: a single fault is
    /// returned directly, several as [`EngineError::Aggregate`].
    pub async fn run(&self) -> Result<(), EngineError> {
        let mut n_fails: u32 = 0;
        let mut server: Option<Arc<ServerState>> = None;
        let mut tasks: JoinSet<Result<(), EngineError>> = JoinSet::new();
        let mut faults: Vec<EngineError> = Vec::new();
        let mut state = EngineState::Connecting;

        let outcome = loop {
            state = match state {
                EngineState::Connecting => {
                    let recovery = server
                        .as_ref()
                        .and_then(|s| s.recovery_key.read().clone());
                    let attempt = match &recovery {
                        Some(key) => self.inner.connector.connect_recovery(key).await,
                        None => {
                            self.inner
                                .connector
                                .connect_start(self.inner.app_name.as_deref())
                                .await
                        }
                    };
                    match attempt {
                        Ok(conn) => {
                            n_fails = 0;
                            match (&recovery, server.clone()) {
                                // Resumed: handshake skipped, state carries over.
                                (Some(_), Some(srv)) => {
                                    info!(app_name = %srv.app_name, "app connection recovered");
                                    EngineState::Recovering(conn, srv)
                                }
                                _ => EngineState::Initializing(conn),
                            }
                        }
                        Err(err) => EngineState::Reconnecting(err),
                    }
                }

                EngineState::Initializing(mut conn) => {
                    match conn.init_app(&self.inner.config).await {
                        Ok(conf) => {
                            info!(app_name = %conf.app_name, app_url = %conf.app_url, "app initialized");
                            let srv = Arc::new(ServerState::new(conf));
                            server = Some(Arc::clone(&srv));
                            let started = APP_SCOPE
                                .scope(self.app_scope(&srv), self.inner.callbacks.dispatch_start())
                                .await;
                            match started {
                                Ok(()) => EngineState::Listening(conn, srv),
                                Err(err) => break Err(EngineError::Callback(Arc::new(err))),
                            }
                        }
                        Err(err) => EngineState::Reconnecting(err),
                    }
                }

                // A presented key is consumed by the server; the replacement
                // arrives before the start stream resumes.
                EngineState::Recovering(mut conn, srv) => match conn.next_recovery().await {
                    Ok(Some(conf)) => {
                        debug!("recovery key refreshed");
                        srv.set_recovery_key(conf.recovery_key);
                        EngineState::Listening(conn, srv)
                    }
                    Ok(None) => {
                        info!("app connection closed by remote");
                        break Ok(());
                    }
                    Err(err) => EngineState::Reconnecting(err),
                },

                EngineState::Listening(mut conn, srv) => {
                    let outcome = self
                        .listen(conn.as_mut(), &srv, &mut tasks, &mut faults)
                        .await;
                    match outcome {
                        ListenOutcome::Closed => {
                            info!("app connection closed by remote");
                            break Ok(());
                        }
                        ListenOutcome::Cancelled => break Ok(()),
                        ListenOutcome::Fault(err) => EngineState::Reconnecting(err),
                    }
                }

                EngineState::Reconnecting(err) => match reconnect_delay(n_fails) {
                    Some(delay) => {
                        warn!(
                            error = %err,
                            failures = n_fails,
                            delay_secs = delay.as_secs(),
                            "app connection lost, reconnecting"
                        );
                        n_fails += 1;
                        tokio::select! {
                            () = self.inner.cancel.cancelled() => break Ok(()),
                            () = tokio::time::sleep(delay) => {}
                        }
                        EngineState::Connecting
                    }
                    None => {
                        break Err(EngineError::BackoffExceeded {
                            failures: n_fails,
                            delay_secs: u64::from(n_fails).pow(3),
                        });
                    }
                },
            };
        };

        // Stopped: cancel all children, then join them — no orphans.
        self.inner.cancel.cancel();
        while let Some(joined) = tasks.join_next().await {
            collect(joined, &mut faults);
        }

        if let Err(err) = outcome {
            faults.insert(0, err);
        }
        match faults.len() {
            0 => Ok(()),
            1 => Err(faults.remove(0)),
            _ => Err(EngineError::Aggregate(faults)),
        }
    }

    /// Listening: consume session start descriptors until the connection
    /// ends, collecting finished session tasks as they complete.
    async fn listen(
        &self,
        conn: &mut dyn Connection,
        srv: &Arc<ServerState>,
        tasks: &mut JoinSet<Result<(), EngineError>>,
        faults: &mut Vec<EngineError>,
    ) -> ListenOutcome {
        let scope = self.app_scope(srv);
        APP_SCOPE
            .scope(scope.clone(), async {
                loop {
                    tokio::select! {
                        biased;
                        () = self.inner.cancel.cancelled() => return ListenOutcome::Cancelled,
                        joined = tasks.join_next(), if !tasks.is_empty() => {
                            if let Some(joined) = joined {
                                collect(joined, faults);
                            }
                        }
                        start = conn.next_start() => match start {
                            Ok(Some(args)) => self.spawn_session(args, &scope, tasks).await,
                            Ok(None) => return ListenOutcome::Closed,
                            Err(err) => return ListenOutcome::Fault(err),
                        }
                    }
                }
            })
            .await
    }

    /// Spawn one session task as a child of the run's join set, with both
    /// scopes bound around it.
    async fn spawn_session(
        &self,
        args: SessionStartArgs,
        scope: &AppScope,
        tasks: &mut JoinSet<Result<(), EngineError>>,
    ) {
        info!(request_id = %args.request_id, "session starting");
        let (tx, rx) = mpsc::channel::<Value>(OUTBOUND_BUFFER);
        let handle = SessionHandle::new(&args.request_id, tx);
        scope.sessions.insert(handle.clone()).await;

        let task = SessionTask {
            args,
            connector: Arc::clone(&self.inner.connector),
            callbacks: Arc::clone(&self.inner.callbacks),
            sessions: scope.sessions.clone(),
            cancel: self.inner.cancel.child_token(),
            handle,
            rx,
            user_data: (self.inner.user_data)(),
        };
        let _ = tasks.spawn(APP_SCOPE.scope(scope.clone(), session::run(task)));
    }

    fn app_scope(&self, srv: &Arc<ServerState>) -> AppScope {
        AppScope {
            server: Arc::clone(srv),
            sessions: self.inner.sessions.clone(),
            callbacks: Arc::clone(&self.inner.callbacks),
            data: Arc::clone(&self.inner.app_data),
        }
    }
}

/// Fold one joined session result into the fault list.
fn collect(
    joined: Result<Result<(), EngineError>, tokio::task::JoinError>,
    faults: &mut Vec<EngineError>,
) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            debug!(error = %err, "session task failed");
            faults.push(err);
        }
        Err(join_err) => {
            warn!(error = %join_err, "session task panicked");
            faults.push(EngineError::TaskPanic(join_err.to_string()));
        }
    }
}

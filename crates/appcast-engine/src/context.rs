//! Task-scoped app and user contexts.
//!
//! Two independent `task_local!` slots, resolved by the currently executing
//! task rather than any shared global, so concurrently running session
//! tasks never observe each other's user context:
//!
//! - The **app slot** is bound for the whole engine run and inherited by
//!   every session task the engine spawns.
//! - The **user slot** is bound only inside one specific session task.
//!
//! Lookups outside the valid extent fail with [`ContextError::NotBound`] —
//! never with a stale or wrong-scope value — which application code can use
//! to detect whether it runs in app scope or session scope.
//!
//! Context values are shared instances: mutate them through their own
//! interior mutability. App-context mutations are visible to every session
//! (one shared instance); user-context mutations only within that session.

use std::any::Any;
use std::sync::Arc;

use appcast_core::errors::ContextError;
use parking_lot::RwLock;

use crate::callbacks::Callbacks;
use crate::session::{SessionHandle, SessionSet};

tokio::task_local! {
    pub(crate) static APP_SCOPE: AppScope;
    pub(crate) static USER_SCOPE: UserScope;
}

/// Server-assigned identity of the running app.
///
/// The recovery key sits behind a lock because every reconnect replaces
/// it while session tasks may be reading it.
#[derive(Debug)]
pub(crate) struct ServerState {
    pub(crate) app_name: String,
    pub(crate) app_url: String,
    pub(crate) recovery_key: RwLock<Option<String>>,
}

impl ServerState {
    pub(crate) fn new(conf: appcast_core::ServerConfig) -> Self {
        Self {
            app_name: conf.app_name,
            app_url: conf.app_url,
            recovery_key: RwLock::new(conf.recovery_key),
        }
    }

    /// Replace the recovery key with the one just re-issued.
    pub(crate) fn set_recovery_key(&self, key: String) {
        *self.recovery_key.write() = Some(key);
    }
}

/// Value bound in the app slot: one per engine run.
#[derive(Clone)]
pub(crate) struct AppScope {
    pub(crate) server: Arc<ServerState>,
    pub(crate) sessions: SessionSet,
    pub(crate) callbacks: Arc<Callbacks>,
    pub(crate) data: Arc<dyn Any + Send + Sync>,
}

/// Value bound in the user slot: one per session task.
#[derive(Clone)]
pub(crate) struct UserScope {
    pub(crate) session: SessionHandle,
    pub(crate) data: Arc<dyn Any + Send + Sync>,
}

/// The application-supplied app context, downcast to `T`.
///
/// Fails with [`ContextError::NotBound`] outside a running engine and with
/// [`ContextError::TypeMismatch`] when the engine was built with a
/// different context type.
pub fn app_context<T: Send + Sync + 'static>() -> Result<Arc<T>, ContextError> {
    let data = APP_SCOPE
        .try_with(|scope| Arc::clone(&scope.data))
        .map_err(|_| ContextError::app_not_bound())?;
    data.downcast::<T>()
        .map_err(|_| ContextError::TypeMismatch { slot: "app" })
}

/// The per-session user context, downcast to `T`.
///
/// Only available inside the session task the context was bound to; in
/// particular it fails with [`ContextError::NotBound`] from app-scope code
/// and from `on_end` hooks.
pub fn user_context<T: Send + Sync + 'static>() -> Result<Arc<T>, ContextError> {
    let data = USER_SCOPE
        .try_with(|scope| Arc::clone(&scope.data))
        .map_err(|_| ContextError::user_not_bound())?;
    data.downcast::<T>()
        .map_err(|_| ContextError::TypeMismatch { slot: "user" })
}

/// Handle of the session this task is running on behalf of.
pub fn current_session() -> Result<SessionHandle, ContextError> {
    USER_SCOPE
        .try_with(|scope| scope.session.clone())
        .map_err(|_| ContextError::user_not_bound())
}

/// Request id of the current session.
pub fn request_id() -> Result<String, ContextError> {
    USER_SCOPE
        .try_with(|scope| scope.session.request_id().to_string())
        .map_err(|_| ContextError::user_not_bound())
}

/// Server-assigned app name.
pub fn app_name() -> Result<String, ContextError> {
    APP_SCOPE
        .try_with(|scope| scope.server.app_name.clone())
        .map_err(|_| ContextError::app_not_bound())
}

/// Public URL where viewers reach this app.
pub fn app_url() -> Result<String, ContextError> {
    APP_SCOPE
        .try_with(|scope| scope.server.app_url.clone())
        .map_err(|_| ContextError::app_not_bound())
}

/// Current recovery key, if the server issued one.
pub fn recovery_key() -> Result<Option<String>, ContextError> {
    APP_SCOPE
        .try_with(|scope| scope.server.recovery_key.read().clone())
        .map_err(|_| ContextError::app_not_bound())
}

/// Consistent snapshot of every live session.
pub async fn sessions() -> Result<Vec<SessionHandle>, ContextError> {
    let set = session_set()?;
    Ok(set.snapshot().await)
}

/// True when running inside a specific session's task.
pub fn in_session_scope() -> bool {
    USER_SCOPE.try_with(|_| ()).is_ok()
}

/// True when running on behalf of a running engine (app or session task).
pub fn in_app_scope() -> bool {
    APP_SCOPE.try_with(|_| ()).is_ok()
}

pub(crate) fn session_set() -> Result<SessionSet, ContextError> {
    APP_SCOPE
        .try_with(|scope| scope.sessions.clone())
        .map_err(|_| ContextError::app_not_bound())
}

pub(crate) fn callback_registry() -> Result<Arc<Callbacks>, ContextError> {
    APP_SCOPE
        .try_with(|scope| Arc::clone(&scope.callbacks))
        .map_err(|_| ContextError::app_not_bound())
}

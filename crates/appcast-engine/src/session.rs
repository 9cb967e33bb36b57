//! Per-user session task and the live-session set.
//!
//! Each session owns one user-level connection and runs the callback
//! pipeline through `Open → Dispatching → Closing → Ended`:
//!
//! - **Open**: connect to the user endpoint, bind a fresh user scope, start
//!   `on_open` hooks.
//! - **Dispatching**: pump the connection — inbound messages run
//!   `on_message` hooks sequentially; outbound frames drain from the
//!   session's queue. `on_open` runs concurrently with dispatching (in the
//!   same task), so an open hook may await inbound messages.
//! - **Closing**: run `on_close` with the fault, if any — guaranteed even
//!   when `on_open`/`on_message` faulted, and on engine shutdown.
//! - **Ended**: run `on_end` outside the user scope, flush queued frames,
//!   unregister from the session set, release the connection.
//!
//! A callback fault or a non-graceful transport error is isolated to this
//! session; siblings and the engine keep running.

use std::collections::HashMap;
use std::sync::Arc;

use appcast_core::errors::{EngineError, UpdateError};
use appcast_core::{Connector, SessionStartArgs, UpdateOp};
use futures::FutureExt;
use metrics::counter;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::callbacks::{Callbacks, SessionFault};
use crate::context::{USER_SCOPE, UserScope};

/// Outbound queue depth per session. A session that falls this far behind
/// starts dropping frames instead of delaying its siblings.
pub(crate) const OUTBOUND_BUFFER: usize = 256;

/// Cheap-clone handle to one live session.
///
/// `send` enqueues for the session's connection without blocking; the
/// session task publishes in order.
#[derive(Clone)]
pub struct SessionHandle {
    request_id: Arc<str>,
    tx: mpsc::Sender<Value>,
}

impl SessionHandle {
    pub(crate) fn new(request_id: &str, tx: mpsc::Sender<Value>) -> Self {
        Self {
            request_id: Arc::from(request_id),
            tx,
        }
    }

    /// Request id of this session, unique for its lifetime.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Serialize an update operation and enqueue it for publication.
    pub fn send(&self, update: &UpdateOp) -> Result<(), UpdateError> {
        self.send_raw(serde_json::to_value(update)?)
    }

    /// Enqueue a raw payload for publication.
    ///
    /// Never blocks: a full queue drops the frame with a warning so one
    /// slow session cannot stall broadcasts to the others.
    pub fn send_raw(&self, payload: Value) -> Result<(), UpdateError> {
        match self.tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                counter!("appcast_session_send_drops_total").increment(1);
                warn!(request_id = %self.request_id, "outbound queue full, frame dropped");
                Err(UpdateError::ChannelFull {
                    request_id: self.request_id.to_string(),
                })
            }
            Err(TrySendError::Closed(_)) => Err(UpdateError::ChannelClosed {
                request_id: self.request_id.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("request_id", &self.request_id)
            .finish_non_exhaustive()
    }
}

/// Live sessions of one engine, keyed by request id.
///
/// Inserted at spawn, removed in the session's Ended phase. Broadcasts
/// take an atomic snapshot then iterate, so concurrent insert/remove never
/// skews delivery.
#[derive(Clone, Default)]
pub struct SessionSet {
    inner: Arc<RwLock<HashMap<String, SessionHandle>>>,
}

impl SessionSet {
    pub(crate) async fn insert(&self, handle: SessionHandle) {
        let _ = self
            .inner
            .write()
            .await
            .insert(handle.request_id().to_string(), handle);
    }

    pub(crate) async fn remove(&self, request_id: &str) {
        let _ = self.inner.write().await.remove(request_id);
    }

    /// Consistent snapshot of every live session.
    pub async fn snapshot(&self) -> Vec<SessionHandle> {
        self.inner.read().await.values().cloned().collect()
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// True when no session is live.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Deliver one payload to every live session.
    ///
    /// Returns the number of sessions the frame was enqueued for; slow or
    /// gone sessions are skipped with a counter bump.
    pub(crate) async fn broadcast(&self, payload: &Value) -> usize {
        let targets = self.snapshot().await;
        let mut delivered = 0;
        for session in &targets {
            match session.send_raw(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    counter!("appcast_broadcast_drops_total").increment(1);
                    debug!(request_id = session.request_id(), error = %err, "broadcast skipped session");
                }
            }
        }
        delivered
    }
}

/// Everything one session task needs, assembled by the engine at spawn.
pub(crate) struct SessionTask {
    pub(crate) args: SessionStartArgs,
    pub(crate) connector: Arc<dyn Connector>,
    pub(crate) callbacks: Arc<Callbacks>,
    pub(crate) sessions: SessionSet,
    pub(crate) cancel: CancellationToken,
    pub(crate) handle: SessionHandle,
    pub(crate) rx: mpsc::Receiver<Value>,
    pub(crate) user_data: Arc<dyn std::any::Any + Send + Sync>,
}

/// Run one session to completion. Always ends through Closing → Ended,
/// whatever happened before: graceful close, fault, or engine shutdown.
pub(crate) async fn run(task: SessionTask) -> Result<(), EngineError> {
    let SessionTask {
        args,
        connector,
        callbacks,
        sessions,
        cancel,
        handle,
        rx,
        user_data,
    } = task;
    let request_id = args.request_id.clone();

    let user_scope = UserScope {
        session: handle,
        data: user_data,
    };
    let fault = USER_SCOPE
        .scope(
            user_scope,
            run_scoped(&args, connector.as_ref(), &callbacks, &cancel, rx),
        )
        .await;

    // Ended: outside the user scope — user-context lookups fail here.
    if let Err(err) = callbacks.dispatch_end(fault.clone()).await {
        warn!(request_id = %request_id, error = %err, "on_end hook failed");
    }
    sessions.remove(&request_id).await;
    info!(request_id = %request_id, faulted = fault.is_some(), "session ended");

    match fault {
        None => Ok(()),
        Some(fault) => Err(EngineError::Session { request_id, fault }),
    }
}

/// Open + Dispatching + Closing, inside the user scope.
///
/// Returns the fault that terminated the session, if any.
async fn run_scoped(
    args: &SessionStartArgs,
    connector: &dyn Connector,
    callbacks: &Callbacks,
    cancel: &CancellationToken,
    mut rx: mpsc::Receiver<Value>,
) -> Option<SessionFault> {
    let request_id = args.request_id.as_str();

    // Open
    let mut conn = match connector.connect_user(args).await {
        Ok(conn) => conn,
        Err(err) => {
            warn!(request_id, error = %err, "user connection failed");
            let fault: SessionFault = Arc::new(anyhow::Error::new(err));
            return close(callbacks, request_id, Some(fault)).await;
        }
    };
    debug!(request_id, url = %args.user_url, "session open");

    // Dispatching. `on_open` runs concurrently with the pump in this same
    // task so an open hook can await inbound messages.
    let mut open_fut = Box::pin(callbacks.dispatch_open().fuse());
    let mut open_pending = true;

    let mut fault: Option<SessionFault> = loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break None,
            result = &mut open_fut, if open_pending => {
                open_pending = false;
                if let Err(err) = result {
                    break Some(Arc::new(err));
                }
            }
            outbound = rx.recv() => {
                if let Some(payload) = outbound {
                    if let Err(err) = conn.publish(&payload).await {
                        break Some(Arc::new(anyhow::Error::new(err)));
                    }
                }
            }
            inbound = conn.next() => match inbound {
                Ok(Some(msg)) => {
                    if let Err(err) = callbacks.dispatch_message(&msg).await {
                        break Some(Arc::new(err));
                    }
                }
                // Graceful remote close: not a fault.
                Ok(None) => break None,
                Err(err) => break Some(Arc::new(anyhow::Error::new(err))),
            }
        }
    };

    // Flush anything hooks enqueued before the loop broke.
    while let Ok(payload) = rx.try_recv() {
        if let Err(err) = conn.publish(&payload).await {
            debug!(request_id, error = %err, "flush failed");
            break;
        }
    }

    fault = close(callbacks, request_id, fault).await;
    fault
}

/// Closing: run `on_close` with the fault. A faulted close hook becomes
/// the session fault when there was none yet.
async fn close(
    callbacks: &Callbacks,
    request_id: &str,
    fault: Option<SessionFault>,
) -> Option<SessionFault> {
    debug!(request_id, faulted = fault.is_some(), "session closing");
    match callbacks.dispatch_close(fault.clone()).await {
        Ok(()) => fault,
        Err(err) => {
            warn!(request_id, error = %err, "on_close hook failed");
            fault.or_else(|| Some(Arc::new(err)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn handle_send_serializes_update() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = SessionHandle::new("1", tx);
        handle.send(&UpdateOp::ref_push("feed", json!("a"))).unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame["type"], "ref");
        assert_eq!(frame["id"], "feed");
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let (tx, _rx) = mpsc::channel(1);
        let handle = SessionHandle::new("1", tx);
        handle.send_raw(json!(1)).unwrap();

        let err = handle.send_raw(json!(2)).unwrap_err();
        assert!(matches!(err, UpdateError::ChannelFull { .. }));
    }

    #[tokio::test]
    async fn closed_queue_reports_gone_session() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let handle = SessionHandle::new("1", tx);
        let err = handle.send_raw(json!(1)).unwrap_err();
        assert!(matches!(err, UpdateError::ChannelClosed { .. }));
    }

    #[tokio::test]
    async fn session_set_snapshot_and_broadcast() {
        let set = SessionSet::default();
        let (tx1, mut rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        set.insert(SessionHandle::new("1", tx1)).await;
        set.insert(SessionHandle::new("2", tx2)).await;
        assert_eq!(set.len().await, 2);

        let delivered = set.broadcast(&json!({"x": 1})).await;
        assert_eq!(delivered, 2);
        assert_eq!(rx1.recv().await.unwrap(), json!({"x": 1}));
        assert_eq!(rx2.recv().await.unwrap(), json!({"x": 1}));
    }

    #[tokio::test]
    async fn broadcast_skips_gone_sessions() {
        let set = SessionSet::default();
        let (tx1, rx1) = mpsc::channel(4);
        let (tx2, mut rx2) = mpsc::channel(4);
        set.insert(SessionHandle::new("gone", tx1)).await;
        set.insert(SessionHandle::new("live", tx2)).await;
        drop(rx1);

        let delivered = set.broadcast(&json!("ping")).await;
        assert_eq!(delivered, 1);
        assert_eq!(rx2.recv().await.unwrap(), json!("ping"));
    }

    #[tokio::test]
    async fn remove_unregisters() {
        let set = SessionSet::default();
        let (tx, _rx) = mpsc::channel(4);
        set.insert(SessionHandle::new("1", tx)).await;
        set.remove("1").await;
        assert!(set.is_empty().await);
    }
}

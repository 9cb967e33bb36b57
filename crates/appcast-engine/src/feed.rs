//! References and feeds: addressable mutable objects mirrored to viewers.
//!
//! A [`Reference`] renders once as a full snapshot; later mutations emit
//! incremental operations keyed by `reference_id` so viewers apply them in
//! place. [`Feed`] is the ordered-sequence specialization, bounded by
//! `limit` with an eviction policy.
//!
//! Updates are routed by [`Scope`]: to the session bound in the current
//! task, to every live session, or automatically depending on where the
//! call runs.

use appcast_core::errors::UpdateError;
use appcast_core::{Eviction, UpdateOp};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::context;

/// Routing policy for a reference's updates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Every currently live session, snapshotted at call time.
    App,
    /// Only the session bound in the current task; an update emitted
    /// outside any session fails with [`UpdateError::NoSession`].
    User,
    /// The bound session when there is one, otherwise every live session.
    #[default]
    Auto,
}

/// An addressable mutable object exposed to viewers.
pub trait Reference {
    /// Globally unique id within one app run.
    fn reference_id(&self) -> &str;

    /// Routing policy for this reference's updates.
    fn scope(&self) -> Scope;

    /// Full snapshot for the initial rendering.
    fn snapshot(&self) -> UpdateOp;
}

/// Bounded, evictable ordered sequence mirrored to viewers.
///
/// `append` is safe from concurrent tasks: the sequence sits behind an
/// internal lock, and eviction is applied before observers are notified.
pub struct Feed<T> {
    id: String,
    limit: usize,
    method: Eviction,
    scope: Scope,
    data: Mutex<Vec<T>>,
}

const DEFAULT_LIMIT: usize = 20;

impl<T> Default for Feed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Feed<T> {
    /// An empty feed with a random reference id, limit 20, FIFO eviction
    /// and automatic scope.
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }

    /// An empty feed with an explicit reference id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            limit: DEFAULT_LIMIT,
            method: Eviction::default(),
            scope: Scope::default(),
            data: Mutex::new(Vec::new()),
        }
    }

    /// Set the maximum retained length.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Set the eviction policy.
    pub fn with_method(mut self, method: Eviction) -> Self {
        self.method = method;
        self
    }

    /// Set the routing scope.
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Seed the feed with initial elements; the eviction policy applies
    /// immediately.
    pub fn with_items(self, items: Vec<T>) -> Self {
        {
            let mut data = self.data.lock();
            *data = items;
            trim(&mut data, self.limit, self.method);
        }
        self
    }

    /// Maximum retained length.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Eviction policy.
    pub fn method(&self) -> Eviction {
        self.method
    }

    /// Number of retained elements.
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    /// True when nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }
}

impl<T: Clone> Feed<T> {
    /// Snapshot of the retained elements.
    pub fn items(&self) -> Vec<T> {
        self.data.lock().clone()
    }
}

impl<T: Serialize + Clone + Send> Feed<T> {
    /// Append an element, apply eviction, and emit one `push` update
    /// routed by this feed's scope.
    ///
    /// The push is emitted even when `Lifo` discarded the element locally:
    /// viewers hold the same `limit`/`method` from the snapshot and apply
    /// the same eviction on their side.
    pub async fn append(&self, element: T) -> Result<(), UpdateError> {
        let payload = serde_json::to_value(&element)?;
        {
            let mut data = self.data.lock();
            data.push(element);
            trim(&mut data, self.limit, self.method);
        }
        route_update(&UpdateOp::ref_push(self.id.clone(), payload), self.scope).await
    }
}

impl<T: Serialize + Clone> Reference for Feed<T> {
    fn reference_id(&self) -> &str {
        &self.id
    }

    fn scope(&self) -> Scope {
        self.scope
    }

    fn snapshot(&self) -> UpdateOp {
        let data = self
            .data
            .lock()
            .iter()
            .filter_map(|item| match serde_json::to_value(item) {
                Ok(value) => Some(value),
                Err(err) => {
                    warn!(reference = %self.id, error = %err, "skipping unserializable element in snapshot");
                    None
                }
            })
            .collect();
        UpdateOp::array_snapshot(self.id.clone(), data, self.limit, self.method)
    }
}

fn trim<T>(data: &mut Vec<T>, limit: usize, method: Eviction) {
    if data.len() <= limit {
        return;
    }
    match method {
        Eviction::Fifo => {
            let excess = data.len() - limit;
            let _ = data.drain(..excess);
        }
        Eviction::Lifo => data.truncate(limit),
        Eviction::Ignore => {}
    }
}

/// Route one update operation according to `scope`.
pub async fn route_update(op: &UpdateOp, scope: Scope) -> Result<(), UpdateError> {
    let payload = serde_json::to_value(op)?;
    match scope {
        Scope::User => {
            let session = context::current_session().map_err(|_| UpdateError::NoSession)?;
            session.send_raw(payload)
        }
        Scope::App => broadcast(payload).await,
        Scope::Auto => match context::current_session() {
            Ok(session) => session.send_raw(payload),
            Err(_) => broadcast(payload).await,
        },
    }
}

async fn broadcast(payload: Value) -> Result<(), UpdateError> {
    let sessions = context::session_set()?;
    let _ = sessions.broadcast(&payload).await;
    Ok(())
}

/// Root placement: replace the viewer's content tree with `content`,
/// routed with [`Scope::Auto`] — the current session when called from
/// session scope, every session from app scope.
pub async fn show(content: Value) -> Result<(), UpdateError> {
    route_update(&UpdateOp::root_put(content), Scope::Auto).await
}

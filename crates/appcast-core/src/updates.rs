//! Incremental update operations mirrored to remote viewers.
//!
//! A closed tagged family with an explicit `type` discriminant: viewers
//! apply each operation in place without re-fetching state. The initial
//! rendering of a reference is a full snapshot ([`UpdateOp::Array`] for
//! feeds); subsequent mutations are keyed incremental operations
//! ([`UpdateOp::Ref`]).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Method discriminant carried inside an update operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMethod {
    /// Replace the target wholesale.
    Put,
    /// Append to the end of the target sequence.
    Push,
}

/// Eviction policy for a bounded feed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Eviction {
    /// Drop elements from the front once the limit is exceeded.
    #[default]
    Fifo,
    /// Discard new elements beyond the limit; the front is kept.
    Lifo,
    /// Never trim.
    Ignore,
}

/// One update operation, serialized with a `type` tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UpdateOp {
    /// Root placement: replace the viewer's whole content tree.
    Root {
        /// Always [`UpdateMethod::Put`].
        method: UpdateMethod,
        /// Content snapshot.
        data: Value,
    },
    /// Incremental operation addressed at a reference.
    Ref {
        /// Always [`UpdateMethod::Push`].
        method: UpdateMethod,
        /// Target `reference_id`.
        id: String,
        /// Appended element.
        data: Value,
    },
    /// Full snapshot of a bounded sequence, embedded in a content snapshot.
    Array {
        /// Current elements.
        data: Vec<Value>,
        /// Maximum retained length.
        limit: usize,
        /// Eviction policy the viewer must mirror.
        method: Eviction,
        /// Reference id later `push` operations are keyed by.
        reference: String,
    },
}

impl UpdateOp {
    /// Root placement of a content snapshot.
    pub fn root_put(data: Value) -> Self {
        Self::Root {
            method: UpdateMethod::Put,
            data,
        }
    }

    /// Incremental push of one element onto the reference `id`.
    pub fn ref_push(id: impl Into<String>, data: Value) -> Self {
        Self::Ref {
            method: UpdateMethod::Push,
            id: id.into(),
            data,
        }
    }

    /// Full snapshot of a feed's retained elements.
    pub fn array_snapshot(
        reference: impl Into<String>,
        data: Vec<Value>,
        limit: usize,
        method: Eviction,
    ) -> Self {
        Self::Array {
            data,
            limit,
            method,
            reference: reference.into(),
        }
    }
}

//! Waiting for viewer input.
//!
//! These helpers register a temporary `on_message` hook, park the caller on
//! a channel, and revoke the hook once the awaited input arrives — on
//! normal and faulted exit alike. They are meant to be called from `on_open`
//! hooks or app-scope tasks; awaiting the next message from inside an
//! `on_message` hook of the same session deadlocks, because message
//! dispatch is sequential within a session.

use std::collections::{HashMap, HashSet};
use std::future;
use std::sync::Arc;

use appcast_core::Message;
use appcast_core::errors::ContextError;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::callbacks::TempCallbacks;
use crate::context;

/// Wait for the next message from the current session that satisfies
/// `pred`.
///
/// Messages from other sessions never match, whatever `pred` says. Fails
/// with [`ContextError::NotBound`] outside a session task.
pub async fn wait_for_message<P>(pred: P) -> Result<Message, ContextError>
where
    P: Fn(&Message) -> bool + Send + Sync + 'static,
{
    let target = context::request_id()?;
    let registry = context::callback_registry()?;
    let guard = TempCallbacks::new(registry);

    let (tx, mut rx) = mpsc::channel::<Message>(1);
    let pred = Arc::new(pred);
    let _ = guard.on_message(move |msg: Message| {
        let tx = tx.clone();
        let pred = Arc::clone(&pred);
        let target = target.clone();
        async move {
            // The hook runs inside the task of the session that received
            // the message, so the bound request id identifies the sender.
            if context::request_id().ok().as_deref() == Some(target.as_str()) && pred(&msg) {
                let _ = tx.try_send(msg);
            }
            Ok(())
        }
    });

    match rx.recv().await {
        Some(msg) => Ok(msg),
        // Unreachable while the guard holds the hook alive.
        None => future::pending().await,
    }
}

/// Wait for the next message from the current session.
pub async fn next_message() -> Result<Message, ContextError> {
    wait_for_message(|_| true).await
}

/// Wait for the first message from **any** live session that satisfies
/// `pred`.
///
/// Usable from app scope; fails with [`ContextError::NotBound`] outside a
/// running engine.
pub async fn wait_for_any<P>(pred: P) -> Result<Message, ContextError>
where
    P: Fn(&Message) -> bool + Send + Sync + 'static,
{
    let registry = context::callback_registry()?;
    let guard = TempCallbacks::new(registry);

    let (tx, mut rx) = mpsc::channel::<Message>(1);
    let pred = Arc::new(pred);
    let _ = guard.on_message(move |msg: Message| {
        let tx = tx.clone();
        let pred = Arc::clone(&pred);
        async move {
            if pred(&msg) {
                let _ = tx.try_send(msg);
            }
            Ok(())
        }
    });

    match rx.recv().await {
        Some(msg) => Ok(msg),
        None => future::pending().await,
    }
}

/// Wait until every session live **at call time** has produced one message
/// satisfying `pred`; returns the collected messages keyed by request id.
///
/// Sessions started after the call are not waited on. A session that ends
/// without answering leaves the wait pending for the remaining callers to
/// cancel, so pair this with a timeout when sessions may leave.
pub async fn wait_for_all<P>(pred: P) -> Result<HashMap<String, Message>, ContextError>
where
    P: Fn(&Message) -> bool + Send + Sync + 'static,
{
    let registry = context::callback_registry()?;
    let expected: HashSet<String> = context::sessions()
        .await?
        .iter()
        .map(|s| s.request_id().to_string())
        .collect();
    if expected.is_empty() {
        return Ok(HashMap::new());
    }

    let guard = TempCallbacks::new(registry);
    let collected: Arc<Mutex<HashMap<String, Message>>> = Arc::new(Mutex::new(HashMap::new()));
    let (tx, mut rx) = mpsc::channel::<()>(1);

    let expected = Arc::new(expected);
    let pred = Arc::new(pred);
    let sink = Arc::clone(&collected);
    let wanted = Arc::clone(&expected);
    let _ = guard.on_message(move |msg: Message| {
        let tx = tx.clone();
        let pred = Arc::clone(&pred);
        let sink = Arc::clone(&sink);
        let wanted = Arc::clone(&wanted);
        async move {
            let Ok(id) = context::request_id() else {
                return Ok(());
            };
            if wanted.contains(&id) && pred(&msg) {
                let mut map = sink.lock();
                // First matching answer per session wins.
                if !map.contains_key(&id) {
                    let _ = map.insert(id, msg);
                    if map.len() == wanted.len() {
                        let _ = tx.try_send(());
                    }
                }
            }
            Ok(())
        }
    });

    if rx.recv().await.is_none() {
        return future::pending().await;
    }
    drop(guard);
    let answers = std::mem::take(&mut *collected.lock());
    Ok(answers)
}

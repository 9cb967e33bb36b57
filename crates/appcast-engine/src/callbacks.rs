//! Callback registry for lifecycle hooks.
//!
//! Five hook points: `on_start` (app level), `on_open`, `on_message`,
//! `on_close`, `on_end` (session level). Hooks are async closures returning
//! `anyhow::Result<()>`; dispatch snapshots the registered list and runs
//! hooks sequentially in registration order, so one slow hook never
//! reorders delivery within a session.
//!
//! Temporary registration: hooks added through [`TempCallbacks`] are
//! revoked when the guard drops, on normal or faulted exit alike.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use appcast_core::Message;
use parking_lot::{Mutex, RwLock};

/// Identifier of one registered hook, usable for removal.
pub type CallbackId = u64;

/// A captured session fault, shared with `on_close`/`on_end` hooks.
pub type SessionFault = Arc<anyhow::Error>;

type HookFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
pub(crate) type StartHook = Arc<dyn Fn() -> HookFuture + Send + Sync>;
pub(crate) type MessageHook = Arc<dyn Fn(Message) -> HookFuture + Send + Sync>;
pub(crate) type EndHook = Arc<dyn Fn(Option<SessionFault>) -> HookFuture + Send + Sync>;

/// Hook storage, one slot per lifecycle point.
#[derive(Default)]
pub(crate) struct Callbacks {
    next_id: AtomicU64,
    start: RwLock<Vec<(CallbackId, StartHook)>>,
    open: RwLock<Vec<(CallbackId, StartHook)>>,
    message: RwLock<Vec<(CallbackId, MessageHook)>>,
    close: RwLock<Vec<(CallbackId, EndHook)>>,
    end: RwLock<Vec<(CallbackId, EndHook)>>,
}

impl Callbacks {
    fn next_id(&self) -> CallbackId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn add_start(&self, hook: StartHook) -> CallbackId {
        let id = self.next_id();
        self.start.write().push((id, hook));
        id
    }

    pub(crate) fn add_open(&self, hook: StartHook) -> CallbackId {
        let id = self.next_id();
        self.open.write().push((id, hook));
        id
    }

    pub(crate) fn add_message(&self, hook: MessageHook) -> CallbackId {
        let id = self.next_id();
        self.message.write().push((id, hook));
        id
    }

    pub(crate) fn add_close(&self, hook: EndHook) -> CallbackId {
        let id = self.next_id();
        self.close.write().push((id, hook));
        id
    }

    pub(crate) fn add_end(&self, hook: EndHook) -> CallbackId {
        let id = self.next_id();
        self.end.write().push((id, hook));
        id
    }

    /// Remove a hook from whichever slot holds it.
    pub(crate) fn remove(&self, id: CallbackId) {
        self.start.write().retain(|(i, _)| *i != id);
        self.open.write().retain(|(i, _)| *i != id);
        self.message.write().retain(|(i, _)| *i != id);
        self.close.write().retain(|(i, _)| *i != id);
        self.end.write().retain(|(i, _)| *i != id);
    }

    #[cfg(test)]
    pub(crate) fn message_count(&self) -> usize {
        self.message.read().len()
    }

    /// Run all `on_start` hooks sequentially. The returned future owns its
    /// snapshot of the hook list.
    pub(crate) fn dispatch_start(&self) -> impl Future<Output = anyhow::Result<()>> + Send + 'static {
        let hooks = snapshot(&self.start);
        async move {
            for hook in hooks {
                hook().await?;
            }
            Ok(())
        }
    }

    /// Run all `on_open` hooks sequentially.
    pub(crate) fn dispatch_open(&self) -> impl Future<Output = anyhow::Result<()>> + Send + 'static {
        let hooks = snapshot(&self.open);
        async move {
            for hook in hooks {
                hook().await?;
            }
            Ok(())
        }
    }

    /// Run all `on_message` hooks sequentially with one inbound message.
    pub(crate) async fn dispatch_message(&self, msg: &Message) -> anyhow::Result<()> {
        let hooks = snapshot(&self.message);
        for hook in hooks {
            hook(msg.clone()).await?;
        }
        Ok(())
    }

    /// Run all `on_close` hooks with the session fault, if any.
    pub(crate) async fn dispatch_close(&self, fault: Option<SessionFault>) -> anyhow::Result<()> {
        let hooks = snapshot(&self.close);
        for hook in hooks {
            hook(fault.clone()).await?;
        }
        Ok(())
    }

    /// Run all `on_end` hooks with the session fault, if any.
    pub(crate) async fn dispatch_end(&self, fault: Option<SessionFault>) -> anyhow::Result<()> {
        let hooks = snapshot(&self.end);
        for hook in hooks {
            hook(fault.clone()).await?;
        }
        Ok(())
    }
}

fn snapshot<H: Clone>(slot: &RwLock<Vec<(CallbackId, H)>>) -> Vec<H> {
    slot.read().iter().map(|(_, h)| h.clone()).collect()
}

pub(crate) fn start_hook<F, Fut>(hook: F) -> StartHook
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move || Box::pin(hook()))
}

pub(crate) fn message_hook<F, Fut>(hook: F) -> MessageHook
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |msg| Box::pin(hook(msg)))
}

pub(crate) fn end_hook<F, Fut>(hook: F) -> EndHook
where
    F: Fn(Option<SessionFault>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |fault| Box::pin(hook(fault)))
}

/// Guard scoping extra hook registrations to a dynamic extent.
///
/// Every hook registered through this guard is revoked when the guard
/// drops — whether the surrounding code exited normally or with an error.
pub struct TempCallbacks {
    registry: Arc<Callbacks>,
    registered: Mutex<Vec<CallbackId>>,
}

impl TempCallbacks {
    pub(crate) fn new(registry: Arc<Callbacks>) -> Self {
        Self {
            registry,
            registered: Mutex::new(Vec::new()),
        }
    }

    fn track(&self, id: CallbackId) -> CallbackId {
        self.registered.lock().push(id);
        id
    }

    /// Register a temporary `on_open` hook.
    pub fn on_open<F, Fut>(&self, hook: F) -> CallbackId
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.track(self.registry.add_open(start_hook(hook)))
    }

    /// Register a temporary `on_message` hook.
    pub fn on_message<F, Fut>(&self, hook: F) -> CallbackId
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.track(self.registry.add_message(message_hook(hook)))
    }

    /// Register a temporary `on_close` hook.
    pub fn on_close<F, Fut>(&self, hook: F) -> CallbackId
    where
        F: Fn(Option<SessionFault>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.track(self.registry.add_close(end_hook(hook)))
    }

    /// Register a temporary `on_end` hook.
    pub fn on_end<F, Fut>(&self, hook: F) -> CallbackId
    where
        F: Fn(Option<SessionFault>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.track(self.registry.add_end(end_hook(hook)))
    }
}

impl Drop for TempCallbacks {
    fn drop(&mut self) {
        for id in self.registered.lock().drain(..) {
            self.registry.remove(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn test_message() -> Message {
        Message {
            source: "test".into(),
            request_id: Some("1".into()),
            payload: json!({"msg": "hi"}),
        }
    }

    #[tokio::test]
    async fn hooks_run_in_registration_order() {
        let callbacks = Callbacks::default();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            let _ = callbacks.add_open(start_hook(move || {
                let order = Arc::clone(&order);
                async move {
                    order.lock().push(label);
                    Ok(())
                }
            }));
        }

        callbacks.dispatch_open().await.unwrap();
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn faulted_hook_stops_dispatch() {
        let callbacks = Callbacks::default();
        let ran_second = Arc::new(AtomicUsize::new(0));

        let _ = callbacks.add_open(start_hook(|| async { anyhow::bail!("intentional") }));
        let counter = Arc::clone(&ran_second);
        let _ = callbacks.add_open(start_hook(move || {
            let counter = Arc::clone(&counter);
            async move {
                let _ = counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }));

        assert!(callbacks.dispatch_open().await.is_err());
        assert_eq!(ran_second.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn message_hooks_receive_payload() {
        let callbacks = Callbacks::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _ = callbacks.add_message(message_hook(move |msg: Message| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(msg.payload);
                Ok(())
            }
        }));

        callbacks.dispatch_message(&test_message()).await.unwrap();
        assert_eq!(*seen.lock(), vec![json!({"msg": "hi"})]);
    }

    #[tokio::test]
    async fn remove_deletes_hook() {
        let callbacks = Callbacks::default();
        let id = callbacks.add_message(message_hook(|_msg| async { Ok(()) }));
        assert_eq!(callbacks.message_count(), 1);
        callbacks.remove(id);
        assert_eq!(callbacks.message_count(), 0);
    }

    #[tokio::test]
    async fn temp_guard_revokes_on_drop() {
        let callbacks = Arc::new(Callbacks::default());
        {
            let temp = TempCallbacks::new(Arc::clone(&callbacks));
            let _ = temp.on_message(|_msg| async { Ok(()) });
            let _ = temp.on_open(|| async { Ok(()) });
            assert_eq!(callbacks.message_count(), 1);
        }
        assert_eq!(callbacks.message_count(), 0);
        assert!(callbacks.open.read().is_empty());
    }

    #[tokio::test]
    async fn end_hooks_see_the_fault() {
        let callbacks = Callbacks::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _ = callbacks.add_end(end_hook(move |fault: Option<SessionFault>| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(fault.map(|f| f.to_string()));
                Ok(())
            }
        }));

        callbacks.dispatch_end(None).await.unwrap();
        callbacks
            .dispatch_end(Some(Arc::new(anyhow::anyhow!("boom"))))
            .await
            .unwrap();
        assert_eq!(*seen.lock(), vec![None, Some("boom".to_string())]);
    }
}

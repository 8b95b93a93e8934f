//! The client-side pending-call table.
//!
//! Maps an id to either a *result waiter* (a one-shot channel the next
//! RETURN/ERROR for that id resolves) or a *callback slot* (a registered
//! local callback the next CALLBACK for that id invokes, zero or more
//! times). IDs are drawn from one counter, so a call and its callback
//! handles never collide.
//!
//! CALLBACK deliveries are queued onto a single dedicated task rather than
//! spawned ad hoc, so they always run in the order they arrived and never
//! interleave with each other — running them inline on the inbound-reader
//! task instead would deadlock the moment a callback calls back into
//! `invoke` and awaits its own RETURN.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, mpsc, oneshot};

use crate::{callback::Callback, error::RpcError, value::Value};

/// Outcome delivered to a result waiter.
pub type CallResult = Result<Value, RpcError>;

enum Entry {
    Waiter(oneshot::Sender<CallResult>),
    Callback(Arc<dyn Callback>),
}

struct QueuedCallback {
    callback: Arc<dyn Callback>,
    args: Vec<Value>,
}

/// The client engine's registry of in-flight calls and callback handles.
pub struct PendingTable {
    entries: Mutex<HashMap<u32, Entry>>,
    callback_tx: mpsc::UnboundedSender<QueuedCallback>,
}

impl PendingTable {
    /// Create an empty table and start its callback-dispatch task.
    #[must_use]
    pub fn new() -> Self {
        let (callback_tx, mut callback_rx) = mpsc::unbounded_channel::<QueuedCallback>();
        tokio::spawn(async move {
            while let Some(queued) = callback_rx.recv().await {
                queued.callback.call(queued.args).await;
            }
        });
        Self {
            entries: Mutex::new(HashMap::new()),
            callback_tx,
        }
    }

    /// Register a result waiter under `id`. Panics in debug builds only via
    /// the invariant that `id` was freshly allocated by the caller; this
    /// does not check for a duplicate and instead overwrites any stale
    /// entry, which cannot happen as long as ids are allocated by a single
    /// monotonically increasing counter.
    pub async fn register_waiter(&self, id: u32) -> oneshot::Receiver<CallResult> {
        let (tx, rx) = oneshot::channel();
        self.entries.lock().await.insert(id, Entry::Waiter(tx));
        rx
    }

    /// Register a callback slot under `id`.
    pub async fn register_callback(&self, id: u32, callback: Arc<dyn Callback>) {
        self.entries.lock().await.insert(id, Entry::Callback(callback));
    }

    /// Resolve the waiter at `id` with a RETURN payload. No-op if `id` is
    /// absent or registered as a callback slot.
    pub async fn resolve_return(&self, id: u32, value: Value) {
        if let Some(Entry::Waiter(tx)) = self.entries.lock().await.remove(&id) {
            let _ = tx.send(Ok(value));
        }
    }

    /// Resolve the waiter at `id` with a remote error. No-op if `id` is
    /// absent or registered as a callback slot.
    pub async fn resolve_error(&self, id: u32, error: RpcError) {
        if let Some(Entry::Waiter(tx)) = self.entries.lock().await.remove(&id) {
            let _ = tx.send(Err(error));
        }
    }

    /// Queue an invocation of the callback registered at `id` with the given
    /// positional arguments. No-op if `id` is absent or registered as a
    /// result waiter. The entry is **not** removed: the same handle may be
    /// invoked again. Queued invocations run in the order they were queued,
    /// one at a time, on this table's dedicated dispatch task.
    pub async fn invoke_callback(&self, id: u32, args: Vec<Value>) {
        let callback = {
            let entries = self.entries.lock().await;
            match entries.get(&id) {
                Some(Entry::Callback(cb)) => Arc::clone(cb),
                _ => return,
            }
        };
        let _ = self.callback_tx.send(QueuedCallback { callback, args });
    }

    /// Remove every id in `ids` from the table. Used once a call settles to
    /// drop the callback slots it registered.
    pub async fn remove_all(&self, ids: &[u32]) {
        let mut entries = self.entries.lock().await;
        for id in ids {
            entries.remove(id);
        }
    }

    /// Complete every pending waiter with `error` and clear the table. Used
    /// when the carrier/engine fails.
    pub async fn fail_all(&self, error_factory: impl Fn() -> RpcError) {
        let mut entries = self.entries.lock().await;
        for (_, entry) in entries.drain() {
            if let Entry::Waiter(tx) = entry {
                let _ = tx.send(Err(error_factory()));
            }
        }
    }

    /// Number of entries currently registered. Exposed for leak-freedom
    /// tests.
    #[must_use = "inspect the returned count"]
    pub async fn len(&self) -> usize { self.entries.lock().await.len() }

    /// Returns `true` if no entries are registered.
    #[must_use = "inspect the returned flag"]
    pub async fn is_empty(&self) -> bool { self.entries.lock().await.is_empty() }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    struct NoopCallback;

    #[async_trait::async_trait]
    impl Callback for NoopCallback {
        async fn call(&self, _args: Vec<Value>) {}
    }

    #[rstest]
    #[tokio::test]
    async fn waiter_resolves_and_is_removed() {
        let table = PendingTable::new();
        let rx = table.register_waiter(1).await;
        table.resolve_return(1, Value::from(5)).await;
        let result = rx.await.expect("waiter resolved").expect("ok result");
        assert_eq!(result, Value::from(5));
        assert!(table.is_empty().await);
    }

    #[rstest]
    #[tokio::test]
    async fn callback_slot_survives_multiple_invocations() {
        let table = PendingTable::new();
        table.register_callback(2, Arc::new(NoopCallback)).await;
        table.invoke_callback(2, vec![Value::from(1)]).await;
        table.invoke_callback(2, vec![Value::from(2)]).await;
        assert_eq!(table.len().await, 1);
    }

    #[rstest]
    #[tokio::test]
    async fn callback_invocations_are_delivered_in_order() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let callback: Arc<dyn Callback> = Arc::new(crate::callback::FnCallback(move |args: Vec<Value>| {
            let seen = Arc::clone(&seen2);
            async move {
                let Some(Value::Integer(n)) = args.into_iter().next() else {
                    panic!("expected an integer");
                };
                seen.lock().expect("lock").push(n.as_u64().expect("u64"));
            }
        }));

        let table = PendingTable::new();
        table.register_callback(5, Arc::clone(&callback)).await;
        for i in 0..20u64 {
            table.invoke_callback(5, vec![Value::from(i)]).await;
        }

        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        let observed = seen.lock().expect("lock").clone();
        assert_eq!(observed, (0..20u64).collect::<Vec<_>>());
    }

    #[rstest]
    #[tokio::test]
    async fn remove_all_drops_callback_slots() {
        let table = PendingTable::new();
        table.register_callback(10, Arc::new(NoopCallback)).await;
        table.register_callback(11, Arc::new(NoopCallback)).await;
        table.remove_all(&[10, 11]).await;
        assert!(table.is_empty().await);
    }

    #[rstest]
    #[tokio::test]
    async fn fail_all_rejects_every_waiter() {
        let table = PendingTable::new();
        let rx1 = table.register_waiter(1).await;
        let rx2 = table.register_waiter(2).await;
        table.fail_all(|| RpcError::carrier("closed")).await;

        assert!(rx1.await.expect("resolved").is_err());
        assert!(rx2.await.expect("resolved").is_err());
        assert!(table.is_empty().await);
    }
}

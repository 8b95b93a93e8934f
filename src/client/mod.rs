//! Client-side call dispatch: allocate call ids, register pending results
//! and outbound callback handles, and resolve waiters as RETURN, ERROR, and
//! CALLBACK messages arrive.

use std::sync::{
    Arc,
    atomic::{AtomicU32, Ordering},
};

use crate::{
    callback::Callback,
    error::{RemoteError, RpcError},
    pending::PendingTable,
    sink::MessageSink,
    value::Value,
    wire::{Message, MessageData, WireArg},
};

/// Chain `name` onto a [`RpcError::Remote`] as its local call site, leaving
/// every other variant untouched.
fn attach_call_site(error: RpcError, name: &str) -> RpcError {
    match error {
        RpcError::Remote(remote) => RpcError::Remote(remote.with_call_site(name)),
        other => other,
    }
}

/// One positional argument to [`ClientEngine::invoke`].
pub enum CallArg {
    /// A plain value.
    Value(Value),
    /// An async callback the server may invoke any number of times before
    /// returning.
    Callback(Arc<dyn Callback>),
}

impl From<Value> for CallArg {
    fn from(value: Value) -> Self { Self::Value(value) }
}

/// Allocates call ids, tracks pending calls, and resolves inbound messages
/// against them.
pub struct ClientEngine {
    next_id: AtomicU32,
    pending: PendingTable,
    sink: Arc<dyn MessageSink>,
}

impl ClientEngine {
    /// Build a client engine that emits CALL/outbound messages through
    /// `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn MessageSink>) -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU32::new(1),
            pending: PendingTable::new(),
            sink,
        })
    }

    fn next_id(&self) -> u32 { self.next_id.fetch_add(1, Ordering::Relaxed) }

    /// Invoke `name` with `args`, awaiting a single result.
    ///
    /// Every [`CallArg::Callback`] is assigned its own handle id from the
    /// same counter as the call id, registered in the pending table as a
    /// callback slot, and removed — along with every other callback handle
    /// this call registered — once the call settles, whether by success,
    /// remote error, or pipeline failure. No callback slot outlives the call
    /// that registered it.
    ///
    /// # Errors
    /// Returns [`RpcError::Remote`] if the procedure threw,
    /// [`RpcError::PipelineClosed`] if the pipeline failed before a reply
    /// arrived, or a carrier error if the CALL itself could not be sent.
    pub async fn invoke(self: &Arc<Self>, name: &str, args: Vec<CallArg>) -> Result<Value, RpcError> {
        let call_id = self.next_id();
        let mut callback_ids = Vec::new();

        let mut wire_args = Vec::with_capacity(args.len() + 1);
        wire_args.push(WireArg::Others(Value::String(name.into())));
        for arg in args {
            match arg {
                CallArg::Value(value) => wire_args.push(WireArg::Others(value)),
                CallArg::Callback(callback) => {
                    let cb_id = self.next_id();
                    self.pending.register_callback(cb_id, callback).await;
                    callback_ids.push(cb_id);
                    wire_args.push(WireArg::Function(cb_id));
                }
            }
        }

        let waiter = self.pending.register_waiter(call_id).await;

        let result = self.run_call(call_id, wire_args, waiter).await;

        self.pending.remove_all(&callback_ids).await;
        result.map_err(|error| attach_call_site(error, name))
    }

    async fn run_call(
        &self,
        call_id: u32,
        wire_args: Vec<WireArg>,
        waiter: tokio::sync::oneshot::Receiver<crate::pending::CallResult>,
    ) -> Result<Value, RpcError> {
        self.sink.send(Message::call(call_id, wire_args)).await?;
        waiter.await.unwrap_or(Err(RpcError::PipelineClosed))?
    }

    /// Handle one inbound message: resolve a waiter, invoke a callback
    /// slot, or drop if `id` is unrecognized.
    pub async fn on_message(&self, message: Message) {
        let id = message.id;
        match message.data {
            MessageData::Return(value) => self.pending.resolve_return(id, value).await,
            MessageData::Error(payload) => {
                let remote = RemoteError {
                    message: payload.message,
                    stack: payload.stack,
                    call_site: None,
                };
                self.pending.resolve_error(id, RpcError::Remote(remote)).await;
            }
            MessageData::Callback(args) => {
                let values = args
                    .into_iter()
                    .map(|arg| match arg {
                        WireArg::Others(value) => value,
                        WireArg::Function(handle) => Value::from(handle),
                    })
                    .collect();
                self.pending.invoke_callback(id, values).await;
            }
            MessageData::Call(_) => {
                // CALLs are never sent to a client; drop defensively.
                tracing::debug!(id, "dropping CALL message at client endpoint");
            }
        }
    }

    /// Reject every pending waiter with `error` and clear the table. Called
    /// when the carrier or frame/message codec fails; the byte stream can
    /// no longer be trusted so the whole pipeline fails at once.
    pub async fn fail(&self, error: RpcError) {
        let message = error.to_string();
        self.pending
            .fail_all(|| RpcError::Carrier(message.clone()))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use rstest::rstest;

    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        sent: StdMutex<Vec<Message>>,
    }

    #[async_trait::async_trait]
    impl MessageSink for RecordingSink {
        async fn send(&self, message: Message) -> Result<(), RpcError> {
            self.sent.lock().expect("lock").push(message);
            Ok(())
        }
    }

    #[rstest]
    #[tokio::test]
    async fn invoke_resolves_on_return() {
        let sink = Arc::new(RecordingSink::default());
        let client = ClientEngine::new(Arc::clone(&sink) as Arc<dyn MessageSink>);

        let client2 = Arc::clone(&client);
        let call = tokio::spawn(async move {
            client2
                .invoke("hello", vec![CallArg::Value(Value::String("x".into()))])
                .await
        });

        // Simulate the server replying once the CALL has been emitted.
        loop {
            if let Some(sent) = sink.sent.lock().expect("lock").first().cloned() {
                client
                    .on_message(Message::return_value(sent.id, Value::from(7)))
                    .await;
                break;
            }
            tokio::task::yield_now().await;
        }

        let result = call.await.expect("join").expect("ok");
        assert_eq!(result, Value::from(7));
    }

    #[rstest]
    #[tokio::test]
    async fn invoke_rejects_on_error_with_remote_stack() {
        let sink = Arc::new(RecordingSink::default());
        let client = ClientEngine::new(Arc::clone(&sink) as Arc<dyn MessageSink>);

        let client2 = Arc::clone(&client);
        let call = tokio::spawn(async move { client2.invoke("boom", vec![]).await });

        loop {
            if let Some(sent) = sink.sent.lock().expect("lock").first().cloned() {
                client
                    .on_message(Message::error(sent.id, "boom".into(), "at fn f()".into()))
                    .await;
                break;
            }
            tokio::task::yield_now().await;
        }

        let err = call.await.expect("join").expect_err("rejected");
        let RpcError::Remote(remote) = err else {
            panic!("expected Remote error");
        };
        assert_eq!(remote.message, "boom");
        assert!(remote.stack.contains('f'));
        let site = remote.call_site.as_ref().expect("local call site attached");
        assert_eq!(site.procedure, "boom");
        use std::error::Error;
        assert!(Error::source(&remote).is_some());
    }

    #[rstest]
    #[tokio::test]
    async fn callback_slots_are_removed_after_completion() {
        let sink = Arc::new(RecordingSink::default());
        let client = ClientEngine::new(Arc::clone(&sink) as Arc<dyn MessageSink>);

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let callback: Arc<dyn Callback> = Arc::new(crate::callback::FnCallback(move |args: Vec<Value>| {
            let seen = Arc::clone(&seen2);
            async move {
                seen.lock().expect("lock").extend(args);
            }
        }));

        let client2 = Arc::clone(&client);
        let call = tokio::spawn(async move {
            client2
                .invoke("callback", vec![CallArg::Callback(callback)])
                .await
        });

        // Wait for the CALL to be sent, then simulate two callback
        // invocations before the RETURN.
        let call_id = loop {
            if let Some(sent) = sink.sent.lock().expect("lock").first().cloned() {
                break sent.id;
            }
            tokio::task::yield_now().await;
        };
        let cb_id = call_id + 1;
        client
            .on_message(Message::callback(cb_id, vec![WireArg::Others(Value::from(1))]))
            .await;
        client
            .on_message(Message::callback(cb_id, vec![WireArg::Others(Value::from(2))]))
            .await;
        client.on_message(Message::return_value(call_id, Value::Nil)).await;

        call.await.expect("join").expect("ok");
        // Give the spawned callback invocations a chance to run.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(seen.lock().expect("lock").len(), 2);
    }

    #[rstest]
    #[tokio::test]
    async fn fail_rejects_outstanding_waiter() {
        let sink = Arc::new(RecordingSink::default());
        let client = ClientEngine::new(Arc::clone(&sink) as Arc<dyn MessageSink>);

        let client2 = Arc::clone(&client);
        let call = tokio::spawn(async move { client2.invoke("slow", vec![]).await });

        loop {
            if !sink.sent.lock().expect("lock").is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        client.fail(RpcError::carrier("closed")).await;

        assert!(call.await.expect("join").is_err());
    }
}

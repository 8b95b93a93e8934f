//! The server-side extension: a named mapping from procedure name to async
//! procedure, plus the callback-proxy machinery that lets a procedure invoke
//! arguments the caller passed as `FUNCTION`-tagged handles.

use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};

use async_trait::async_trait;

use crate::{
    callback::Callback,
    error::RpcError,
    sink::MessageSink,
    value::Value,
    wire::{Message, WireArg},
};

/// [`Callback`] implementation that emits a CALLBACK message through a
/// [`MessageSink`].
pub struct RemoteCallback {
    handle: u32,
    sink: Arc<dyn MessageSink>,
}

impl RemoteCallback {
    /// Build a proxy that emits CALLBACK messages bearing `handle`'s id.
    #[must_use]
    pub const fn new(handle: u32, sink: Arc<dyn MessageSink>) -> Self { Self { handle, sink } }
}

#[async_trait]
impl Callback for RemoteCallback {
    async fn call(&self, args: Vec<Value>) {
        let wire_args = args.into_iter().map(WireArg::Others).collect();
        let message = Message::callback(self.handle, wire_args);
        if let Err(error) = self.sink.send(message).await {
            tracing::warn!(handle = self.handle, %error, "failed to emit callback");
        }
    }
}

/// One materialized positional argument passed to a procedure.
pub enum Arg {
    /// A direct value.
    Value(Value),
    /// A callback proxy for a `FUNCTION`-tagged argument.
    Callback(Arc<dyn Callback>),
}

impl Arg {
    /// Borrow this argument as a value, if it is one.
    #[must_use]
    pub const fn as_value(&self) -> Option<&Value> {
        match self {
            Self::Value(value) => Some(value),
            Self::Callback(_) => None,
        }
    }

    /// Borrow this argument as a callback, if it is one.
    #[must_use]
    pub fn as_callback(&self) -> Option<&Arc<dyn Callback>> {
        match self {
            Self::Callback(cb) => Some(cb),
            Self::Value(_) => None,
        }
    }
}

/// Per-call context the carrier makes available to procedures (the
/// originating HTTP request, the WebSocket's handshake request, ...).
/// Threaded through [`crate::context`] rather than passed as a parameter so
/// existing procedure signatures don't need to change when a new carrier
/// adds context.
pub type CallContext = Option<Value>;

/// The named mapping from procedure name to async procedure that the server
/// engine dispatches CALL messages against.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Invoke the procedure named `name` with materialized `args`.
    ///
    /// # Errors
    /// Returns [`RpcError::NoSuchProcedure`] if no procedure is registered
    /// under `name`, or whatever error the procedure itself returns — both
    /// are reported to the caller as an ERROR message.
    async fn call(&self, name: &str, args: Vec<Arg>) -> Result<Value, RpcError>;
}

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A boxed async procedure: `(args) -> result`.
pub type Procedure = Box<dyn Fn(Vec<Arg>) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;

/// A name → procedure [`Extension`] built from plain async closures.
///
/// This is the common case: "the extension has a procedure with this name,"
/// no other registration or schema required.
#[derive(Default)]
pub struct Router {
    procedures: HashMap<String, Procedure>,
}

impl Router {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register a procedure under `name`.
    #[must_use]
    pub fn procedure<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Arg>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        let boxed: Procedure = Box::new(move |args| Box::pin(handler(args)));
        self.procedures.insert(name.into(), boxed);
        self
    }
}

#[async_trait]
impl Extension for Router {
    async fn call(&self, name: &str, args: Vec<Arg>) -> Result<Value, RpcError> {
        let Some(procedure) = self.procedures.get(name) else {
            return Err(RpcError::NoSuchProcedure(name.to_owned()));
        };
        procedure(args).await
    }
}

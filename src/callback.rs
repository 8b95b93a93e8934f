//! The callback abstraction shared by both engines.
//!
//! On the client side, a [`Callback`] wraps a user-supplied async closure
//! registered under a handle id; the engine invokes it whenever a CALLBACK
//! message bearing that id arrives. On the server side,
//! [`crate::extension::RemoteCallback`] implements the same trait to proxy
//! a caller's callback argument back across the wire. One trait, one shape,
//! both directions — a callback handle is simply an id drawn from the same
//! counter as a call id.

use async_trait::async_trait;

use crate::value::Value;

/// Something invocable with the positional arguments of one CALLBACK
/// message.
#[async_trait]
pub trait Callback: Send + Sync {
    /// Invoke with positional arguments.
    async fn call(&self, args: Vec<Value>);
}

/// Adapts a plain async closure to [`Callback`].
pub struct FnCallback<F>(
    /// The wrapped closure, called with each invocation's positional args.
    pub F,
);

#[async_trait]
impl<F, Fut> Callback for FnCallback<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = ()> + Send,
{
    async fn call(&self, args: Vec<Value>) { (self.0)(args).await; }
}

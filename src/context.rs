//! Per-call context propagation.
//!
//! Carriers that have a notion of "the current request" (the HTTP adapter's
//! request/response pair, the WebSocket adapter's handshake request) make it
//! available to procedures through a scoped-storage slot rather than an
//! explicit parameter. The slot is task-local: a value set before entering
//! an async operation stays visible through that operation's descendants and
//! is invisible to unrelated concurrently-running operations, which is what
//! [`tokio::task_local!`] gives for free — no global variable, no leakage
//! between the concurrent calls a duplex pipeline may be running at once.

use crate::value::Value;

tokio::task_local! {
    static CALL_CONTEXT: Option<Value>;
}

/// Run `fut` with `context` set as the current call's context for its whole
/// async lifetime, including suspension points.
pub async fn scope<F, T>(context: Option<Value>, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    CALL_CONTEXT.scope(context, fut).await
}

/// The current call's context, if one was set and this is running inside a
/// [`scope`] call. Returns `None` both when no context was supplied and when
/// called outside any scope.
#[must_use]
pub fn current() -> Option<Value> {
    CALL_CONTEXT
        .try_with(Clone::clone)
        .ok()
        .flatten()
}

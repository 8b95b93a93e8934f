//! The outbound half of a duplex pipeline's flow-control contract.
//!
//! Both engines emit [`Message`]s through a [`MessageSink`] rather than
//! writing bytes directly. `send` is `async` and only returns once the
//! message-encode/frame-encode/carrier-write chain has accepted it, so
//! backpressure on the carrier propagates back to whoever is emitting —
//! the server's proxy callbacks, the extension's RETURN, the client's CALL.

use async_trait::async_trait;

use crate::{error::RpcError, wire::Message};

/// Accepts outbound [`Message`]s for a single duplex pipeline.
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Encode and emit `message`, awaiting carrier capacity.
    ///
    /// # Errors
    /// Returns a carrier error if the underlying write fails; the caller
    /// should treat this as fatal to the pipeline.
    async fn send(&self, message: Message) -> Result<(), RpcError>;
}

#[async_trait]
impl<T: MessageSink + ?Sized> MessageSink for std::sync::Arc<T> {
    async fn send(&self, message: Message) -> Result<(), RpcError> {
        T::send(self, message).await
    }
}

//! Error types shared across the engine.

use thiserror::Error;

/// The local `invoke` call site a [`RemoteError`] is chained onto, so both
/// the remote stack and the place the call was made from remain visible.
#[derive(Debug, Clone, Error)]
#[error("invoke(\"{procedure}\")")]
pub struct LocalCallSite {
    /// The procedure name passed to `invoke`.
    pub procedure: String,
}

/// A remote procedure's reported failure, carried inside an ERROR message.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RemoteError {
    /// The remote `message` field.
    pub message: String,
    /// The remote stack trace, preserved verbatim for diagnostics.
    pub stack: String,
    /// The local call site, attached once the engine knows which `invoke`
    /// produced this error. `None` until then.
    #[source]
    pub call_site: Option<LocalCallSite>,
}

impl RemoteError {
    /// Attach `procedure` as this error's local call site.
    #[must_use]
    pub fn with_call_site(mut self, procedure: impl Into<String>) -> Self {
        self.call_site = Some(LocalCallSite {
            procedure: procedure.into(),
        });
        self
    }
}

/// Errors surfaced by the client engine, server engine, and duplex pipeline.
///
/// Framing, serialization, and carrier failures are fatal to the pipeline
/// that produced them and reject every outstanding call at once; a
/// [`RpcError::Remote`] only fails the call that produced it.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The remote procedure threw. The local throw site is chained onto this
    /// error so both stacks remain visible.
    #[error("remote procedure error: {0}")]
    Remote(#[from] RemoteError),

    /// A framing error: bad magic, a truncated record, or a failed AEAD
    /// authentication. Fatal to the pipeline.
    #[error("frame error: {0}")]
    Framing(String),

    /// The message codec could not decode a record as a well-formed
    /// `[id, type, data]` triple. Fatal to the pipeline.
    #[error("serialization error: {0}")]
    Serialization(#[from] rmpv::decode::Error),

    /// The message codec could not encode a value.
    #[error("serialization error: {0}")]
    Encode(#[from] rmpv::encode::Error),

    /// The carrier disconnected, timed out, or was cancelled.
    #[error("carrier error: {0}")]
    Carrier(String),

    /// A local usage error, rejected before anything is sent on the wire.
    #[error("usage error: {0}")]
    Usage(String),

    /// The pipeline that owned this call is gone; no response will ever
    /// arrive (see `fail`).
    #[error("pipeline closed")]
    PipelineClosed,

    /// No procedure with this name is registered on the extension.
    #[error("no such procedure: {0}")]
    NoSuchProcedure(String),
}

impl From<std::io::Error> for RpcError {
    fn from(cause: std::io::Error) -> Self { Self::carrier(cause) }
}

impl RpcError {
    /// Build a [`RpcError::Framing`] from a display-able cause.
    #[must_use]
    pub fn framing(cause: impl std::fmt::Display) -> Self { Self::Framing(cause.to_string()) }

    /// Build a [`RpcError::Carrier`] from a display-able cause.
    #[must_use]
    pub fn carrier(cause: impl std::fmt::Display) -> Self { Self::Carrier(cause.to_string()) }
}

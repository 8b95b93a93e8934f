//! Carrier adapter contracts.
//!
//! A carrier is anything that feeds the engine's inbound byte stream with
//! whatever it receives and forwards the engine's outbound byte stream to
//! the wire. [`crate::pipeline`] already accepts any
//! [`tokio::io::AsyncRead`] + [`tokio::io::AsyncWrite`] split stream, which
//! covers a raw TCP connection or an in-process [`tokio::io::duplex`] pair
//! directly. The adapters below — HTTP, WebSocket, message ports — are
//! external collaborators with their own transport-specific framing and
//! reconnection policy; this module documents the contract each one must
//! satisfy rather than implementing them, since building an HTTP server or
//! a WebSocket client is out of scope here.

use crate::server::DispatchMode;

/// The dispatch mode and backpressure contract a carrier adapter commits to.
///
/// Every adapter reduces to: feed bytes in, drain bytes out, and pick a
/// [`DispatchMode`] appropriate to how many calls can be in flight over one
/// connection at once.
pub trait CarrierContract {
    /// The dispatch mode this carrier requires of the server pipeline.
    fn dispatch_mode(&self) -> DispatchMode;
}

/// One request/response exchange: the request body is one CALL's frames,
/// the response body is that call's RETURN/ERROR and any CALLBACKs emitted
/// before it. Because a fresh response body may have been recoalesced by
/// the HTTP stack, implementations should re-run the frame codec's decoder
/// over the full response buffer rather than assume chunk boundaries match
/// what was written.
pub struct HttpCarrierContract;

impl CarrierContract for HttpCarrierContract {
    fn dispatch_mode(&self) -> DispatchMode { DispatchMode::Sequential }
}

/// Exponential backoff parameters for a WebSocket client's reconnect loop.
///
/// The loop waits `initial_delay`, doubling on every failed attempt up to
/// `max_delay`, and resets to `initial_delay` once a connection has stayed
/// up for `stable_after`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub initial_delay: std::time::Duration,
    /// Upper bound on the backoff delay.
    pub max_delay: std::time::Duration,
    /// A connection surviving this long resets the backoff to `initial_delay`.
    pub stable_after: std::time::Duration,
}

impl ReconnectPolicy {
    /// The policy this crate's reference WebSocket adapter would use:
    /// 300ms initial, doubling, capped at 60s, reset after 10s stable.
    #[must_use]
    pub const fn default_policy() -> Self {
        Self {
            initial_delay: std::time::Duration::from_millis(300),
            max_delay: std::time::Duration::from_millis(60_000),
            stable_after: std::time::Duration::from_secs(10),
        }
    }

    /// The delay to use after `attempt` consecutive failures (0-indexed),
    /// doubling each time and saturating at `max_delay`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let scaled = self.initial_delay.as_millis().saturating_mul(u128::from(factor));
        let capped = scaled.min(self.max_delay.as_millis());
        std::time::Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX))
    }
}

/// A persistent duplex carrier (WebSocket, message port): many calls may be
/// in flight at once, and the adapter owns a reconnect loop under the same
/// cancellation token that tears down the pipeline.
pub struct DuplexCarrierContract {
    /// The reconnect backoff this adapter runs, if it reconnects at all
    /// (message ports typically do not).
    pub reconnect: Option<ReconnectPolicy>,
}

impl CarrierContract for DuplexCarrierContract {
    fn dispatch_mode(&self) -> DispatchMode { DispatchMode::Concurrent }
}

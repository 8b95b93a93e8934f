//! A transport-agnostic, bidirectional RPC engine.
//!
//! A server exposes named async procedures on an [`extension::Extension`];
//! a client invokes them by name with [`client::ClientEngine::invoke`] and
//! awaits a single result. A procedure may invoke a caller-supplied
//! [`callback::Callback`] argument any number of times before returning, to
//! deliver progress updates in the reverse direction.
//!
//! The same wire protocol runs over any ordered, reliable byte-oriented
//! carrier — this crate wires it over anything implementing
//! [`tokio::io::AsyncRead`] + [`tokio::io::AsyncWrite`] via
//! [`pipeline::ClientPipeline`] / [`pipeline::ServerPipeline`]; HTTP,
//! WebSocket, and message-port adapters are documented contracts in
//! [`carrier`] rather than implementations.
//!
//! ```text
//! client.invoke(name, args)
//!   -> message codec -> frame codec (encrypt + length-prefix) -> carrier
//!   -> (remote) frame codec (decrypt) -> message codec -> server dispatch
//!   -> extension procedure runs, optionally emitting CALLBACKs in reverse
//!   -> RETURN or ERROR -> client resolves the pending waiter
//! ```

pub mod callback;
pub mod carrier;
pub mod cipher;
pub mod client;
pub mod context;
pub mod error;
pub mod extension;
pub mod logger;
pub mod pending;
pub mod pipeline;
pub mod server;
pub mod sink;
pub mod value;
pub mod wire;

pub use callback::{Callback, FnCallback};
pub use client::{CallArg, ClientEngine};
pub use error::{RemoteError, RpcError};
pub use extension::{Arg, Extension, Router};
pub use pipeline::{ClientPipeline, ServerPipeline};
pub use server::{DispatchMode, ServerEngine};
pub use value::Value;
pub use wire::Message;

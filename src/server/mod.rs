//! Server-side dispatch: route inbound CALL messages to a named procedure on
//! an [`Extension`], materializing `FUNCTION`-tagged arguments into callback
//! proxies and emitting RETURN or ERROR in response.

use std::{sync::Arc, time::Instant};

use crate::{
    context,
    error::RpcError,
    extension::{Arg, Extension, RemoteCallback},
    logger::Logger,
    sink::MessageSink,
    value::{Value, undefined},
    wire::{Message, MessageData, WireArg},
};

/// How the server engine schedules inbound CALL dispatch.
///
/// Sequential mode is required for carriers where one inbound byte stream
/// corresponds to exactly one call's frames (the HTTP adapter); concurrent
/// mode is required for duplex carriers where many calls may be in flight
/// at once (WebSocket, message ports). The mode is a property of the
/// enclosing pipeline, never negotiated on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Dispatch serially; a new CALL is not started until the previous one
    /// returns.
    Sequential,
    /// Dispatch each CALL in its own task, interleaving returns and
    /// callbacks on the outbound stream.
    Concurrent,
}

/// Dispatches inbound CALL messages against an [`Extension`].
pub struct ServerEngine<E> {
    extension: Arc<E>,
    sink: Arc<dyn MessageSink>,
    mode: DispatchMode,
    logger: Arc<dyn Logger>,
}

impl<E: Extension + 'static> ServerEngine<E> {
    /// Build a server engine that dispatches against `extension`, emitting
    /// through `sink`.
    #[must_use]
    pub fn new(extension: Arc<E>, sink: Arc<dyn MessageSink>, mode: DispatchMode) -> Arc<Self> {
        Arc::new(Self {
            extension,
            sink,
            mode,
            logger: Arc::new(crate::logger::TracingLogger),
        })
    }

    /// Replace the logging sink.
    #[must_use]
    pub fn with_logger(self: Arc<Self>, logger: Arc<dyn Logger>) -> Arc<Self> {
        Arc::new(Self {
            extension: Arc::clone(&self.extension),
            sink: Arc::clone(&self.sink),
            mode: self.mode,
            logger,
        })
    }

    /// Handle one inbound message, scheduling it according to [`DispatchMode`].
    pub async fn handle_message(self: &Arc<Self>, message: Message, call_context: Option<Value>) {
        match self.mode {
            DispatchMode::Sequential => self.dispatch(message, call_context).await,
            DispatchMode::Concurrent => {
                let engine = Arc::clone(self);
                tokio::spawn(async move {
                    engine.dispatch(message, call_context).await;
                });
            }
        }
    }

    async fn dispatch(self: &Arc<Self>, message: Message, call_context: Option<Value>) {
        let MessageData::Call(args) = message.data else {
            // RETURN/ERROR are never sent to a server; CALLBACKs for calls a
            // server itself made are consumed by the client engine on this
            // side of the pipeline, not here. A hardened server drops
            // anything that isn't a CALL rather than guessing at intent.
            tracing::debug!(id = message.id, "dropping non-CALL message at server endpoint");
            return;
        };

        let id = message.id;
        let Some((name, rest)) = split_name(args) else {
            self.emit_error(id, "dispatch", "call is missing a procedure name").await;
            return;
        };

        let materialized: Vec<Arg> = rest
            .into_iter()
            .map(|arg| match arg {
                WireArg::Others(value) => Arg::Value(value),
                WireArg::Function(handle) => {
                    Arg::Callback(Arc::new(RemoteCallback::new(handle, Arc::clone(&self.sink))))
                }
            })
            .collect();

        let started = Instant::now();
        let summary = summarize(&materialized);

        let extension = Arc::clone(&self.extension);
        let name_owned = name.clone();
        let result = context::scope(call_context, async move {
            extension.call(&name_owned, materialized).await
        })
        .await;

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        match result {
            Ok(value) => {
                self.logger.log(&format!(
                    "{name}({summary}) -> ok in {elapsed_ms:.2}ms"
                ));
                let reply = Message::return_value(id, value);
                if let Err(error) = self.sink.send(reply).await {
                    tracing::warn!(%error, "failed to emit RETURN");
                }
            }
            Err(error) => {
                self.logger.log(&format!(
                    "{name}({summary}) -> error in {elapsed_ms:.2}ms: {error}"
                ));
                self.emit_error(id, &name, &format!("{error}")).await;
            }
        }
    }

    async fn emit_error(&self, id: u32, procedure: &str, message: &str) {
        let stack = format!("at {procedure} (id={id})");
        let reply = Message::error(id, message.to_owned(), stack);
        if let Err(error) = self.sink.send(reply).await {
            tracing::warn!(%error, "failed to emit ERROR");
        }
    }
}

fn split_name(mut args: Vec<WireArg>) -> Option<(String, Vec<WireArg>)> {
    if args.is_empty() {
        return None;
    }
    let rest = args.split_off(1);
    let WireArg::Others(Value::String(name)) = args.into_iter().next()? else {
        return None;
    };
    Some((name.into_str()?, rest))
}

fn summarize(args: &[Arg]) -> String {
    args.iter()
        .map(|arg| match arg {
            Arg::Callback(_) => "Function()".to_owned(),
            Arg::Value(Value::Binary(bytes)) => format!("Uint8Array({})", bytes.len()),
            Arg::Value(value) => value.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build an ERROR-carrying RETURN value for procedures that genuinely have
/// no result (the wire `undefined` marker, distinct from `null`).
#[must_use]
pub fn no_return() -> Value { undefined() }

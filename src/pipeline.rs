//! Duplex pipeline: pairs one carrier connection to one engine.
//!
//! A pipeline wires two byte streams through the frame and message codecs:
//! `raw bytes -> frame-decode -> message-decode -> engine` inbound, and
//! `engine -> message-encode -> frame-encode -> raw bytes` outbound. Cipher
//! state, the pending-call table (client side), and the framing carry
//! buffer all live for exactly the lifetime of one pipeline; on carrier
//! close, outstanding client waiters fail and callback slots are dropped.
//!
//! Carriers are anything implementing [`tokio::io::AsyncRead`] +
//! [`tokio::io::AsyncWrite`] — see [`crate::carrier`] for the adapter
//! contracts this crate treats as external collaborators.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::{
    io::{AsyncRead, AsyncWrite, split},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::{
    cipher::Cipher,
    client::ClientEngine,
    error::RpcError,
    extension::Extension,
    logger::Logger,
    server::{DispatchMode, ServerEngine},
    sink::MessageSink,
    value::Value,
    wire::{Message, frame::FrameCodec},
};

const OUTBOUND_CAPACITY: usize = 64;

/// A [`MessageSink`] backed by a bounded channel drained by the pipeline's
/// outbound task. The channel's capacity is the backpressure contract: once
/// it is full, `send` suspends until the outbound task has written enough
/// frames to make room, which is how a slow carrier is felt all the way
/// back at the engine doing the emitting.
struct ChannelSink {
    tx: mpsc::Sender<Message>,
}

#[async_trait::async_trait]
impl MessageSink for ChannelSink {
    async fn send(&self, message: Message) -> Result<(), RpcError> {
        self.tx
            .send(message)
            .await
            .map_err(|_| RpcError::carrier("pipeline outbound channel closed"))
    }
}

fn spawn_outbound<W>(writer: W, cipher: Option<Arc<Cipher>>) -> (Arc<dyn MessageSink>, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_CAPACITY);
    let codec = match cipher {
        Some(cipher) => FrameCodec::with_cipher(cipher),
        None => FrameCodec::new(),
    };
    let mut framed = FramedWrite::new(writer, codec);

    let handle = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let bytes = match message.encode() {
                Ok(bytes) => bytes,
                Err(error) => {
                    tracing::warn!(%error, "failed to encode outbound message");
                    continue;
                }
            };
            if let Err(error) = framed.send(bytes).await {
                tracing::warn!(%error, "outbound carrier write failed; closing pipeline");
                break;
            }
        }
    });

    (Arc::new(ChannelSink { tx }), handle)
}

/// A client-side duplex pipeline: a carrier bound to a [`ClientEngine`].
pub struct ClientPipeline {
    engine: Arc<ClientEngine>,
    inbound: JoinHandle<()>,
    outbound: JoinHandle<()>,
}

impl ClientPipeline {
    /// Bind `carrier` to a fresh client engine.
    ///
    /// `rpc_key` is the shared pre-key; an empty string disables encryption
    /// for this pipeline.
    #[must_use]
    pub fn connect<S>(carrier: S, rpc_key: &str) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let cipher = Cipher::derive(rpc_key).map(Arc::new);
        let (reader, writer) = split(carrier);
        let (sink, outbound) = spawn_outbound(writer, cipher.clone());
        let engine = ClientEngine::new(sink);

        let codec = match cipher {
            Some(cipher) => FrameCodec::with_cipher(cipher),
            None => FrameCodec::new(),
        };
        let mut framed = FramedRead::new(reader, codec);
        let inbound_engine = Arc::clone(&engine);
        let inbound = tokio::spawn(async move {
            loop {
                match framed.next().await {
                    Some(Ok(record)) => match Message::decode(&record) {
                        Ok(message) => inbound_engine.on_message(message).await,
                        Err(error) => {
                            inbound_engine.fail(error).await;
                            break;
                        }
                    },
                    Some(Err(error)) => {
                        inbound_engine.fail(error).await;
                        break;
                    }
                    None => {
                        inbound_engine.fail(RpcError::carrier("carrier closed")).await;
                        break;
                    }
                }
            }
        });

        Self {
            engine,
            inbound,
            outbound,
        }
    }

    /// The bound client engine: call `.invoke(name, args)` on it.
    #[must_use]
    pub fn engine(&self) -> &Arc<ClientEngine> { &self.engine }

    /// Abort both directions of the pipeline. Outstanding waiters are not
    /// explicitly failed here; dropping the outbound sender and aborting the
    /// inbound task is enough to unblock anything awaiting carrier I/O, and
    /// the next `invoke` will observe a closed channel.
    pub fn abort(&self) {
        self.inbound.abort();
        self.outbound.abort();
    }
}

/// A server-side duplex pipeline: a carrier bound to a [`ServerEngine`]
/// dispatching against `extension`.
pub struct ServerPipeline {
    inbound: JoinHandle<()>,
    outbound: JoinHandle<()>,
}

impl ServerPipeline {
    /// Serve `carrier` against `extension` until the carrier closes.
    ///
    /// `call_context` is the per-connection context value (e.g. the
    /// originating request) that procedures observe through
    /// [`crate::context::current`]; pass `None` for carriers with no
    /// ambient context.
    ///
    /// `logger` overrides the engine's default `tracing`-backed call log
    /// (see [`ServerEngine::with_logger`]); pass `None` to keep the default.
    #[must_use]
    pub fn serve<S, E>(
        carrier: S,
        extension: Arc<E>,
        rpc_key: &str,
        mode: DispatchMode,
        call_context: Option<Value>,
        logger: Option<Arc<dyn Logger>>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
        E: Extension + 'static,
    {
        let cipher = Cipher::derive(rpc_key).map(Arc::new);
        let (reader, writer) = split(carrier);
        let (sink, outbound) = spawn_outbound(writer, cipher.clone());
        let engine = ServerEngine::new(extension, sink, mode);
        let engine = match logger {
            Some(logger) => engine.with_logger(logger),
            None => engine,
        };

        let codec = match cipher {
            Some(cipher) => FrameCodec::with_cipher(cipher),
            None => FrameCodec::new(),
        };
        let mut framed = FramedRead::new(reader, codec);
        let inbound = tokio::spawn(async move {
            loop {
                match framed.next().await {
                    Some(Ok(record)) => match Message::decode(&record) {
                        Ok(message) => engine.handle_message(message, call_context.clone()).await,
                        Err(error) => {
                            tracing::warn!(%error, "inbound framing error; closing pipeline");
                            break;
                        }
                    },
                    Some(Err(error)) => {
                        tracing::warn!(%error, "inbound carrier error; closing pipeline");
                        break;
                    }
                    None => break,
                }
            }
        });

        Self { inbound, outbound }
    }

    /// Abort both directions of the pipeline.
    pub fn abort(&self) {
        self.inbound.abort();
        self.outbound.abort();
    }

    /// Wait for the inbound loop to finish (carrier closed or fatal error).
    ///
    /// # Panics
    /// Propagates a panic from the inbound task, if one occurred.
    pub async fn closed(self) {
        let _ = self.inbound.await;
        self.outbound.abort();
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tokio::io::duplex;

    use super::*;
    use crate::{client::CallArg, extension::Arg, extension::Router};

    #[rstest]
    #[tokio::test]
    async fn client_and_server_pipelines_exchange_a_call() {
        let (client_io, server_io) = duplex(4096);

        let router = Arc::new(Router::new().procedure("hello", |args| async move {
            let Some(Value::String(name)) = args.first().and_then(Arg::as_value) else {
                return Err(RpcError::Usage("bad args".into()));
            };
            Ok(Value::String(format!("hello {name}").into()))
        }));
        let _server = ServerPipeline::serve(server_io, router, "", DispatchMode::Concurrent, None, None);

        let client = ClientPipeline::connect(client_io, "");
        let result = client
            .engine()
            .invoke("hello", vec![CallArg::Value(Value::String("asdfghjkl".into()))])
            .await
            .expect("ok");

        assert_eq!(result, Value::String("hello asdfghjkl".into()));
    }

    #[rstest]
    #[tokio::test]
    async fn encrypted_pipeline_round_trips() {
        let (client_io, server_io) = duplex(4096);

        let router = Arc::new(Router::new().procedure("echo", |args| async move {
            Ok(args.into_iter().next().and_then(|a| a.as_value().cloned()).unwrap_or(Value::Nil))
        }));
        let _server =
            ServerPipeline::serve(server_io, router, "shared-secret", DispatchMode::Sequential, None, None);

        let client = ClientPipeline::connect(client_io, "shared-secret");
        let result = client
            .engine()
            .invoke("echo", vec![CallArg::Value(Value::from(123))])
            .await
            .expect("ok");

        assert_eq!(result, Value::from(123));
    }

    #[rstest]
    #[tokio::test]
    async fn serve_uses_the_supplied_logger() {
        let (client_io, server_io) = duplex(4096);

        let router = Arc::new(Router::new().procedure("hello", |_args| async move { Ok(Value::Nil) }));
        let lines = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recording = Arc::clone(&lines);
        let logger: Arc<dyn Logger> = Arc::new(move |line: &str| {
            recording.lock().expect("lock").push(line.to_owned());
        });
        let _server = ServerPipeline::serve(
            server_io,
            router,
            "",
            DispatchMode::Concurrent,
            None,
            Some(logger),
        );

        let client = ClientPipeline::connect(client_io, "");
        client.engine().invoke("hello", vec![]).await.expect("ok");

        assert!(!lines.lock().expect("lock").is_empty());
    }
}

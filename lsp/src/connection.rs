//! Bidirectional JSON-RPC connection over a pair of byte streams.
//!
//! A [`Connection`] owns a reader task and a writer task. Outgoing requests
//! are correlated to responses by id through the pending map; incoming
//! notifications and server-initiated requests go to the [`Handlers`]
//! registered at construction.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::codec::{FrameReader, FrameWriter};
use crate::error::RpcError;
use crate::protocol::{self, Message, Notification, Request, RequestId};

/// Timeout applied by [`Connection::request`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type Outcome = Result<Value, RpcError>;
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Outcome>>>>;

type NotificationFn = dyn Fn(&str, Option<Value>) + Send + Sync;
type RequestFn = dyn Fn(Option<Value>) -> BoxFuture<'static, Value> + Send + Sync;

enum WriterCommand {
    Send(Value),
    Shutdown,
}

/// Callbacks for traffic the remote side initiates.
#[derive(Default)]
pub struct Handlers {
    notification: Option<Box<NotificationFn>>,
    requests: HashMap<String, Box<RequestFn>>,
}

impl Handlers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Receives every incoming notification.
    #[must_use]
    pub fn on_notification<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str, Option<Value>) + Send + Sync + 'static,
    {
        self.notification = Some(Box::new(handler));
        self
    }

    /// Answers server-initiated requests for `method`. Requests without a
    /// handler are answered with `null`.
    #[must_use]
    pub fn on_request<F, Fut>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Value> + Send + 'static,
    {
        self.requests.insert(
            method.to_string(),
            Box::new(move |params| Box::pin(handler(params))),
        );
        self
    }
}

/// Lock the pending map, recovering from poisoning (entries are plain senders).
fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Outcome>>> {
    pending
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn reject_all(pending: &PendingMap) {
    let drained: Vec<_> = lock(pending).drain().collect();
    for (_, tx) in drained {
        let _ = tx.send(Err(RpcError::Disposed));
    }
}

/// Removes a pending entry when the awaiting caller goes away, whether it
/// finished, timed out, or was cancelled.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.id);
    }
}

pub struct Connection {
    name: String,
    outgoing: mpsc::UnboundedSender<WriterCommand>,
    pending: PendingMap,
    next_id: AtomicU64,
    closed: Arc<watch::Sender<bool>>,
    reader_handle: JoinHandle<()>,
    #[allow(dead_code)]
    writer_handle: JoinHandle<()>,
}

impl Connection {
    /// Wire a connection over `reader`/`writer` and start its IO tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new<R, W>(name: impl Into<String>, reader: R, writer: W, handlers: Handlers) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let name = name.into();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(watch::Sender::new(false));

        let (outgoing, mut writer_rx) = mpsc::unbounded_channel::<WriterCommand>();
        let writer_name = name.clone();
        let writer_handle = tokio::spawn(async move {
            let mut writer = FrameWriter::new(writer);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.write_frame(&frame).await {
                            tracing::warn!("LSP write error for '{writer_name}': {e:#}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => {
                        let _ = writer.shutdown().await;
                        break;
                    }
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_closed = closed.clone();
        let reader_outgoing = outgoing.clone();
        let reader_name = name.clone();
        let reader_handle = tokio::spawn(async move {
            let mut reader = FrameReader::new(reader);
            loop {
                match reader.read_frame().await {
                    Ok(Some(frame)) => {
                        let Some(message) = Message::from_value(frame) else {
                            tracing::trace!("Ignoring malformed JSON-RPC frame from '{reader_name}'");
                            continue;
                        };
                        dispatch(
                            message,
                            &reader_pending,
                            &handlers,
                            &reader_outgoing,
                            &reader_name,
                        );
                    }
                    Ok(None) => {
                        tracing::debug!("LSP '{reader_name}' closed its output");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("LSP reader error for '{reader_name}': {e:#}");
                        break;
                    }
                }
            }
            // Flag first so callers that insert after the drain observe it.
            reader_closed.send_replace(true);
            reject_all(&reader_pending);
        });

        Self {
            name,
            outgoing,
            pending,
            next_id: AtomicU64::new(1),
            closed,
            reader_handle,
            writer_handle,
        }
    }

    /// Send a request with the default 10 s timeout.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        self.send_request(method, params, DEFAULT_REQUEST_TIMEOUT)
            .await
    }

    /// Send a request and await its response.
    ///
    /// Resolves exactly once: with the remote result, or with
    /// [`RpcError::Timeout`], [`RpcError::Remote`] or [`RpcError::Disposed`].
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        if self.is_closed() {
            return Err(RpcError::Disposed);
        }

        let frame = serde_json::to_value(Request::new(id, method, params))
            .map_err(|_| RpcError::Disposed)?;
        if self.outgoing.send(WriterCommand::Send(frame)).is_err() {
            return Err(RpcError::Disposed);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RpcError::Disposed),
            Err(_) => {
                tracing::debug!("LSP '{}' request '{method}' (id {id}) timed out", self.name);
                Err(RpcError::Timeout {
                    method: method.to_string(),
                    timeout,
                })
            }
        }
    }

    /// Fire-and-forget notification.
    pub fn send_notification(&self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        if self.is_closed() {
            return Err(RpcError::Disposed);
        }
        let frame = serde_json::to_value(Notification::new(method, params))
            .map_err(|_| RpcError::Disposed)?;
        self.outgoing
            .send(WriterCommand::Send(frame))
            .map_err(|_| RpcError::Disposed)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once the connection is closed, by disposal or by the peer.
    pub async fn closed(&self) {
        let mut rx = self.subscribe_closed();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Watch on the closed flag that outlives borrows of the connection.
    #[must_use]
    pub fn subscribe_closed(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    /// Reject all in-flight requests and stop the IO tasks.
    ///
    /// Frames queued before this call are still written. Idempotent.
    pub fn dispose(&self) {
        self.closed.send_replace(true);
        reject_all(&self.pending);
        let _ = self.outgoing.send(WriterCommand::Shutdown);
        self.reader_handle.abort();
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn dispatch(
    message: Message,
    pending: &PendingMap,
    handlers: &Handlers,
    outgoing: &mpsc::UnboundedSender<WriterCommand>,
    name: &str,
) {
    match message {
        Message::Response { id, result } => {
            let RequestId::Number(n) = id else {
                tracing::trace!("Ignoring response with non-numeric id from '{name}'");
                return;
            };
            let Ok(n) = u64::try_from(n) else { return };
            let sender = lock(pending).remove(&n);
            match sender {
                Some(tx) => {
                    let outcome = result.map_err(|e| RpcError::Remote {
                        code: e.code,
                        message: e.message,
                    });
                    let _ = tx.send(outcome);
                }
                None => tracing::trace!("Ignoring response for unknown id {n} from '{name}'"),
            }
        }
        Message::Request { id, method, params } => {
            // The remote side blocks until it gets a reply, so every request
            // is answered.
            match handlers.requests.get(&method) {
                Some(handler) => {
                    tracing::debug!("LSP '{name}' sent request: {method}");
                    let reply = handler(params);
                    let outgoing = outgoing.clone();
                    tokio::spawn(async move {
                        let result = reply.await;
                        let _ = outgoing.send(WriterCommand::Send(protocol::response(&id, result)));
                    });
                }
                None => {
                    tracing::debug!("LSP '{name}' sent unhandled request {method}, replying null");
                    let _ = outgoing.send(WriterCommand::Send(protocol::response(&id, Value::Null)));
                }
            }
        }
        Message::Notification { method, params } => match &handlers.notification {
            Some(handler) => handler(&method, params),
            None => tracing::trace!("Ignoring notification from '{name}': {method}"),
        },
    }
}

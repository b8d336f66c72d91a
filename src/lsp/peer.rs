// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! JSON-RPC peer bound to one LSP child process.
//!
//! One reader task per peer decodes framed messages and dispatches them:
//! responses complete pending call slots, notifications run their
//! registered handler on the dispatcher task, and server-to-client
//! requests receive a generic `null` reply so the server is never
//! blocked waiting on a capability the bridge does not implement.
//!
//! All outbound traffic is funneled through a single mutex-guarded
//! stdin handle, so messages written to one server are totally ordered.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, trace, warn};

use super::protocol::{
    self, NotificationMessage, RequestId, RequestMessage, ResponseMessage,
};
use crate::error::{BridgeError, Result};

/// Handler invoked on the dispatcher task for a server notification.
///
/// Handlers must not block the dispatcher indefinitely; long work is
/// offloaded with `tokio::spawn` inside the handler.
pub type NotificationHandler =
    Box<dyn Fn(serde_json::Value) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Hook invoked once when the reader task exits, before pending calls
/// are failed. The session uses it to transition to `Dead` and drop its
/// document and diagnostic state.
pub type CloseHandler =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Registry of `(method, handler)` pairs, populated before the peer is
/// spawned so no notification can race handler registration.
#[derive(Default)]
pub struct NotificationHandlers {
    handlers: HashMap<String, NotificationHandler>,
}

impl NotificationHandlers {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a notification method.
    pub fn on<F, Fut>(&mut self, method: &str, handler: F)
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handlers
            .insert(method.to_string(), Box::new(move |v| Box::pin(handler(v))));
    }
}

/// A concurrent JSON-RPC 2.0 peer over a child process's stdio.
pub struct JsonRpcPeer {
    next_id: AtomicI64,
    stdin: Arc<Mutex<ChildStdin>>,
    pending: Arc<Mutex<HashMap<i64, oneshot::Sender<ResponseMessage>>>>,
    alive: Arc<AtomicBool>,
    _reader: tokio::task::JoinHandle<()>,
}

impl JsonRpcPeer {
    /// Attaches a peer to the child's streams and starts the reader task.
    ///
    /// `handlers` is consumed: the notification registry is fixed for the
    /// life of the connection. `on_close` runs exactly once when the
    /// transport closes, before pending calls are failed.
    #[must_use]
    pub fn spawn(
        stdin: ChildStdin,
        stdout: ChildStdout,
        handlers: NotificationHandlers,
        on_close: CloseHandler,
    ) -> Self {
        let stdin = Arc::new(Mutex::new(stdin));
        let pending: Arc<Mutex<HashMap<i64, oneshot::Sender<ResponseMessage>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        let reader = tokio::spawn(Self::reader_task(
            stdin.clone(),
            stdout,
            pending.clone(),
            alive.clone(),
            handlers,
            on_close,
        ));

        Self {
            next_id: AtomicI64::new(1),
            stdin,
            pending,
            alive,
            _reader: reader,
        }
    }

    /// Returns true while the transport is open.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Sends a request and waits for the matching response.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::TransportClosed`] when the connection is gone,
    ///   before or during the wait.
    /// - [`BridgeError::Timeout`] when no response arrives within
    ///   `timeout`; the pending slot is removed so a late response is
    ///   dropped by the dispatcher.
    /// - [`BridgeError::Rpc`] when the server answers with an error.
    pub async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        if !self.is_alive() {
            return Err(BridgeError::TransportClosed);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = RequestMessage {
            jsonrpc: "2.0".to_string(),
            id: RequestId::Number(id),
            method: method.to_string(),
            params,
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.write_message(&request).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let response = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(BridgeError::TransportClosed),
            Err(_) => {
                // Abandon the slot; the dispatcher drops any late result.
                self.pending.lock().await.remove(&id);
                return Err(BridgeError::Timeout {
                    method: method.to_string(),
                    timeout,
                });
            }
        };

        if let Some(error) = response.error {
            return Err(BridgeError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }

    /// Sends a notification; no reply is expected.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::TransportClosed`] when the connection is gone.
    pub async fn notify(&self, method: &str, params: serde_json::Value) -> Result<()> {
        if !self.is_alive() {
            return Err(BridgeError::TransportClosed);
        }

        let notification = NotificationMessage {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        };
        self.write_message(&notification).await
    }

    /// Serializes a message, frames it, and writes it to the child's stdin.
    async fn write_message<T: serde::Serialize>(&self, message: &T) -> Result<()> {
        let body = serde_json::to_string(message)
            .map_err(|e| BridgeError::Protocol(format!("failed to encode message: {e}")))?;

        trace!("sending: {}", body);

        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(&protocol::encode_frame(&body))
            .await
            .map_err(|_| BridgeError::TransportClosed)?;
        stdin.flush().await.map_err(|_| BridgeError::TransportClosed)
    }

    /// The dispatch loop: reads framed messages and routes each one.
    async fn reader_task(
        stdin: Arc<Mutex<ChildStdin>>,
        stdout: ChildStdout,
        pending: Arc<Mutex<HashMap<i64, oneshot::Sender<ResponseMessage>>>>,
        alive: Arc<AtomicBool>,
        handlers: NotificationHandlers,
        on_close: CloseHandler,
    ) {
        let mut reader = BufReader::new(stdout);
        let mut buffer = bytes::BytesMut::with_capacity(8192);

        'outer: loop {
            let mut chunk = [0u8; 4096];
            match reader.read(&mut chunk).await {
                Ok(0) => {
                    if buffer.is_empty() {
                        debug!("server closed its stdout at a message boundary");
                    } else {
                        warn!("server closed its stdout mid-message ({} bytes pending)", buffer.len());
                    }
                    break;
                }
                Ok(n) => buffer.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    warn!("error reading from server stdout: {}", e);
                    break;
                }
            }

            loop {
                let message = match protocol::try_parse_message(&mut buffer) {
                    Ok(Some(message)) => message,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("fatal framing error: {}", e);
                        break 'outer;
                    }
                };

                trace!("received: {}", message);

                let value: serde_json::Value = match serde_json::from_str(&message) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("fatal JSON error in message body: {}", e);
                        break 'outer;
                    }
                };

                Self::dispatch(&stdin, &pending, &handlers, value).await;
            }
        }

        alive.store(false, Ordering::SeqCst);
        on_close().await;

        // Dropping the senders wakes every waiting caller with a closed
        // channel, which surfaces as TransportClosed.
        pending.lock().await.clear();
        debug!("dispatcher exiting, transport closed");
    }

    /// Routes one decoded message to the right place.
    async fn dispatch(
        stdin: &Arc<Mutex<ChildStdin>>,
        pending: &Arc<Mutex<HashMap<i64, oneshot::Sender<ResponseMessage>>>>,
        handlers: &NotificationHandlers,
        value: serde_json::Value,
    ) {
        let has_method = value.get("method").is_some();
        let has_id = value.get("id").is_some();

        if has_method && has_id {
            // Server-to-client request: answer null so the server never
            // blocks on a client capability we don't provide.
            let method = value
                .get("method")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string();
            let id: Option<RequestId> = value
                .get("id")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok());

            debug!("answering server request '{}' with null", method);

            let response = ResponseMessage {
                jsonrpc: "2.0".to_string(),
                id,
                result: Some(serde_json::Value::Null),
                error: None,
            };
            if let Ok(body) = serde_json::to_string(&response) {
                let mut stdin = stdin.lock().await;
                if let Err(e) = stdin.write_all(&protocol::encode_frame(&body)).await {
                    warn!("failed to answer server request: {}", e);
                } else if let Err(e) = stdin.flush().await {
                    warn!("failed to flush server request answer: {}", e);
                }
            }
        } else if has_method {
            let Ok(notification) = serde_json::from_value::<NotificationMessage>(value) else {
                warn!("undecodable notification dropped");
                return;
            };

            if let Some(handler) = handlers.handlers.get(&notification.method) {
                handler(notification.params).await;
            } else {
                trace!("no handler for notification '{}', dropped", notification.method);
            }
        } else if has_id {
            let Ok(response) = serde_json::from_value::<ResponseMessage>(value) else {
                warn!("undecodable response dropped");
                return;
            };
            let Some(RequestId::Number(id)) = response.id else {
                warn!("response with non-numeric id dropped: {:?}", response.id);
                return;
            };

            // The dispatcher owns removal; an abandoned slot just means
            // the receiver is gone and the send result is ignored.
            if let Some(sender) = pending.lock().await.remove(&id) {
                let _ = sender.send(response);
            } else {
                debug!("late response for request {} dropped", id);
            }
        } else {
            warn!("message with neither method nor id dropped");
        }
    }
}

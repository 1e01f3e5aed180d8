//! Request/response correlation by JSON-RPC id.

use std::{
    collections::HashMap,
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    tokio::sync::oneshot,
    tracing::{debug, trace},
};

use crate::{
    error::{McpError, Result},
    types::JsonRpcMessage,
};

/// Message used when a server reports an error without one.
const FALLBACK_ERROR: &str = "tool call failed";

type Reply = Result<serde_json::Value>;

/// Tracks outstanding requests and hands each response to exactly one waiter.
///
/// Ids come from a per-instance counter starting at 1, so they are unique
/// for the lifetime of one transport.
pub struct Correlator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Start waiting for the response to `id`.
    pub fn register(&self, id: u64) -> Result<oneshot::Receiver<Reply>> {
        let mut pending = self.lock();
        if pending.contains_key(&id) {
            return Err(McpError::DuplicateRequestId(id));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(id, tx);
        Ok(rx)
    }

    /// Forget a pending request, e.g. because its write failed.
    pub fn cancel(&self, id: u64) -> bool {
        self.lock().remove(&id).is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    /// Route one output line.
    ///
    /// Returns `None` for lines that are not JSON-RPC envelopes; those are
    /// plain diagnostics and never an error. Parsed messages are returned
    /// whether or not they matched a pending request.
    pub fn dispatch(&self, line: &str) -> Option<JsonRpcMessage> {
        let message: JsonRpcMessage = match serde_json::from_str(line) {
            Ok(message) => message,
            Err(e) => {
                trace!(error = %e, "non-JSON output line");
                return None;
            },
        };

        let Some(id) = message.id else {
            return Some(message);
        };
        if message.result.is_none() && message.error.is_none() {
            return Some(message);
        }

        let Some(tx) = self.lock().remove(&id) else {
            debug!(id, "response for unknown or expired request id");
            return Some(message);
        };

        let reply = match (&message.result, &message.error) {
            (Some(result), _) => Ok(result.clone()),
            (None, Some(err)) if !err.message.is_empty() => Err(McpError::Remote(err.message.clone())),
            (None, _) => Err(McpError::Remote(FALLBACK_ERROR.into())),
        };
        // The waiter may have given up already; nothing to deliver then.
        let _ = tx.send(reply);

        Some(message)
    }

    /// Wait for the response to `id`, giving up after `after`.
    ///
    /// On timeout the entry is removed, so a late response only reaches the
    /// generic message observer.
    pub async fn wait(
        &self,
        id: u64,
        rx: oneshot::Receiver<Reply>,
        after: Duration,
    ) -> Result<serde_json::Value> {
        match tokio::time::timeout(after, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(McpError::TransportClosed),
            Err(_) => {
                self.cancel(id);
                debug!(id, after_ms = after.as_millis() as u64, "request timed out");
                Err(McpError::Timeout { id, after })
            },
        }
    }

    /// Fail every outstanding request. Returns how many were pending.
    pub fn reject_all(&self, make_error: impl Fn() -> McpError) -> usize {
        let drained: Vec<_> = self.lock().drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(make_error()));
        }
        count
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Reply>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

//! Pending-request table: in-flight request id → one-shot delivery slot.
//!
//! An entry exists from just before a request is written until exactly one
//! of {response delivered, connection-closed error delivered, caller gave
//! up} removes it. The `closed` flag lives under the same lock as the map, so
//! nothing can register after [`PendingTable::fail_all`] drained it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use ledgerrpc_core::error::RpcError;
use ledgerrpc_core::request::JsonRpcResponse;

/// What a waiting caller receives.
pub(crate) type Delivery = Result<JsonRpcResponse, RpcError>;

#[derive(Default)]
struct PendingState {
    closed: bool,
    entries: HashMap<u64, oneshot::Sender<Delivery>>,
}

/// Shared, thread-safe pending-request table.
#[derive(Clone, Default)]
pub(crate) struct PendingTable {
    inner: Arc<Mutex<PendingState>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `id` and return the receiving half of its delivery slot.
    pub fn register(&self, id: u64) -> Result<oneshot::Receiver<Delivery>, RpcError> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(RpcError::network("connection closed"));
        }
        if state.entries.contains_key(&id) {
            return Err(RpcError::InvalidRequest(format!("request id {id} already in flight")));
        }
        let (tx, rx) = oneshot::channel();
        state.entries.insert(id, tx);
        Ok(rx)
    }

    /// Drop the entry for `id`. Returns `true` if it was still present.
    pub fn remove(&self, id: u64) -> bool {
        self.inner.lock().entries.remove(&id).is_some()
    }

    /// Hand `response` to the caller waiting on its id.
    ///
    /// Returns `false` for unknown ids (stray or duplicate responses) and for
    /// callers that already gave up; neither blocks.
    pub fn deliver(&self, response: JsonRpcResponse) -> bool {
        let Some(id) = response.id.as_u64() else {
            return false;
        };
        let Some(tx) = self.inner.lock().entries.remove(&id) else {
            return false;
        };
        tx.send(Ok(response)).is_ok()
    }

    /// Close the table and fail every waiting caller with a network error.
    ///
    /// Returns the number of entries drained; zero on every call after the
    /// first.
    pub fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<_> = {
            let mut state = self.inner.lock();
            state.closed = true;
            state.entries.drain().collect()
        };
        let count = drained.len();
        for (id, tx) in drained {
            if tx.send(Err(RpcError::network(reason.to_string()))).is_err() {
                tracing::trace!(id, "caller already gone during cleanup");
            }
        }
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

/// Removes its entry when the waiting call finishes or is dropped.
pub(crate) struct PendingGuard<'a> {
    table: &'a PendingTable,
    id: u64,
}

impl<'a> PendingGuard<'a> {
    pub fn new(table: &'a PendingTable, id: u64) -> Self {
        Self { table, id }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.table.remove(self.id);
    }
}

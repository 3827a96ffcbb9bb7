//! Per-session bookkeeping of open connections and streams.

use crate::error::Result;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A resource the registry can close on shutdown.
pub(crate) trait Closeable: Send + Sync {
    /// Close the resource. Must be idempotent.
    fn force_close(&self) -> Result<()>;
}

type Entries = Mutex<BTreeMap<u64, Arc<dyn Closeable>>>;

/// Open connections and streams of one session.
///
/// Registration and deregistration are safe from any thread. Resources
/// deregister themselves when they close, so the registry only ever holds
/// what is still open.
#[derive(Default)]
pub struct ResourceRegistry {
    connections: Entries,
    streams: Entries,
    next_id: AtomicU64,
}

impl ResourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            ..Self::default()
        }
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn register_connection(&self, id: u64, connection: Arc<dyn Closeable>) {
        self.connections.lock().insert(id, connection);
    }

    pub(crate) fn deregister_connection(&self, id: u64) -> bool {
        self.connections.lock().remove(&id).is_some()
    }

    pub(crate) fn register_stream(&self, id: u64, stream: Arc<dyn Closeable>) {
        self.streams.lock().insert(id, stream);
    }

    pub(crate) fn deregister_stream(&self, id: u64) -> bool {
        self.streams.lock().remove(&id).is_some()
    }

    /// Number of open connections owned by the session.
    pub fn open_connections(&self) -> usize {
        self.connections.lock().len()
    }

    /// Number of open streams.
    pub fn open_streams(&self) -> usize {
        self.streams.lock().len()
    }

    /// Close every open stream, then every open connection.
    ///
    /// Streams go first because they release their cursor and statement (and
    /// any connection they own) before reporting completion. Each close is
    /// attempted even if an earlier one failed; the first failure is returned.
    pub fn force_close_all(&self) -> Result<()> {
        let mut first_error = None;

        let streams = std::mem::take(&mut *self.streams.lock());
        if !streams.is_empty() {
            tracing::debug!(count = streams.len(), "Force-closing open streams");
        }
        for (id, stream) in streams {
            if let Err(e) = stream.force_close() {
                tracing::warn!(stream = id, error = %e, "Failed to force-close stream");
                first_error.get_or_insert(e);
            }
        }

        let connections = std::mem::take(&mut *self.connections.lock());
        if !connections.is_empty() {
            tracing::debug!(count = connections.len(), "Force-closing open connections");
        }
        for (id, connection) in connections {
            if let Err(e) = connection.force_close() {
                tracing::warn!(connection = id, error = %e, "Failed to force-close connection");
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

impl std::fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("open_connections", &self.open_connections())
            .field("open_streams", &self.open_streams())
            .finish()
    }
}

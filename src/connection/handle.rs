//! Connection handles.
//!
//! A [`Connection`] wraps one raw driver connection for a run of operations.
//! Connections acquired from a session's provider are owned by the session
//! and closed exactly once; a fixed connection handed to the session is never
//! closed here.

use crate::connection::registry::{Closeable, ResourceRegistry};
use crate::driver::{RawConnection, Savepoint};
use crate::error::{ConnectionError, DriverError, Result};
use crate::query::executor::StatementExecutor;
use crate::query::row::{ParseResult, Row};
use crate::query::statement::StatementSpec;
use crate::query::stream::{RowStream, StreamCore};
use crate::types::Value;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Shared state of a connection, also held by streams and the registry.
pub(crate) struct ConnectionCore {
    id: u64,
    raw: Mutex<Box<dyn RawConnection>>,
    owns_lifecycle: bool,
    closed: AtomicBool,
    executor: StatementExecutor,
    registry: Weak<ResourceRegistry>,
}

impl ConnectionCore {
    /// Wrap a raw connection. Owned connections are entered into `registry`.
    pub(crate) fn register(
        raw: Box<dyn RawConnection>,
        owns_lifecycle: bool,
        executor: StatementExecutor,
        registry: &Arc<ResourceRegistry>,
    ) -> Arc<ConnectionCore> {
        let id = registry.next_id();
        let core = Arc::new(ConnectionCore {
            id,
            raw: Mutex::new(raw),
            owns_lifecycle,
            closed: AtomicBool::new(false),
            executor,
            registry: Arc::downgrade(registry),
        });
        if owns_lifecycle {
            registry.register_connection(id, Arc::clone(&core) as Arc<dyn Closeable>);
        }
        core
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn executor(&self) -> &StatementExecutor {
        &self.executor
    }

    pub(crate) fn registry(&self) -> Weak<ResourceRegistry> {
        Weak::clone(&self.registry)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Run `f` with exclusive access to the raw connection.
    pub(crate) fn with_raw<R>(
        &self,
        f: impl FnOnce(&mut dyn RawConnection) -> Result<R>,
    ) -> Result<R> {
        let mut raw = self.raw.lock();
        if self.is_closed() {
            return Err(ConnectionError::ConnectionClosed.into());
        }
        f(&mut **raw)
    }

    fn operation<R>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&mut dyn RawConnection) -> std::result::Result<R, DriverError>,
    ) -> Result<R> {
        self.with_raw(|raw| {
            f(raw).map_err(|source| ConnectionError::OperationFailed { operation, source }.into())
        })
    }

    /// Close the raw connection if this handle owns it and it is still open.
    pub(crate) fn close(&self) -> Result<()> {
        if !self.owns_lifecycle || self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.deregister_connection(self.id);
        }

        let mut raw = self.raw.lock();
        self.executor.controller().on_disconnect(&**raw);
        raw.close().map_err(ConnectionError::CloseFailed)?;
        tracing::debug!(connection = self.id, "Connection released");
        Ok(())
    }
}

impl Closeable for ConnectionCore {
    fn force_close(&self) -> Result<()> {
        self.close()
    }
}

/// Transaction flags a commit or rollback depends on.
fn is_transactional(raw: &dyn RawConnection) -> std::result::Result<bool, DriverError> {
    Ok(!raw.is_closed() && !raw.read_only()? && !raw.auto_commit()?)
}

/// Handle to one database connection.
///
/// Dropping the handle closes the connection when the session owns it.
/// Call [`close`](Self::close) to observe close failures.
pub struct Connection {
    core: Arc<ConnectionCore>,
}

impl Connection {
    pub(crate) fn new(core: Arc<ConnectionCore>) -> Self {
        Self { core }
    }

    /// Whether closing this handle closes the underlying connection.
    pub fn owns_lifecycle(&self) -> bool {
        self.core.owns_lifecycle
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Is auto-commit on.
    pub fn auto_commit(&self) -> Result<bool> {
        self.core.operation("auto_commit", |raw| raw.auto_commit())
    }

    /// Turn auto-commit on or off.
    pub fn set_auto_commit(&self, auto_commit: bool) -> Result<()> {
        self.core
            .operation("set_auto_commit", |raw| raw.set_auto_commit(auto_commit))
    }

    /// Is the connection read-only.
    pub fn read_only(&self) -> Result<bool> {
        self.core.operation("read_only", |raw| raw.read_only())
    }

    /// Make the connection read-only, or writable.
    pub fn set_read_only(&self, read_only: bool) -> Result<()> {
        self.core
            .operation("set_read_only", |raw| raw.set_read_only(read_only))
    }

    /// Commit the open transaction.
    ///
    /// Does nothing when the connection is read-only or in auto-commit mode.
    pub fn commit(&self) -> Result<()> {
        self.core.operation("commit", |raw| {
            if is_transactional(raw)? {
                raw.commit()?;
            }
            Ok(())
        })
    }

    /// Roll back the open transaction.
    ///
    /// Does nothing when the connection is read-only or in auto-commit mode.
    pub fn rollback(&self) -> Result<()> {
        self.rollback_to(None)
    }

    /// Roll back to `savepoint`, or the whole transaction when `None`.
    ///
    /// Does nothing when the connection is read-only or in auto-commit mode.
    pub fn rollback_to(&self, savepoint: Option<&Savepoint>) -> Result<()> {
        self.core.operation("rollback", |raw| {
            if !is_transactional(raw)? {
                return Ok(());
            }
            match savepoint {
                Some(savepoint) => raw.rollback_to_savepoint(savepoint),
                None => raw.rollback(),
            }
        })
    }

    /// Mark an unnamed savepoint.
    ///
    /// Savepoints only exist inside a transaction, so this turns auto-commit
    /// off if it was on.
    pub fn set_savepoint(&self) -> Result<Savepoint> {
        self.set_named_savepoint("")
    }

    /// Mark a named savepoint, turning auto-commit off if it was on.
    pub fn set_named_savepoint(&self, name: &str) -> Result<Savepoint> {
        self.core.operation("set_savepoint", |raw| {
            if raw.auto_commit()? {
                raw.set_auto_commit(false)?;
            }
            raw.set_savepoint(name)
        })
    }

    /// Run a query and collect the rows the parser keeps.
    pub fn list<T, F>(&self, statement: impl Into<StatementSpec>, parser: F) -> Result<Vec<T>>
    where
        F: Fn(&Row<'_>) -> ParseResult<T>,
    {
        let spec = statement.into();
        let executor = self.core.executor();
        self.core
            .with_raw(|raw| executor.collect_list(raw, &spec, parser))
    }

    /// Run a query and stream its rows lazily.
    ///
    /// The stream borrows this handle and never closes the connection; close
    /// the handle once the stream is done.
    pub fn stream<'c, T, F>(
        &'c self,
        statement: impl Into<StatementSpec>,
        parser: F,
    ) -> Result<RowStream<'c, T>>
    where
        F: Fn(&Row<'_>) -> ParseResult<T> + Send + 'c,
    {
        let core = StreamCore::open(
            Arc::clone(&self.core),
            false,
            statement.into(),
            self.core.registry(),
        )?;
        Ok(RowStream::new(core, Box::new(parser)))
    }

    /// Execute a statement for its effect.
    pub fn execute(&self, statement: impl Into<StatementSpec>) -> Result<()> {
        let spec = statement.into();
        let executor = self.core.executor();
        self.core
            .with_raw(|raw| executor.execute_no_result(raw, &spec))
    }

    /// Call a stored procedure and return its integer return code.
    pub fn call_procedure(&self, name: &str, args: &[Value]) -> Result<i32> {
        let executor = self.core.executor();
        self.core
            .with_raw(|raw| executor.call_procedure(raw, name, args))
    }

    /// Close the connection, if owned.
    pub fn close(self) -> Result<()> {
        self.core.close()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.core.close() {
            tracing::warn!(connection = self.core.id(), error = %e, "Failed to close connection on drop");
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.core.id)
            .field("owns_lifecycle", &self.core.owns_lifecycle)
            .field("closed", &self.is_closed())
            .finish()
    }
}

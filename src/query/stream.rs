//! Lazy row streams.
//!
//! A [`RowStream`] executes its statement when it is opened and then parses
//! one row per pull. It is single-pass and strictly sequential.
//!
//! # Close protocol
//!
//! A stream moves `Created -> Open -> Closed` and never back. Closing happens
//! on exhaustion, on a read failure, on [`RowStream::close`], on drop, or when
//! the owning session force-closes its resources, whichever comes first.
//!
//! The state lock is only held to move resources in or out of the stream,
//! never while the driver executes or the parser runs. Execution and pulls
//! take the resources out and hand them back afterwards. A close that arrives
//! meanwhile marks the stream `Closed` and returns; the in-flight operation
//! then finds the mark and does the release itself. Whoever releases does so
//! exactly once: cursor, then statement, then the connection when the stream
//! owns it, and finally the completion report. Every later close is a no-op
//! and every later pull returns `None`.

use crate::connection::handle::ConnectionCore;
use crate::connection::registry::{Closeable, ResourceRegistry};
use crate::error::{Error, Result, StatementError};
use crate::query::controller::StatementController;
use crate::query::executor::{read_error, Executed};
use crate::query::row::{Row, RowParser};
use crate::query::statement::StatementSpec;
use parking_lot::Mutex;
use std::iter::FusedIterator;
use std::sync::{Arc, Weak};

/// Observable lifecycle state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamStatus {
    /// Constructed, statement not yet executed
    Created,
    /// Cursor obtained, rows can be pulled
    Open,
    /// Resources released; terminal
    Closed,
}

enum StreamState {
    /// Statement executing; resources are with `open`.
    Created,
    Open(OpenStream),
    /// A pull is in flight; resources are with `pull`.
    Pulling,
    Closed,
}

impl StreamState {
    fn status(&self) -> StreamStatus {
        match self {
            StreamState::Created => StreamStatus::Created,
            StreamState::Open(_) | StreamState::Pulling => StreamStatus::Open,
            StreamState::Closed => StreamStatus::Closed,
        }
    }
}

struct OpenStream {
    connection: Arc<ConnectionCore>,
    owns_connection: bool,
    executed: Executed,
}

enum Pulled<T> {
    Row(T),
    Exhausted,
    Failed(Error),
}

/// Type-erased half of a stream, shared with the session registry.
pub(crate) struct StreamCore {
    id: u64,
    spec: StatementSpec,
    controller: Arc<dyn StatementController>,
    registry: Weak<ResourceRegistry>,
    state: Mutex<StreamState>,
}

impl StreamCore {
    /// Register a stream and execute its statement on `connection`.
    ///
    /// On failure the stream is deregistered again and, when it owns the
    /// connection, the connection is closed. A stream closed while its
    /// statement was executing is returned already closed.
    pub(crate) fn open(
        connection: Arc<ConnectionCore>,
        owns_connection: bool,
        spec: StatementSpec,
        registry: Weak<ResourceRegistry>,
    ) -> Result<Arc<StreamCore>> {
        let live_registry = registry.upgrade();
        let id = live_registry.as_ref().map_or(0, |r| r.next_id());
        let core = Arc::new(StreamCore {
            id,
            spec,
            controller: Arc::clone(connection.executor().controller()),
            registry,
            state: Mutex::new(StreamState::Created),
        });
        if let Some(registry) = &live_registry {
            registry.register_stream(id, Arc::clone(&core) as Arc<dyn Closeable>);
        }

        let executed = connection.with_raw(|raw| connection.executor().execute(raw, &core.spec));
        let executed = match executed {
            Ok(executed) => executed,
            Err(err) => {
                *core.state.lock() = StreamState::Closed;
                if let Some(registry) = &live_registry {
                    registry.deregister_stream(id);
                }
                if owns_connection {
                    if let Err(close_err) = connection.close() {
                        tracing::warn!(
                            stream = id,
                            error = %close_err,
                            "Failed to close connection of a stream that failed to open"
                        );
                    }
                }
                return Err(err);
            }
        };

        let open = OpenStream {
            connection,
            owns_connection,
            executed,
        };
        let mut state = core.state.lock();
        if matches!(*state, StreamState::Created) {
            *state = StreamState::Open(open);
            drop(state);
            tracing::debug!(stream = id, sql = %core.spec.sql(), "Stream opened");
        } else {
            drop(state);
            core.report_close(core.finish(open, None));
        }
        Ok(core)
    }

    pub(crate) fn status(&self) -> StreamStatus {
        self.state.lock().status()
    }

    /// Pull the next parsed row, skipping rows the parser skips.
    fn pull<T>(&self, parser: &dyn RowParser<T>) -> Option<Result<T>> {
        let mut open = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, StreamState::Pulling) {
                StreamState::Open(open) => open,
                other => {
                    *state = other;
                    return None;
                }
            }
        };

        let pulled = match open.executed.cursor_mut() {
            Some(cursor) => loop {
                match cursor.advance() {
                    Ok(true) => match parser.parse(&Row::new(&*cursor)) {
                        Ok(Some(value)) => break Pulled::Row(value),
                        Ok(None) => continue,
                        Err(source) => break Pulled::Failed(read_error(&self.spec, source)),
                    },
                    Ok(false) => break Pulled::Exhausted,
                    Err(source) => break Pulled::Failed(read_error(&self.spec, source)),
                }
            },
            None => Pulled::Exhausted,
        };

        let mut state = self.state.lock();
        let closed_meanwhile = !matches!(*state, StreamState::Pulling);
        match pulled {
            Pulled::Row(value) if !closed_meanwhile => {
                *state = StreamState::Open(open);
                Some(Ok(value))
            }
            Pulled::Row(value) => {
                drop(state);
                self.report_close(self.finish(open, None));
                Some(Ok(value))
            }
            Pulled::Exhausted => {
                *state = StreamState::Closed;
                drop(state);
                self.report_close(self.finish(open, None));
                None
            }
            Pulled::Failed(err) => {
                *state = StreamState::Closed;
                drop(state);
                self.report_close(self.finish(open, Some(&err)));
                Some(Err(err))
            }
        }
    }

    /// Mark the stream `Closed` and release its resources, if nobody has yet.
    ///
    /// When execution or a pull is in flight, only the mark is set here and
    /// the in-flight operation releases once it is done. A row that pull has
    /// already parsed is still returned.
    fn shutdown(&self) -> Result<()> {
        let previous = std::mem::replace(&mut *self.state.lock(), StreamState::Closed);
        match previous {
            StreamState::Open(open) => self.finish(open, None),
            _ => Ok(()),
        }
    }

    /// Release cursor, statement and owned connection, attempting each, then
    /// notify the controller: failure if `cause` is given or a release
    /// failed, completion otherwise.
    fn finish(&self, mut open: OpenStream, cause: Option<&Error>) -> Result<()> {
        if let Some(registry) = self.registry.upgrade() {
            registry.deregister_stream(self.id);
        }

        let released = open.executed.release().map_err(|source| {
            Error::from(StatementError::Close {
                sql: self.spec.sql().to_string(),
                source,
            })
        });
        let disconnected = if open.owns_connection {
            open.connection.close()
        } else {
            Ok(())
        };
        let outcome = released.and(disconnected);

        match (cause, &outcome) {
            (Some(cause), _) => self.controller.on_execute_fail(&self.spec, cause),
            (None, Err(err)) => self.controller.on_execute_fail(&self.spec, err),
            (None, Ok(())) => self.controller.on_execute_complete(&self.spec),
        }
        tracing::debug!(stream = self.id, "Stream closed");

        outcome
    }

    fn report_close(&self, outcome: Result<()>) {
        if let Err(e) = outcome {
            tracing::warn!(stream = self.id, error = %e, "Failed to close stream");
        }
    }
}

impl Closeable for StreamCore {
    fn force_close(&self) -> Result<()> {
        self.shutdown()
    }
}

/// Lazy, single-pass sequence of parsed rows.
///
/// Each item is one row the parser did not skip, or the error that ended the
/// stream. Resources are released as soon as the cursor is exhausted, so a
/// fully consumed stream holds nothing open. Abandoning a stream early is
/// fine: dropping it closes it.
///
/// The lifetime ties a stream to the [`Connection`](crate::Connection) it was
/// opened on. Streams opened from a [`Session`](crate::Session) own their
/// connection and are `'static`.
pub struct RowStream<'c, T> {
    core: Arc<StreamCore>,
    parser: Box<dyn RowParser<T> + 'c>,
}

impl<'c, T> RowStream<'c, T> {
    pub(crate) fn new(core: Arc<StreamCore>, parser: Box<dyn RowParser<T> + 'c>) -> Self {
        Self { core, parser }
    }

    /// Current lifecycle state.
    pub fn status(&self) -> StreamStatus {
        self.core.status()
    }

    /// Whether the stream has released its resources.
    pub fn is_closed(&self) -> bool {
        self.status() == StreamStatus::Closed
    }

    /// Close the stream now, reporting release failures.
    ///
    /// Closing an already closed stream succeeds without doing anything.
    pub fn close(self) -> Result<()> {
        self.core.shutdown()
    }
}

impl<T> Iterator for RowStream<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.core.pull(self.parser.as_ref())
    }
}

impl<T> FusedIterator for RowStream<'_, T> {}

impl<T> Drop for RowStream<'_, T> {
    fn drop(&mut self) {
        if let Err(e) = self.core.shutdown() {
            tracing::warn!(stream = self.core.id, error = %e, "Failed to close stream on drop");
        }
    }
}

impl<T> std::fmt::Debug for RowStream<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("id", &self.core.id)
            .field("sql", &self.core.spec.sql())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::handle::ConnectionCore;
    use crate::driver::protocol::testing::{MockConnection, MockCursor, MockStatement};
    use crate::driver::RawConnection;
    use crate::error::DriverError;
    use crate::query::controller::testing::{Event, RecordingController};
    use crate::query::executor::StatementExecutor;
    use crate::query::row::ParseResult;
    use crate::types::Value;
    use mockall::Sequence;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::thread;

    struct Fixture {
        registry: Arc<ResourceRegistry>,
        recorder: Arc<RecordingController>,
        connection: Arc<ConnectionCore>,
    }

    /// Build a connection whose statement yields `rows` through a cursor.
    ///
    /// Cursor, statement and connection must each close exactly once, in that
    /// order, when `owned` is set; the connection must never close otherwise.
    fn fixture(rows: Vec<Option<i64>>, owned: bool) -> Fixture {
        let mut seq = Sequence::new();
        let mut cursor = MockCursor::new();
        let state = Arc::new(parking_lot::Mutex::new((rows, 0usize)));
        let advance = Arc::clone(&state);
        cursor.expect_advance().returning(move || {
            let mut s = advance.lock();
            s.1 += 1;
            Ok(s.1 <= s.0.len())
        });
        cursor.expect_value().returning(move |_| {
            let s = state.lock();
            Ok(s.0[s.1 - 1].map_or(Value::Null, Value::Integer))
        });
        cursor
            .expect_close()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        let mut stmt = MockStatement::new();
        stmt.expect_execute_sql().returning(|_| Ok(()));
        stmt.expect_result_cursor()
            .return_once(move || Ok(Some(Box::new(cursor))));
        stmt.expect_close()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        let mut conn = MockConnection::new();
        conn.expect_create_statement()
            .return_once(move || Ok(Box::new(stmt)));
        if owned {
            conn.expect_close()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|| Ok(()));
        } else {
            conn.expect_close().times(0);
        }

        let registry = Arc::new(ResourceRegistry::new());
        let recorder = Arc::new(RecordingController::default());
        let executor = StatementExecutor::new(recorder.clone());
        let raw: Box<dyn RawConnection> = Box::new(conn);
        let connection = ConnectionCore::register(raw, owned, executor, &registry);

        Fixture {
            registry,
            recorder,
            connection,
        }
    }

    fn open_stream(fixture: &Fixture, owned: bool) -> RowStream<'static, i64> {
        let core = StreamCore::open(
            Arc::clone(&fixture.connection),
            owned,
            StatementSpec::simple("select x from t"),
            Arc::downgrade(&fixture.registry),
        )
        .unwrap();
        let parser = |row: &Row<'_>| -> ParseResult<i64> { row.opt_i64(1) };
        RowStream::new(core, Box::new(parser))
    }

    #[test]
    fn test_exhaustion_closes_everything() {
        let fixture = fixture(vec![Some(1), None, Some(3)], true);
        let mut stream = open_stream(&fixture, true);
        assert_eq!(fixture.registry.open_streams(), 1);
        assert_eq!(stream.status(), StreamStatus::Open);

        let rows: Vec<i64> = stream.by_ref().map(|r| r.unwrap()).collect();
        assert_eq!(rows, vec![1, 3]);
        assert!(stream.is_closed());
        assert_eq!(fixture.registry.open_streams(), 0);
        assert_eq!(fixture.registry.open_connections(), 0);
        assert!(stream.next().is_none());

        let events = fixture.recorder.events();
        assert_eq!(events.first(), Some(&Event::Start("select x from t".to_string())));
        assert!(events.contains(&Event::Disconnect));
        assert_eq!(events.last(), Some(&Event::Complete("select x from t".to_string())));
    }

    #[test]
    fn test_take_first_then_drop_closes_everything() {
        let fixture = fixture(vec![Some(10), Some(20), Some(30)], true);
        let first = {
            let mut stream = open_stream(&fixture, true);
            stream.next().unwrap().unwrap()
        };
        assert_eq!(first, 10);
        assert_eq!(fixture.registry.open_streams(), 0);
        assert_eq!(fixture.registry.open_connections(), 0);
    }

    #[test]
    fn test_double_close_and_pull_after_close() {
        let fixture = fixture(vec![Some(1)], true);
        let mut stream = open_stream(&fixture, true);
        stream.core.shutdown().unwrap();
        stream.core.shutdown().unwrap();
        assert!(stream.next().is_none());
        stream.close().unwrap();

        let completions = fixture
            .recorder
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Complete(_)))
            .count();
        assert_eq!(completions, 1);
    }

    #[test]
    fn test_parser_may_close_its_own_stream() {
        let fixture = fixture(vec![Some(1), Some(2)], false);
        let core = StreamCore::open(
            Arc::clone(&fixture.connection),
            false,
            StatementSpec::simple("select x from t"),
            Arc::downgrade(&fixture.registry),
        )
        .unwrap();
        let registry = Arc::clone(&fixture.registry);
        let parser = move |row: &Row<'_>| -> ParseResult<i64> {
            registry
                .force_close_all()
                .map_err(|e| DriverError::Other(e.to_string()))?;
            row.opt_i64(1)
        };
        let mut stream = RowStream::new(core, Box::new(parser));

        assert_eq!(stream.next().unwrap().unwrap(), 1);
        assert!(stream.is_closed());
        assert!(stream.next().is_none());
        assert_eq!(fixture.registry.open_streams(), 0);
        assert_eq!(
            fixture.recorder.events().last(),
            Some(&Event::Complete("select x from t".to_string()))
        );
    }

    /// Like [`fixture`], owned, without ordering constraints between closes.
    fn racing_fixture(rows: i64) -> Fixture {
        let mut cursor = MockCursor::new();
        let position = Arc::new(AtomicI64::new(0));
        let advance = Arc::clone(&position);
        cursor
            .expect_advance()
            .returning(move || Ok(advance.fetch_add(1, Ordering::SeqCst) < rows));
        cursor
            .expect_value()
            .returning(move |_| Ok(Value::Integer(position.load(Ordering::SeqCst))));
        cursor.expect_close().times(1).returning(|| Ok(()));

        let mut stmt = MockStatement::new();
        stmt.expect_execute_sql().returning(|_| Ok(()));
        stmt.expect_result_cursor()
            .return_once(move || Ok(Some(Box::new(cursor))));
        stmt.expect_close().times(1).returning(|| Ok(()));

        let mut conn = MockConnection::new();
        conn.expect_create_statement()
            .return_once(move || Ok(Box::new(stmt)));
        conn.expect_close().times(1).returning(|| Ok(()));

        let registry = Arc::new(ResourceRegistry::new());
        let recorder = Arc::new(RecordingController::default());
        let executor = StatementExecutor::new(recorder.clone());
        let raw: Box<dyn RawConnection> = Box::new(conn);
        let connection = ConnectionCore::register(raw, true, executor, &registry);

        Fixture {
            registry,
            recorder,
            connection,
        }
    }

    #[test]
    fn test_force_close_races_with_exhaustion() {
        for _ in 0..50 {
            let fixture = racing_fixture(200);
            let stream = open_stream(&fixture, true);
            let registry = Arc::clone(&fixture.registry);

            thread::scope(|s| {
                s.spawn(move || stream.map(|row| row.unwrap()).count());
                s.spawn(move || {
                    while registry.open_streams() + registry.open_connections() > 0 {
                        registry.force_close_all().unwrap();
                        thread::yield_now();
                    }
                });
            });

            assert_eq!(fixture.registry.open_streams(), 0);
            assert_eq!(fixture.registry.open_connections(), 0);
            assert!(fixture.connection.is_closed());
            let terminal = fixture
                .recorder
                .events()
                .into_iter()
                .filter(|e| matches!(e, Event::Complete(_) | Event::Fail(_)))
                .count();
            assert_eq!(terminal, 1);
        }
    }

    #[test]
    fn test_borrowed_connection_is_not_closed() {
        let fixture = fixture(vec![Some(1), Some(2)], false);
        let stream = open_stream(&fixture, false);
        stream.close().unwrap();
        assert!(!fixture.connection.is_closed());
    }

    #[test]
    fn test_force_close_through_registry() {
        let fixture = fixture(vec![Some(1), Some(2)], true);
        let mut stream = open_stream(&fixture, true);
        fixture.registry.force_close_all().unwrap();
        assert!(stream.is_closed());
        assert!(stream.next().is_none());
        assert_eq!(fixture.registry.open_connections(), 0);
    }

    #[test]
    fn test_open_failure_leaves_nothing_registered() {
        let mut stmt = MockStatement::new();
        stmt.expect_execute_sql()
            .returning(|_| Err(DriverError::Other("no such table".to_string())));
        stmt.expect_close().times(1).returning(|| Ok(()));
        let mut conn = MockConnection::new();
        conn.expect_create_statement()
            .return_once(move || Ok(Box::new(stmt)));
        conn.expect_close().times(1).returning(|| Ok(()));

        let registry = Arc::new(ResourceRegistry::new());
        let recorder = Arc::new(RecordingController::default());
        let raw: Box<dyn RawConnection> = Box::new(conn);
        let connection =
            ConnectionCore::register(raw, true, StatementExecutor::new(recorder.clone()), &registry);

        let result = StreamCore::open(
            connection,
            true,
            StatementSpec::simple("select * from missing"),
            Arc::downgrade(&registry),
        );
        assert!(result.is_err());
        assert_eq!(registry.open_streams(), 0);
        assert_eq!(registry.open_connections(), 0);
        assert_eq!(
            recorder.events().last(),
            Some(&Event::Disconnect)
        );
    }

    #[test]
    fn test_read_failure_ends_stream() {
        let mut cursor = MockCursor::new();
        cursor
            .expect_advance()
            .returning(|| Err(DriverError::Other("disk I/O error".to_string())));
        cursor.expect_close().times(1).returning(|| Ok(()));
        let mut stmt = MockStatement::new();
        stmt.expect_execute_sql().returning(|_| Ok(()));
        stmt.expect_result_cursor()
            .return_once(move || Ok(Some(Box::new(cursor))));
        stmt.expect_close().times(1).returning(|| Ok(()));
        let mut conn = MockConnection::new();
        conn.expect_create_statement()
            .return_once(move || Ok(Box::new(stmt)));
        conn.expect_close().times(1).returning(|| Ok(()));

        let registry = Arc::new(ResourceRegistry::new());
        let recorder = Arc::new(RecordingController::default());
        let raw: Box<dyn RawConnection> = Box::new(conn);
        let connection =
            ConnectionCore::register(raw, true, StatementExecutor::new(recorder.clone()), &registry);
        let core = StreamCore::open(
            connection,
            true,
            StatementSpec::simple("select x from t"),
            Arc::downgrade(&registry),
        )
        .unwrap();
        let parser = |row: &Row<'_>| -> ParseResult<i64> { row.opt_i64(1) };
        let mut stream = RowStream::new(core, Box::new(parser));

        assert!(matches!(
            stream.next(),
            Some(Err(Error::Statement(StatementError::Read { .. })))
        ));
        assert!(stream.next().is_none());
        assert_eq!(
            recorder.events().last(),
            Some(&Event::Fail("select x from t".to_string()))
        );
    }
}

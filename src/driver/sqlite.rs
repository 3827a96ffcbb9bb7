//! SQLite driver backed by rusqlite.
//!
//! Queries are stepped one row per [`SqliteCursor::advance`](RawCursor::advance).
//! rusqlite statements borrow their connection and row iterators borrow their
//! statement, so running queries live inside the connection state next to the
//! connection they borrow, and are only touched under the state lock. A
//! cursor refers to its query by id and copies out the current row.
//!
//! SQLite has no connection-level auto-commit switch; turning auto-commit off
//! opens a transaction with `BEGIN`, and every commit or rollback opens the
//! next one until auto-commit is turned back on.

use crate::driver::params::SqliteParams;
use crate::driver::protocol::{
    ConnectionProvider, RawConnection, RawCursor, RawStatement, Savepoint,
};
use crate::error::DriverError;
use crate::types::Value;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use parking_lot::Mutex;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, OpenFlags};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::ptr::NonNull;
use std::sync::Arc;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S%.f";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Opens a new SQLite connection on every acquire.
#[derive(Debug, Clone)]
pub struct SqliteProvider {
    params: SqliteParams,
}

impl SqliteProvider {
    /// Create a provider for the given parameters.
    ///
    /// Note that every connection to `:memory:` is a separate database.
    pub fn new(params: SqliteParams) -> Self {
        Self { params }
    }

    /// Connection parameters.
    pub fn params(&self) -> &SqliteParams {
        &self.params
    }
}

impl ConnectionProvider for SqliteProvider {
    fn acquire(&self) -> Result<Box<dyn RawConnection>, DriverError> {
        Ok(Box::new(SqliteConnection::open(&self.params)?))
    }
}

/// A query being stepped: a finalizable statement and the rows borrowing it.
struct RunningQuery {
    rows: Option<rusqlite::Rows<'static>>,
    stmt: NonNull<rusqlite::Statement<'static>>,
}

// SAFETY: a running query is owned by a `ConnectionState` and only touched
// through its mutex, together with the connection it borrows. rusqlite
// connections are `Send`; the SQLite handle is opened in multi-thread mode.
unsafe impl Send for RunningQuery {}

impl RunningQuery {
    /// Prepare `sql` on `conn` and start stepping it.
    ///
    /// # Safety
    ///
    /// `conn` must stay at the same address and open for as long as the
    /// returned query is alive.
    unsafe fn start(
        conn: &rusqlite::Connection,
        sql: &str,
        values: Vec<SqlValue>,
    ) -> Result<(Self, Vec<String>), DriverError> {
        let stmt = conn.prepare(sql)?;
        let columns = stmt.column_names().into_iter().map(String::from).collect();
        let stmt = std::mem::transmute::<rusqlite::Statement<'_>, rusqlite::Statement<'static>>(stmt);
        let mut query = RunningQuery {
            rows: None,
            stmt: NonNull::from(Box::leak(Box::new(stmt))),
        };
        query.rows = Some((*query.stmt.as_ptr()).query(params_from_iter(values))?);
        Ok((query, columns))
    }

    /// Step to the next row and copy out its `width` values.
    fn next_row(&mut self, width: usize) -> Result<Option<Vec<SqlValue>>, DriverError> {
        let Some(rows) = self.rows.as_mut() else {
            return Ok(None);
        };
        match rows.next()? {
            Some(row) => {
                let mut record = Vec::with_capacity(width);
                for index in 0..width {
                    record.push(row.get::<_, SqlValue>(index)?);
                }
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }
}

impl Drop for RunningQuery {
    fn drop(&mut self) {
        self.rows = None;
        // SAFETY: `stmt` came from `Box::leak` in `start` and nothing borrows
        // it once `rows` is gone.
        drop(unsafe { Box::from_raw(self.stmt.as_ptr()) });
    }
}

// Field order matters: running queries borrow `conn` and drop first.
struct ConnectionState {
    queries: BTreeMap<u64, RunningQuery>,
    conn: Option<Box<rusqlite::Connection>>,
    next_query: u64,
    auto_commit: bool,
    read_only: bool,
    savepoints: u64,
}

impl ConnectionState {
    fn conn(&self) -> Result<&rusqlite::Connection, DriverError> {
        self.conn.as_deref().ok_or(DriverError::Closed)
    }

    /// Start a query and keep it running under a new id.
    fn start_query(
        &mut self,
        sql: &str,
        values: Vec<SqlValue>,
    ) -> Result<(u64, Vec<String>), DriverError> {
        let conn = self.conn()?;
        // SAFETY: the connection is boxed and only dropped in `close` or with
        // the state, both after `queries` is emptied.
        let (query, columns) = unsafe { RunningQuery::start(conn, sql, values)? };
        self.next_query += 1;
        self.queries.insert(self.next_query, query);
        Ok((self.next_query, columns))
    }
}

/// A SQLite connection.
///
/// Clones share the same underlying connection, which lets a caller keep a
/// handle to a connection it lends out.
#[derive(Clone)]
pub struct SqliteConnection {
    state: Arc<Mutex<ConnectionState>>,
}

impl SqliteConnection {
    /// Open a connection.
    pub fn open(params: &SqliteParams) -> Result<Self, DriverError> {
        let mut flags = OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        if params.read_only {
            flags |= OpenFlags::SQLITE_OPEN_READ_ONLY;
        } else {
            flags |= OpenFlags::SQLITE_OPEN_READ_WRITE;
            if params.create {
                flags |= OpenFlags::SQLITE_OPEN_CREATE;
            }
        }

        let conn = rusqlite::Connection::open_with_flags(&params.path, flags)?;
        conn.busy_timeout(params.busy_timeout)?;

        Ok(Self::from_rusqlite(conn, params.read_only))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, DriverError> {
        Ok(Self::from_rusqlite(
            rusqlite::Connection::open_in_memory()?,
            false,
        ))
    }

    fn from_rusqlite(conn: rusqlite::Connection, read_only: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(ConnectionState {
                queries: BTreeMap::new(),
                conn: Some(Box::new(conn)),
                next_query: 0,
                auto_commit: true,
                read_only,
                savepoints: 0,
            })),
        }
    }

    fn batch(&self, sql: &str) -> Result<(), DriverError> {
        let state = self.state.lock();
        state.conn()?.execute_batch(sql)?;
        Ok(())
    }

    fn end_transaction(&mut self, verb: &str) -> Result<(), DriverError> {
        let state = self.state.lock();
        let conn = state.conn()?;
        if !conn.is_autocommit() {
            conn.execute_batch(verb)?;
        }
        if !state.auto_commit {
            conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SqliteConnection")
            .field("closed", &state.conn.is_none())
            .field("auto_commit", &state.auto_commit)
            .field("read_only", &state.read_only)
            .finish()
    }
}

impl RawConnection for SqliteConnection {
    fn create_statement(&mut self) -> Result<Box<dyn RawStatement>, DriverError> {
        self.state.lock().conn()?;
        Ok(Box::new(SqliteStatement::new(
            Arc::clone(&self.state),
            StatementKind::Plain,
            0,
        )))
    }

    fn prepare_statement(&mut self, sql: &str) -> Result<Box<dyn RawStatement>, DriverError> {
        let parameter_count = {
            let state = self.state.lock();
            let stmt = state.conn()?.prepare(strip_terminator(sql))?;
            stmt.parameter_count()
        };
        Ok(Box::new(SqliteStatement::new(
            Arc::clone(&self.state),
            StatementKind::Prepared(sql.to_string()),
            parameter_count,
        )))
    }

    fn prepare_call(&mut self, _sql: &str) -> Result<Box<dyn RawStatement>, DriverError> {
        Err(DriverError::Unsupported(
            "SQLite does not support stored procedures".to_string(),
        ))
    }

    fn auto_commit(&self) -> Result<bool, DriverError> {
        let state = self.state.lock();
        state.conn()?;
        Ok(state.auto_commit)
    }

    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        let conn = state.conn()?;
        if state.auto_commit == auto_commit {
            return Ok(());
        }

        if auto_commit {
            if !conn.is_autocommit() {
                conn.execute_batch("COMMIT")?;
            }
        } else if conn.is_autocommit() {
            conn.execute_batch("BEGIN")?;
        }

        state.auto_commit = auto_commit;
        Ok(())
    }

    fn read_only(&self) -> Result<bool, DriverError> {
        let state = self.state.lock();
        state.conn()?;
        Ok(state.read_only)
    }

    fn set_read_only(&mut self, read_only: bool) -> Result<(), DriverError> {
        let mut state = self.state.lock();
        let pragma = if read_only {
            "PRAGMA query_only = 1"
        } else {
            "PRAGMA query_only = 0"
        };
        state.conn()?.execute_batch(pragma)?;
        state.read_only = read_only;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        self.end_transaction("COMMIT")
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        self.end_transaction("ROLLBACK")
    }

    fn set_savepoint(&mut self, name: &str) -> Result<Savepoint, DriverError> {
        let name = {
            let mut state = self.state.lock();
            state.savepoints += 1;
            if name.is_empty() {
                format!("savepoint_{}", state.savepoints)
            } else {
                name.to_string()
            }
        };
        self.batch(&format!("SAVEPOINT {}", quote_identifier(&name)))?;
        Ok(Savepoint::new(name))
    }

    fn rollback_to_savepoint(&mut self, savepoint: &Savepoint) -> Result<(), DriverError> {
        self.batch(&format!(
            "ROLLBACK TO SAVEPOINT {}",
            quote_identifier(savepoint.name())
        ))
    }

    fn is_closed(&self) -> bool {
        self.state.lock().conn.is_none()
    }

    fn close(&mut self) -> Result<(), DriverError> {
        let conn = {
            let mut state = self.state.lock();
            state.queries.clear();
            state.conn.take()
        };
        match conn {
            Some(conn) => (*conn).close().map_err(|(_, e)| DriverError::Sqlite(e)),
            None => Ok(()),
        }
    }
}

enum StatementKind {
    Plain,
    Prepared(String),
}

/// A statement compiled on a [`SqliteConnection`].
pub struct SqliteStatement {
    state: Arc<Mutex<ConnectionState>>,
    kind: StatementKind,
    bindings: Vec<Option<SqlValue>>,
    cursor: Option<SqliteCursor>,
    closed: bool,
}

impl SqliteStatement {
    fn new(state: Arc<Mutex<ConnectionState>>, kind: StatementKind, parameters: usize) -> Self {
        Self {
            state,
            kind,
            bindings: vec![None; parameters],
            cursor: None,
            closed: false,
        }
    }

    fn bind(&mut self, index: usize, value: SqlValue) -> Result<(), DriverError> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        let count = self.bindings.len();
        if index == 0 || index > count {
            return Err(DriverError::ParameterOutOfRange { index, count });
        }
        self.bindings[index - 1] = Some(value);
        Ok(())
    }

    fn run(&mut self, sql: &str, values: Vec<SqlValue>) -> Result<(), DriverError> {
        let sql = strip_terminator(sql);
        let cursor = {
            let mut state = self.state.lock();
            let columns = state.conn()?.prepare(sql)?.column_count();
            if columns == 0 {
                state.conn()?.execute(sql, params_from_iter(values))?;
                None
            } else {
                let (query, columns) = state.start_query(sql, values)?;
                Some(SqliteCursor::new(Arc::clone(&self.state), query, columns))
            }
        };

        self.cursor = cursor;
        Ok(())
    }
}

impl RawStatement for SqliteStatement {
    fn bind_null(&mut self, index: usize) -> Result<(), DriverError> {
        self.bind(index, SqlValue::Null)
    }

    fn bind_date(&mut self, index: usize, value: NaiveDate) -> Result<(), DriverError> {
        self.bind(index, SqlValue::Text(value.format(DATE_FORMAT).to_string()))
    }

    fn bind_time(&mut self, index: usize, value: NaiveTime) -> Result<(), DriverError> {
        self.bind(index, SqlValue::Text(value.format(TIME_FORMAT).to_string()))
    }

    fn bind_timestamp(&mut self, index: usize, value: NaiveDateTime) -> Result<(), DriverError> {
        self.bind(
            index,
            SqlValue::Text(value.format(TIMESTAMP_FORMAT).to_string()),
        )
    }

    fn bind_blob(&mut self, index: usize, value: &[u8]) -> Result<(), DriverError> {
        self.bind(index, SqlValue::Blob(value.to_vec()))
    }

    fn bind_clob(&mut self, index: usize, value: &str) -> Result<(), DriverError> {
        self.bind(index, SqlValue::Text(value.to_string()))
    }

    fn bind_object(&mut self, index: usize, value: &Value) -> Result<(), DriverError> {
        self.bind(index, to_sql_value(value))
    }

    fn register_out_integer(&mut self, _index: usize) -> Result<(), DriverError> {
        Err(DriverError::Unsupported(
            "SQLite statements have no output parameters".to_string(),
        ))
    }

    fn execute_sql(&mut self, sql: &str) -> Result<(), DriverError> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        self.run(sql, Vec::new())
    }

    fn execute(&mut self) -> Result<(), DriverError> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        let sql = match &self.kind {
            StatementKind::Prepared(sql) => sql.clone(),
            StatementKind::Plain => {
                return Err(DriverError::Other(
                    "Plain statements execute SQL text via execute_sql".to_string(),
                ))
            }
        };

        let mut values = Vec::with_capacity(self.bindings.len());
        for (position, binding) in self.bindings.iter().enumerate() {
            match binding {
                Some(value) => values.push(value.clone()),
                None => return Err(DriverError::UnboundParameter { index: position + 1 }),
            }
        }

        self.run(&sql, values)
    }

    fn result_cursor(&mut self) -> Result<Option<Box<dyn RawCursor>>, DriverError> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        Ok(self
            .cursor
            .take()
            .map(|cursor| Box::new(cursor) as Box<dyn RawCursor>))
    }

    fn out_integer(&self, _index: usize) -> Result<Option<i64>, DriverError> {
        Err(DriverError::Unsupported(
            "SQLite statements have no output parameters".to_string(),
        ))
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.closed = true;
        self.cursor = None;
        self.bindings.clear();
        Ok(())
    }
}

/// Cursor stepping a running query.
pub struct SqliteCursor {
    state: Arc<Mutex<ConnectionState>>,
    query: u64,
    columns: Vec<String>,
    current: Option<Vec<SqlValue>>,
    last_was_null: Cell<bool>,
    exhausted: bool,
    closed: bool,
}

impl SqliteCursor {
    fn new(state: Arc<Mutex<ConnectionState>>, query: u64, columns: Vec<String>) -> Self {
        Self {
            state,
            query,
            columns,
            current: None,
            last_was_null: Cell::new(false),
            exhausted: false,
            closed: false,
        }
    }

    fn finalize(&mut self) {
        self.state.lock().queries.remove(&self.query);
    }
}

impl RawCursor for SqliteCursor {
    fn advance(&mut self) -> Result<bool, DriverError> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        self.current = None;
        if self.exhausted {
            return Ok(false);
        }

        let mut state = self.state.lock();
        state.conn()?;
        let width = self.columns.len();
        let query = state.queries.get_mut(&self.query).ok_or(DriverError::Closed)?;
        let row = query.next_row(width);
        if !matches!(row, Ok(Some(_))) {
            state.queries.remove(&self.query);
            self.exhausted = true;
        }
        drop(state);

        self.current = row?;
        Ok(self.current.is_some())
    }

    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.clone()
    }

    fn value(&self, index: usize) -> Result<Value, DriverError> {
        if self.closed {
            return Err(DriverError::Closed);
        }
        let row = self.current.as_ref().ok_or(DriverError::NoCurrentRow)?;
        let count = row.len();
        if index == 0 || index > count {
            return Err(DriverError::ColumnOutOfRange { index, count });
        }

        let value = from_sql_value(&row[index - 1]);
        self.last_was_null.set(value.is_null());
        Ok(value)
    }

    fn was_null(&self) -> bool {
        self.last_was_null.get()
    }

    fn close(&mut self) -> Result<(), DriverError> {
        if !self.closed {
            self.closed = true;
            self.current = None;
            self.finalize();
        }
        Ok(())
    }
}

impl Drop for SqliteCursor {
    fn drop(&mut self) {
        if !self.closed {
            self.finalize();
        }
    }
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Boolean(b) => SqlValue::Integer(i64::from(*b)),
        Value::Integer(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::String(s) | Value::Clob(s) => SqlValue::Text(s.clone()),
        Value::Binary(b) | Value::Blob(b) => SqlValue::Blob(b.clone()),
        Value::Date(d) => SqlValue::Text(d.format(DATE_FORMAT).to_string()),
        Value::Time(t) => SqlValue::Text(t.format(TIME_FORMAT).to_string()),
        Value::Timestamp(ts) | Value::DateTime(ts) => {
            SqlValue::Text(ts.format(TIMESTAMP_FORMAT).to_string())
        }
    }
}

fn from_sql_value(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::Integer(*i),
        SqlValue::Real(f) => Value::Float(*f),
        SqlValue::Text(s) => Value::String(s.clone()),
        SqlValue::Blob(b) => Value::Binary(b.clone()),
    }
}

/// SQLite prepares one statement at a time; drop a trailing `;`.
fn strip_terminator(sql: &str) -> &str {
    sql.trim_end().trim_end_matches(';').trim_end()
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

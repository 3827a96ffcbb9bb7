//! Driver abstraction traits.
//!
//! This module defines the blocking capabilities the streaming layer consumes
//! from a database driver: a provider that hands out connections, the
//! connections themselves, statements compiled on them and the cursors those
//! statements produce. All column and parameter indexes are 1-based.

use crate::error::DriverError;
use crate::types::Value;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// Source of new connections, typically backed by a pool.
pub trait ConnectionProvider: Send + Sync {
    /// Acquire a connection. The caller owns it and must close it.
    ///
    /// # Errors
    ///
    /// Returns `DriverError` if no connection can be obtained.
    fn acquire(&self) -> Result<Box<dyn RawConnection>, DriverError>;
}

impl<F> ConnectionProvider for F
where
    F: Fn() -> Result<Box<dyn RawConnection>, DriverError> + Send + Sync,
{
    fn acquire(&self) -> Result<Box<dyn RawConnection>, DriverError> {
        self()
    }
}

/// Named transaction savepoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    name: String,
}

impl Savepoint {
    /// Create a savepoint marker.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Savepoint name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// An open database connection.
pub trait RawConnection: Send {
    /// Create a plain statement that executes literal SQL text.
    fn create_statement(&mut self) -> Result<Box<dyn RawStatement>, DriverError>;

    /// Compile a statement with `?` placeholders.
    fn prepare_statement(&mut self, sql: &str) -> Result<Box<dyn RawStatement>, DriverError>;

    /// Compile a procedure call of the form `{? = call name(?, ...)}`.
    fn prepare_call(&mut self, sql: &str) -> Result<Box<dyn RawStatement>, DriverError>;

    /// Is auto-commit on.
    fn auto_commit(&self) -> Result<bool, DriverError>;

    /// Turn auto-commit on or off.
    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), DriverError>;

    /// Is the connection read-only.
    fn read_only(&self) -> Result<bool, DriverError>;

    /// Make the connection read-only, or not.
    fn set_read_only(&mut self, read_only: bool) -> Result<(), DriverError>;

    /// Commit the open transaction.
    fn commit(&mut self) -> Result<(), DriverError>;

    /// Roll back the open transaction.
    fn rollback(&mut self) -> Result<(), DriverError>;

    /// Mark a savepoint inside the open transaction.
    fn set_savepoint(&mut self, name: &str) -> Result<Savepoint, DriverError>;

    /// Roll back to a previously marked savepoint.
    fn rollback_to_savepoint(&mut self, savepoint: &Savepoint) -> Result<(), DriverError>;

    /// Has the connection been closed.
    fn is_closed(&self) -> bool;

    /// Close the connection.
    fn close(&mut self) -> Result<(), DriverError>;
}

/// A compiled statement.
pub trait RawStatement: Send {
    /// Bind SQL NULL.
    fn bind_null(&mut self, index: usize) -> Result<(), DriverError>;

    /// Bind a calendar date.
    fn bind_date(&mut self, index: usize, value: NaiveDate) -> Result<(), DriverError>;

    /// Bind a time of day.
    fn bind_time(&mut self, index: usize, value: NaiveTime) -> Result<(), DriverError>;

    /// Bind a timestamp.
    fn bind_timestamp(&mut self, index: usize, value: NaiveDateTime) -> Result<(), DriverError>;

    /// Bind a large binary object.
    fn bind_blob(&mut self, index: usize, value: &[u8]) -> Result<(), DriverError>;

    /// Bind a large character object.
    fn bind_clob(&mut self, index: usize, value: &str) -> Result<(), DriverError>;

    /// Bind any other value, letting the driver pick the representation.
    fn bind_object(&mut self, index: usize, value: &Value) -> Result<(), DriverError>;

    /// Declare an integer output parameter (procedure calls only).
    fn register_out_integer(&mut self, index: usize) -> Result<(), DriverError>;

    /// Execute literal SQL text on a plain statement.
    fn execute_sql(&mut self, sql: &str) -> Result<(), DriverError>;

    /// Execute a prepared statement with its bound parameters.
    fn execute(&mut self) -> Result<(), DriverError>;

    /// Take the cursor produced by the last execution, if it returned rows.
    fn result_cursor(&mut self) -> Result<Option<Box<dyn RawCursor>>, DriverError>;

    /// Read an integer output parameter after execution.
    fn out_integer(&self, index: usize) -> Result<Option<i64>, DriverError>;

    /// Close the statement.
    fn close(&mut self) -> Result<(), DriverError>;
}

/// Forward-only cursor over result rows.
pub trait RawCursor: Send {
    /// Move to the next row, returning `false` when there are no more rows.
    fn advance(&mut self) -> Result<bool, DriverError>;

    /// Number of columns per row.
    fn column_count(&self) -> usize;

    /// Column names in order.
    fn column_names(&self) -> Vec<String>;

    /// Read a column of the current row.
    fn value(&self, index: usize) -> Result<Value, DriverError>;

    /// Whether the last column read was SQL NULL.
    fn was_null(&self) -> bool;

    /// Close the cursor.
    fn close(&mut self) -> Result<(), DriverError>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Mock drivers shared by unit tests.

    use super::*;
    use mockall::mock;

    mock! {
        pub Connection {}

        impl RawConnection for Connection {
            fn create_statement(&mut self) -> Result<Box<dyn RawStatement>, DriverError>;
            fn prepare_statement(&mut self, sql: &str) -> Result<Box<dyn RawStatement>, DriverError>;
            fn prepare_call(&mut self, sql: &str) -> Result<Box<dyn RawStatement>, DriverError>;
            fn auto_commit(&self) -> Result<bool, DriverError>;
            fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), DriverError>;
            fn read_only(&self) -> Result<bool, DriverError>;
            fn set_read_only(&mut self, read_only: bool) -> Result<(), DriverError>;
            fn commit(&mut self) -> Result<(), DriverError>;
            fn rollback(&mut self) -> Result<(), DriverError>;
            fn set_savepoint(&mut self, name: &str) -> Result<Savepoint, DriverError>;
            fn rollback_to_savepoint(&mut self, savepoint: &Savepoint) -> Result<(), DriverError>;
            fn is_closed(&self) -> bool;
            fn close(&mut self) -> Result<(), DriverError>;
        }
    }

    mock! {
        pub Statement {}

        impl RawStatement for Statement {
            fn bind_null(&mut self, index: usize) -> Result<(), DriverError>;
            fn bind_date(&mut self, index: usize, value: NaiveDate) -> Result<(), DriverError>;
            fn bind_time(&mut self, index: usize, value: NaiveTime) -> Result<(), DriverError>;
            fn bind_timestamp(&mut self, index: usize, value: NaiveDateTime) -> Result<(), DriverError>;
            fn bind_blob(&mut self, index: usize, value: &[u8]) -> Result<(), DriverError>;
            fn bind_clob(&mut self, index: usize, value: &str) -> Result<(), DriverError>;
            fn bind_object(&mut self, index: usize, value: &Value) -> Result<(), DriverError>;
            fn register_out_integer(&mut self, index: usize) -> Result<(), DriverError>;
            fn execute_sql(&mut self, sql: &str) -> Result<(), DriverError>;
            fn execute(&mut self) -> Result<(), DriverError>;
            fn result_cursor(&mut self) -> Result<Option<Box<dyn RawCursor>>, DriverError>;
            fn out_integer(&self, index: usize) -> Result<Option<i64>, DriverError>;
            fn close(&mut self) -> Result<(), DriverError>;
        }
    }

    mock! {
        pub Cursor {}

        impl RawCursor for Cursor {
            fn advance(&mut self) -> Result<bool, DriverError>;
            fn column_count(&self) -> usize;
            fn column_names(&self) -> Vec<String>;
            fn value(&self, index: usize) -> Result<Value, DriverError>;
            fn was_null(&self) -> bool;
            fn close(&mut self) -> Result<(), DriverError>;
        }
    }
}

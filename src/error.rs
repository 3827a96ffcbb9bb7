//! Error types for rowline.
//!
//! This module defines domain-specific error types organized by the layer that
//! raises them: the underlying driver, parameter binding, statement execution
//! and connection management.

use crate::types::Value;
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error type encompassing all possible errors.
#[derive(Error, Debug)]
pub enum Error {
    /// A parameter could not be bound onto a statement
    #[error(transparent)]
    Bind(#[from] BindError),

    /// Compiling, executing or reading a statement failed
    #[error(transparent)]
    Statement(#[from] StatementError),

    /// Acquiring, configuring or closing a connection failed
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Failures reported by a driver implementation.
#[derive(Error, Debug)]
pub enum DriverError {
    /// SQLite reported an error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The driver does not support the requested operation
    #[error("Operation not supported: {0}")]
    Unsupported(String),

    /// The handle has already been closed
    #[error("Handle is closed")]
    Closed,

    /// Column index outside of the current row
    #[error("Column index {index} out of range (row has {count} columns)")]
    ColumnOutOfRange { index: usize, count: usize },

    /// Parameter index outside of the statement's placeholders
    #[error("Parameter index {index} out of range (statement has {count} parameters)")]
    ParameterOutOfRange { index: usize, count: usize },

    /// Parameter placeholder left without a value
    #[error("Parameter {index} is not bound")]
    UnboundParameter { index: usize },

    /// Column value cannot be read as the requested type
    #[error("Cannot read column {index} as {expected}: found {found}")]
    TypeMismatch {
        index: usize,
        expected: &'static str,
        found: String,
    },

    /// Column access without a current row
    #[error("Cursor is not positioned on a row")]
    NoCurrentRow,

    /// Any other driver failure
    #[error("{0}")]
    Other(String),
}

/// A parameter value could not be bound onto a statement.
#[derive(Error, Debug)]
#[error("Bad value: index={index}, value={value}: {source}")]
pub struct BindError {
    /// 1-based parameter index
    pub index: usize,
    /// Value that was being bound
    pub value: Value,
    /// Underlying driver failure
    #[source]
    pub source: DriverError,
}

/// Errors related to statement execution, carrying the offending SQL text.
#[derive(Error, Debug)]
pub enum StatementError {
    /// Compiling or executing the statement failed
    #[error("Statement execution failed for `{sql}`: {source}")]
    Execute {
        sql: String,
        #[source]
        source: DriverError,
    },

    /// Advancing the cursor or parsing a row failed
    #[error("Reading results failed for `{sql}`: {source}")]
    Read {
        sql: String,
        #[source]
        source: DriverError,
    },

    /// Closing the cursor or statement failed
    #[error("Releasing statement resources failed for `{sql}`: {source}")]
    Close {
        sql: String,
        #[source]
        source: DriverError,
    },
}

impl StatementError {
    /// SQL text of the failing statement.
    pub fn sql(&self) -> &str {
        match self {
            StatementError::Execute { sql, .. }
            | StatementError::Read { sql, .. }
            | StatementError::Close { sql, .. } => sql,
        }
    }
}

/// Errors related to database connections.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The connection provider could not hand out a connection
    #[error("Failed to acquire connection: {0}")]
    AcquireFailed(#[source] DriverError),

    /// A connection-level operation (commit, auto-commit, ...) failed
    #[error("Connection operation '{operation}' failed: {source}")]
    OperationFailed {
        operation: &'static str,
        #[source]
        source: DriverError,
    },

    /// Closing the connection failed
    #[error("Failed to close connection: {0}")]
    CloseFailed(#[source] DriverError),

    /// Connection is closed
    #[error("Connection is closed")]
    ConnectionClosed,

    /// Invalid connection or session parameter
    #[error("Invalid connection parameter '{parameter}': {message}")]
    InvalidParameter { parameter: String, message: String },

    /// Connection string or configuration parsing error
    #[error("Failed to parse connection string: {0}")]
    ParseError(String),
}

/// Coarse classification of errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Parameter binding
    Bind = 1,
    /// Statement execution
    Statement = 2,
    /// Connection management
    Connection = 3,
    /// Invalid argument or configuration
    InvalidArgument = 4,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Bind => write!(f, "BIND"),
            ErrorKind::Statement => write!(f, "STATEMENT"),
            ErrorKind::Connection => write!(f, "CONNECTION"),
            ErrorKind::InvalidArgument => write!(f, "INVALID_ARGUMENT"),
        }
    }
}

impl Error {
    /// Map to an error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Bind(_) => ErrorKind::Bind,
            Error::Statement(_) => ErrorKind::Statement,
            Error::Connection(e) => e.kind(),
        }
    }

    /// SQL text of the failing statement, when the error concerns one.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Statement(e) => Some(e.sql()),
            _ => None,
        }
    }
}

impl ConnectionError {
    /// Map to an error kind.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectionError::InvalidParameter { .. } | ConnectionError::ParseError(_) => {
                ErrorKind::InvalidArgument
            }
            _ => ErrorKind::Connection,
        }
    }
}

impl From<serde_json::Error> for ConnectionError {
    fn from(err: serde_json::Error) -> Self {
        ConnectionError::ParseError(err.to_string())
    }
}

//! # rowline
//!
//! Resource-safe row streaming over blocking relational database connections.
//!
//! Statements run through a [`Session`], which either acquires a connection
//! per operation from a [`ConnectionProvider`] or runs everything on one fixed
//! connection. Results come back as an eagerly collected `Vec` or as a lazy
//! [`RowStream`]. Every connection, statement and cursor the session opens is
//! closed exactly once, including when a stream is abandoned half-way.
//!
//! ## Example
//!
//! ```
//! use rowline::{params, Session, SqliteParams, SqliteProvider};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let dir = tempfile::tempdir()?;
//! let session = Session::pooled(SqliteProvider::new(SqliteParams::file(
//!     dir.path().join("example.db"),
//! )));
//!
//! session.execute("create table test (x int, s varchar(50))")?;
//! for (x, s) in [(100, "a"), (200, "b"), (300, "a")] {
//!     session.execute(("insert into test (x, s) values (?, ?)", params![x, s]))?;
//! }
//!
//! // Take the first row and abandon the rest; the stream cleans up anyway.
//! let first = session
//!     .stream("select x from test order by x", |row| row.opt_i64(1))?
//!     .next()
//!     .transpose()?;
//! assert_eq!(first, Some(100));
//! assert_eq!(session.count_open_streams(), 0);
//! assert_eq!(session.count_open_connections(), 0);
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod driver;
pub mod error;
pub mod query;
pub mod types;

pub use connection::{Connection, ResourceRegistry, Session, SessionBuilder, SessionConfig};
pub use driver::{
    ConnectionProvider, RawConnection, RawCursor, RawStatement, Savepoint, SqliteConnection,
    SqliteParams, SqliteParamsBuilder, SqliteProvider,
};
pub use error::{
    BindError, ConnectionError, DriverError, Error, ErrorKind, Result, StatementError,
};
pub use query::{
    DefaultController, LoggingController, ParseResult, Row, RowParser, RowStream,
    StatementController, StatementExecutor, StatementSpec, StreamStatus,
};
pub use types::Value;

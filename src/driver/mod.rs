//! Database driver layer.
//!
//! The streaming layer talks to databases through the blocking traits in
//! [`protocol`]. A rusqlite-backed implementation lives in [`sqlite`].

pub mod params;
pub mod protocol;
pub mod sqlite;

pub use params::{SqliteParams, SqliteParamsBuilder, MEMORY_PATH};
pub use protocol::{ConnectionProvider, RawConnection, RawCursor, RawStatement, Savepoint};
pub use sqlite::{SqliteConnection, SqliteCursor, SqliteProvider, SqliteStatement};

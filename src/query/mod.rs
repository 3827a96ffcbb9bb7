//! Statement execution and result handling.
//!
//! The query module is organized into:
//! - `statement` - statement specifications and debug formatting
//! - `controller` - parameter binding, literal rendering and notifications
//! - `executor` - compiling and executing statements, eager result collection
//! - `row` - row access for result parsers
//! - `stream` - lazy row streams and their close protocol

pub mod controller;
pub mod executor;
pub mod row;
pub mod statement;
pub mod stream;

pub use controller::{
    bind_value, format_value, DefaultController, LoggingController, StatementController,
};
pub use executor::{Executed, StatementExecutor};
pub use row::{ParseResult, Row, RowParser};
pub use statement::{StatementSpec, PLACEHOLDER};
pub use stream::{RowStream, StreamStatus};

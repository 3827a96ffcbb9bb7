//! Connection management.
//!
//! This module provides sessions, connection handles and the registry that
//! tracks what a session has open.
//!
//! # Example
//!
//! ```
//! # use rowline::connection::{Session, SessionConfig};
//! # use rowline::driver::{SqliteParams, SqliteProvider};
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::from_json(r#"{"auto_commit": false}"#)?;
//! let session = Session::builder()
//!     .provider(SqliteProvider::new(SqliteParams::memory()))
//!     .config(config)
//!     .build()?;
//!
//! let connection = session.connection()?;
//! connection.execute("create table t (x int)")?;
//! connection.execute("insert into t values (1)")?;
//! connection.commit()?;
//! connection.close()?;
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod handle;
pub mod registry;
pub mod session;

pub use handle::Connection;
pub use registry::ResourceRegistry;
pub use session::{Session, SessionBuilder, SessionConfig};

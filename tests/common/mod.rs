//! Common test utilities for rowline integration tests.
//!
//! Tests run against SQLite database files in temporary directories, so they
//! need no external services and can run in parallel. Each [`TestDb`] owns
//! its directory, which is removed when the value is dropped.
//!
//! Set `RUST_LOG=rowline=debug` to see the crate's tracing output:
//!
//! ```bash
//! RUST_LOG=rowline=debug cargo test --test integration_tests -- --nocapture
//! ```

#![allow(dead_code)]

use rowline::{
    ConnectionProvider, DriverError, RawConnection, Session, SessionConfig, SqliteConnection,
    SqliteParams, SqliteProvider,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use tempfile::TempDir;

static TRACING: Once = Once::new();

/// Install a tracing subscriber honouring `RUST_LOG`, once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A database file in a private temporary directory.
pub struct TestDb {
    dir: TempDir,
}

impl TestDb {
    pub fn new() -> Self {
        init_tracing();
        Self {
            dir: tempfile::tempdir().expect("Failed to create temporary directory"),
        }
    }

    pub fn params(&self) -> SqliteParams {
        SqliteParams::file(self.dir.path().join("test.db"))
    }

    pub fn provider(&self) -> SqliteProvider {
        SqliteProvider::new(self.params())
    }

    /// Pooled session opening a new connection per operation.
    pub fn pooled_session(&self) -> Session {
        Session::pooled(self.provider())
    }

    /// Pooled session that applies `config` to every connection.
    pub fn configured_session(&self, config: SessionConfig) -> Session {
        Session::builder()
            .provider(self.provider())
            .config(config)
            .build()
            .expect("Failed to build session")
    }

    /// Open a connection outside of any session.
    pub fn open(&self) -> SqliteConnection {
        SqliteConnection::open(&self.params()).expect("Failed to open database")
    }
}

/// Provider wrapper counting acquired connections.
pub struct CountingProvider {
    inner: SqliteProvider,
    acquired: Arc<AtomicUsize>,
}

impl CountingProvider {
    pub fn new(inner: SqliteProvider) -> (Self, Arc<AtomicUsize>) {
        let acquired = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner,
                acquired: Arc::clone(&acquired),
            },
            acquired,
        )
    }
}

impl ConnectionProvider for CountingProvider {
    fn acquire(&self) -> Result<Box<dyn RawConnection>, DriverError> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        self.inner.acquire()
    }
}

/// Create the `test(x int, s varchar(50))` table with the standard rows.
pub fn seed_test_table(session: &Session) {
    session
        .execute("create table test (x int, s varchar(50))")
        .expect("Failed to create table");
    for (x, s) in [(100, "a"), (200, "b"), (300, "a")] {
        session
            .execute((
                "insert into test (x, s) values (?, ?)",
                rowline::params![x, s],
            ))
            .expect("Failed to insert row");
    }
}

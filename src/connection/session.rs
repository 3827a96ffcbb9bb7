//! Sessions: the entry point for running statements.
//!
//! A [`Session`] either acquires a fresh connection from a
//! [`ConnectionProvider`] for every operation (pooled mode) or runs every
//! operation on one connection supplied up front (fixed mode). It tracks the
//! connections and streams it has open so [`Session::close`] can shut them
//! all down.

use crate::connection::handle::{Connection, ConnectionCore};
use crate::connection::registry::ResourceRegistry;
use crate::driver::{ConnectionProvider, RawConnection};
use crate::error::{ConnectionError, Result};
use crate::query::controller::{DefaultController, LoggingController, StatementController};
use crate::query::executor::StatementExecutor;
use crate::query::row::{ParseResult, Row};
use crate::query::statement::{StatementSpec, PLACEHOLDER};
use crate::query::stream::{RowStream, StreamCore};
use crate::types::Value;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Placeholder used when rendering statements for logs
    pub placeholder: String,

    /// Auto-commit mode applied to every acquired connection
    pub auto_commit: Option<bool>,

    /// Read-only mode applied to every acquired connection
    pub read_only: Option<bool>,

    /// Log statements through `tracing` when no controller is given
    pub log_statements: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            placeholder: PLACEHOLDER.to_string(),
            auto_commit: None,
            read_only: None,
            log_statements: false,
        }
    }
}

impl SessionConfig {
    /// Parse and validate a JSON configuration. Missing fields take defaults.
    pub fn from_json(json: &str) -> std::result::Result<Self, ConnectionError> {
        let config: SessionConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for invalid values.
    pub fn validate(&self) -> std::result::Result<(), ConnectionError> {
        if self.placeholder.is_empty() {
            return Err(ConnectionError::InvalidParameter {
                parameter: "placeholder".to_string(),
                message: "Placeholder cannot be empty".to_string(),
            });
        }
        Ok(())
    }
}

enum ConnectionSource {
    Pooled(Arc<dyn ConnectionProvider>),
    Fixed(Arc<ConnectionCore>),
}

struct SessionInner {
    source: ConnectionSource,
    executor: StatementExecutor,
    registry: Arc<ResourceRegistry>,
    config: SessionConfig,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Err(e) = self.registry.force_close_all() {
            tracing::warn!(error = %e, "Failed to close session resources on drop");
        }
    }
}

/// Entry point for running statements.
///
/// Cloning a session is cheap; clones share connections, streams and the
/// registry. When the last clone is dropped, whatever is still open is
/// closed.
///
/// # Examples
///
/// ```
/// use rowline::{params, Session, SqliteParams, SqliteProvider};
///
/// let dir = tempfile::tempdir()?;
/// let provider = SqliteProvider::new(SqliteParams::file(dir.path().join("demo.db")));
/// let session = Session::pooled(provider);
///
/// session.execute("create table test (x int, s varchar(50))")?;
/// session.execute(("insert into test values (?, ?)", params![100, "a"]))?;
///
/// let xs = session.list("select x from test", |row| row.opt_i64(1))?;
/// assert_eq!(xs, vec![100]);
/// assert_eq!(session.count_open_connections(), 0);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session that acquires a connection per operation.
    pub fn pooled(provider: impl ConnectionProvider + 'static) -> Self {
        Self::build(
            ConnectionSourceSpec::Pooled(Arc::new(provider)),
            None,
            SessionConfig::default(),
        )
    }

    /// Create a session that runs everything on `connection`.
    ///
    /// The session never closes a fixed connection; the caller keeps that
    /// responsibility.
    pub fn fixed(connection: Box<dyn RawConnection>) -> Self {
        Self::build(
            ConnectionSourceSpec::Fixed(connection),
            None,
            SessionConfig::default(),
        )
    }

    /// Create a SessionBuilder.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    fn build(
        source: ConnectionSourceSpec,
        controller: Option<Arc<dyn StatementController>>,
        config: SessionConfig,
    ) -> Self {
        let controller: Arc<dyn StatementController> = match controller {
            Some(controller) => controller,
            None if config.log_statements => Arc::new(
                LoggingController::new().with_placeholder(config.placeholder.clone()),
            ),
            None => Arc::new(DefaultController),
        };
        let executor = StatementExecutor::new(controller);
        let registry = Arc::new(ResourceRegistry::new());

        let source = match source {
            ConnectionSourceSpec::Pooled(provider) => ConnectionSource::Pooled(provider),
            ConnectionSourceSpec::Fixed(raw) => ConnectionSource::Fixed(ConnectionCore::register(
                raw,
                false,
                executor.clone(),
                &registry,
            )),
        };

        Self {
            inner: Arc::new(SessionInner {
                source,
                executor,
                registry,
                config,
            }),
        }
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// The controller used for binding and notifications.
    pub fn controller(&self) -> &Arc<dyn StatementController> {
        self.inner.executor.controller()
    }

    /// Whether connections are acquired per operation.
    pub fn is_pooled(&self) -> bool {
        matches!(self.inner.source, ConnectionSource::Pooled(_))
    }

    /// Get a connection for several operations in a row.
    ///
    /// In pooled mode this acquires a new connection that closes when the
    /// handle is closed or dropped. In fixed mode it returns a handle to the
    /// fixed connection, which closing leaves open.
    pub fn connection(&self) -> Result<Connection> {
        Ok(Connection::new(self.acquire()?))
    }

    fn acquire(&self) -> Result<Arc<ConnectionCore>> {
        let provider = match &self.inner.source {
            ConnectionSource::Fixed(core) => return Ok(Arc::clone(core)),
            ConnectionSource::Pooled(provider) => provider,
        };

        let mut raw = provider.acquire().map_err(ConnectionError::AcquireFailed)?;
        if let Err(err) = self.configure(&mut *raw) {
            if let Err(close_err) = raw.close() {
                tracing::warn!(error = %close_err, "Failed to close misconfigured connection");
            }
            return Err(err.into());
        }

        self.controller().on_connect(&*raw);
        let core = ConnectionCore::register(
            raw,
            true,
            self.inner.executor.clone(),
            &self.inner.registry,
        );
        tracing::debug!(connection = core.id(), "Connection acquired");
        Ok(core)
    }

    fn configure(&self, raw: &mut dyn RawConnection) -> std::result::Result<(), ConnectionError> {
        let config = &self.inner.config;
        if let Some(auto_commit) = config.auto_commit {
            raw.set_auto_commit(auto_commit)
                .map_err(|source| ConnectionError::OperationFailed {
                    operation: "set_auto_commit",
                    source,
                })?;
        }
        if let Some(read_only) = config.read_only {
            raw.set_read_only(read_only)
                .map_err(|source| ConnectionError::OperationFailed {
                    operation: "set_read_only",
                    source,
                })?;
        }
        Ok(())
    }

    /// Run `f` on a connection that is closed afterwards when owned.
    fn with_connection<R>(&self, f: impl FnOnce(&Connection) -> Result<R>) -> Result<R> {
        let connection = self.connection()?;
        let result = f(&connection);
        let closed = connection.close();
        let value = result?;
        closed?;
        Ok(value)
    }

    /// Run a query and collect the rows the parser keeps.
    pub fn list<T, F>(&self, statement: impl Into<StatementSpec>, parser: F) -> Result<Vec<T>>
    where
        F: Fn(&Row<'_>) -> ParseResult<T>,
    {
        let spec = statement.into();
        self.with_connection(|connection| connection.list(spec, parser))
    }

    /// Run a query and stream its rows lazily.
    ///
    /// In pooled mode the stream owns the connection it runs on and closes it
    /// together with its cursor and statement.
    pub fn stream<T, F>(
        &self,
        statement: impl Into<StatementSpec>,
        parser: F,
    ) -> Result<RowStream<'static, T>>
    where
        F: Fn(&Row<'_>) -> ParseResult<T> + Send + 'static,
    {
        let spec = statement.into();
        let connection = self.acquire()?;
        let owns_connection = self.is_pooled();
        let core = StreamCore::open(
            connection,
            owns_connection,
            spec,
            Arc::downgrade(&self.inner.registry),
        )?;
        Ok(RowStream::new(core, Box::new(parser)))
    }

    /// Execute a statement for its effect.
    pub fn execute(&self, statement: impl Into<StatementSpec>) -> Result<()> {
        let spec = statement.into();
        self.with_connection(|connection| connection.execute(spec))
    }

    /// Call a stored procedure and return its integer return code.
    pub fn call_procedure(&self, name: &str, args: &[Value]) -> Result<i32> {
        self.with_connection(|connection| connection.call_procedure(name, args))
    }

    /// Render a statement with its parameters inline, for logging.
    pub fn format(&self, statement: &StatementSpec) -> StatementSpec {
        statement.format_with(self.controller().as_ref(), &self.inner.config.placeholder)
    }

    /// Number of open connections the session owns.
    pub fn count_open_connections(&self) -> usize {
        self.inner.registry.open_connections()
    }

    /// Number of open streams.
    pub fn count_open_streams(&self) -> usize {
        self.inner.registry.open_streams()
    }

    /// Close every open stream, then every open connection the session owns.
    ///
    /// A fixed connection stays open. The session remains usable afterwards.
    pub fn close(&self) -> Result<()> {
        self.inner.registry.force_close_all()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("pooled", &self.is_pooled())
            .field("config", &self.inner.config)
            .field("registry", &self.inner.registry)
            .finish()
    }
}

enum ConnectionSourceSpec {
    Pooled(Arc<dyn ConnectionProvider>),
    Fixed(Box<dyn RawConnection>),
}

/// Builder for sessions with a custom controller or configuration.
#[derive(Default)]
pub struct SessionBuilder {
    provider: Option<Arc<dyn ConnectionProvider>>,
    fixed: Option<Box<dyn RawConnection>>,
    controller: Option<Arc<dyn StatementController>>,
    config: SessionConfig,
}

impl SessionBuilder {
    /// Create a new SessionBuilder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire connections from `provider` (pooled mode).
    pub fn provider(mut self, provider: impl ConnectionProvider + 'static) -> Self {
        self.provider = Some(Arc::new(provider));
        self
    }

    /// Run everything on `connection` (fixed mode).
    pub fn fixed(mut self, connection: Box<dyn RawConnection>) -> Self {
        self.fixed = Some(connection);
        self
    }

    /// Bind, format and notify through `controller`.
    pub fn controller(mut self, controller: Arc<dyn StatementController>) -> Self {
        self.controller = Some(controller);
        self
    }

    /// Set the session configuration.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the session.
    ///
    /// Exactly one of a provider or a fixed connection must be given.
    pub fn build(self) -> std::result::Result<Session, ConnectionError> {
        self.config.validate()?;

        let source = match (self.provider, self.fixed) {
            (Some(provider), None) => ConnectionSourceSpec::Pooled(provider),
            (None, Some(fixed)) => ConnectionSourceSpec::Fixed(fixed),
            (None, None) => {
                return Err(ConnectionError::InvalidParameter {
                    parameter: "connection".to_string(),
                    message: "Either a provider or a fixed connection is required".to_string(),
                })
            }
            (Some(_), Some(_)) => {
                return Err(ConnectionError::InvalidParameter {
                    parameter: "connection".to_string(),
                    message: "A provider and a fixed connection are mutually exclusive"
                        .to_string(),
                })
            }
        };

        Ok(Session::build(source, self.controller, self.config))
    }
}

//! SQLite connection parameter parsing and validation.
//!
//! Parameters are built either with [`SqliteParamsBuilder`] or parsed from a
//! connection string of the form
//! `sqlite://<path>[?busy_timeout=<ms>&read_only=<bool>&create=<bool>]`,
//! where `<path>` may be the special name `:memory:`.

use crate::error::ConnectionError;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Path naming a private in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

const SCHEME: &str = "sqlite://";

/// Parameters for opening SQLite connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteParams {
    /// Database file path, or `:memory:`
    pub path: String,

    /// How long to wait for a locked database before failing
    pub busy_timeout: Duration,

    /// Open the database read-only
    pub read_only: bool,

    /// Create the database file if it does not exist
    pub create: bool,
}

impl SqliteParams {
    /// Create a new SqliteParamsBuilder.
    pub fn builder() -> SqliteParamsBuilder {
        SqliteParamsBuilder::new()
    }

    /// Parameters for a file database with default options.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_string_lossy().into_owned(),
            busy_timeout: Duration::from_secs(5),
            read_only: false,
            create: true,
        }
    }

    /// Parameters for a private in-memory database.
    pub fn memory() -> Self {
        Self::file(MEMORY_PATH)
    }

    /// Whether the parameters name an in-memory database.
    pub fn is_memory(&self) -> bool {
        self.path == MEMORY_PATH
    }
}

impl FromStr for SqliteParams {
    type Err = ConnectionError;

    /// Parse a connection string.
    ///
    /// # Examples
    ///
    /// ```
    /// # use rowline::driver::SqliteParams;
    /// # use std::str::FromStr;
    /// let params = SqliteParams::from_str("sqlite:///var/data/app.db?busy_timeout=250")?;
    /// assert_eq!(params.path, "/var/data/app.db");
    ///
    /// let params = SqliteParams::from_str("sqlite://:memory:")?;
    /// assert!(params.is_memory());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let url = s.trim();

        let rest = url.strip_prefix(SCHEME).ok_or_else(|| {
            ConnectionError::ParseError(format!(
                "Connection string must start with '{}'",
                SCHEME
            ))
        })?;

        let (path_part, query_string) = match rest.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (rest, None),
        };

        let path = urlencoding::decode(path_part)
            .map_err(|e| ConnectionError::ParseError(format!("Failed to decode path: {}", e)))?
            .into_owned();

        let params = parse_query_params(query_string)?;
        let builder = SqliteParamsBuilder::new().path(&path);

        apply_query_params(builder, params)?.build()
    }
}

impl fmt::Display for SqliteParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}?busy_timeout={}&read_only={}&create={}",
            SCHEME,
            self.path,
            self.busy_timeout.as_millis(),
            self.read_only,
            self.create
        )
    }
}

/// Builder for constructing SqliteParams with validation.
#[derive(Debug, Clone, Default)]
pub struct SqliteParamsBuilder {
    path: Option<String>,
    busy_timeout: Option<Duration>,
    read_only: Option<bool>,
    create: Option<bool>,
}

impl SqliteParamsBuilder {
    /// Create a new SqliteParamsBuilder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database path.
    pub fn path(mut self, path: &str) -> Self {
        self.path = Some(path.to_string());
        self
    }

    /// Use a private in-memory database.
    pub fn memory(self) -> Self {
        self.path(MEMORY_PATH)
    }

    /// Set the busy timeout.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }

    /// Open read-only, or not.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = Some(read_only);
        self
    }

    /// Create the file if missing, or not.
    pub fn create(mut self, create: bool) -> Self {
        self.create = Some(create);
        self
    }

    /// Build the SqliteParams with validation.
    pub fn build(self) -> Result<SqliteParams, ConnectionError> {
        let path = self.path.ok_or_else(|| ConnectionError::InvalidParameter {
            parameter: "path".to_string(),
            message: "Path is required".to_string(),
        })?;

        if path.trim().is_empty() {
            return Err(ConnectionError::InvalidParameter {
                parameter: "path".to_string(),
                message: "Path cannot be empty".to_string(),
            });
        }

        let busy_timeout = self.busy_timeout.unwrap_or(Duration::from_secs(5));
        if busy_timeout > Duration::from_secs(600) {
            return Err(ConnectionError::InvalidParameter {
                parameter: "busy_timeout".to_string(),
                message: "Busy timeout cannot exceed 600 seconds".to_string(),
            });
        }

        let read_only = self.read_only.unwrap_or(false);
        let create = self.create.unwrap_or(!read_only);

        if read_only && create {
            return Err(ConnectionError::InvalidParameter {
                parameter: "create".to_string(),
                message: "A read-only database cannot be created".to_string(),
            });
        }

        Ok(SqliteParams {
            path,
            busy_timeout,
            read_only,
            create,
        })
    }
}

/// Parse query parameters from URL query string.
fn parse_query_params(query: Option<&str>) -> Result<HashMap<String, String>, ConnectionError> {
    let mut params = HashMap::new();

    if let Some(query) = query {
        for pair in query.split('&') {
            if pair.is_empty() {
                continue;
            }

            let (key, value) = pair.split_once('=').ok_or_else(|| {
                ConnectionError::ParseError(format!("Invalid query parameter format: {}", pair))
            })?;

            let value = urlencoding::decode(value)
                .map_err(|e| ConnectionError::ParseError(format!("Failed to decode value: {}", e)))?
                .into_owned();

            params.insert(key.to_lowercase(), value);
        }
    }

    Ok(params)
}

/// Apply query parameters to builder.
fn apply_query_params(
    mut builder: SqliteParamsBuilder,
    params: HashMap<String, String>,
) -> Result<SqliteParamsBuilder, ConnectionError> {
    for (key, value) in params {
        match key.as_str() {
            "busy_timeout" | "timeout" => {
                let millis: u64 = value
                    .parse()
                    .map_err(|_| ConnectionError::InvalidParameter {
                        parameter: key.clone(),
                        message: format!("Invalid timeout value: {}", value),
                    })?;
                builder = builder.busy_timeout(Duration::from_millis(millis));
            }
            "read_only" | "readonly" => {
                builder = builder.read_only(parse_bool(&key, &value)?);
            }
            "create" => {
                builder = builder.create(parse_bool(&key, &value)?);
            }
            _ => {
                return Err(ConnectionError::InvalidParameter {
                    parameter: key,
                    message: "Unknown parameter".to_string(),
                });
            }
        }
    }

    Ok(builder)
}

/// Parse boolean value from string.
fn parse_bool(key: &str, s: &str) -> Result<bool, ConnectionError> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConnectionError::InvalidParameter {
            parameter: key.to_string(),
            message: format!("Invalid boolean value: {}", s),
        }),
    }
}

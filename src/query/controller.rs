//! Parameter binding, literal rendering and execution notifications.
//!
//! A [`StatementController`] is supplied when a session is built and shared by
//! every connection, statement and stream of that session. All methods have
//! defaults, so an implementation only overrides what it needs.

use crate::driver::{RawConnection, RawStatement};
use crate::error::{BindError, Error};
use crate::query::statement::{StatementSpec, PLACEHOLDER};
use crate::types::{has_time_component, Value};
use chrono::NaiveDateTime;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

const DATE_LITERAL: &str = "%Y-%m-%d";
const TIME_LITERAL: &str = "%H:%M:%S";
const TIMESTAMP_LITERAL: &str = "%Y-%m-%d %H:%M:%S";

/// Binds parameters, renders literals and observes statement execution.
pub trait StatementController: Send + Sync {
    /// Bind one value onto a statement slot (1-based).
    fn bind(
        &self,
        statement: &mut dyn RawStatement,
        index: usize,
        value: &Value,
    ) -> Result<(), BindError> {
        bind_value(statement, index, value)
    }

    /// Bind consecutive values starting at `first_index`.
    fn bind_all(
        &self,
        statement: &mut dyn RawStatement,
        first_index: usize,
        values: &[Value],
    ) -> Result<(), BindError> {
        for (offset, value) in values.iter().enumerate() {
            self.bind(statement, first_index + offset, value)?;
        }
        Ok(())
    }

    /// Render a value as a SQL literal for logging, or `None` if the value
    /// has no literal form.
    fn format(&self, value: &Value) -> Option<String> {
        format_value(value)
    }

    /// A connection was acquired.
    fn on_connect(&self, _connection: &dyn RawConnection) {}

    /// A connection is about to be closed.
    fn on_disconnect(&self, _connection: &dyn RawConnection) {}

    /// A statement is about to execute.
    fn on_execute_start(&self, _statement: &StatementSpec) {}

    /// A statement failed; called before the error is returned.
    fn on_execute_fail(&self, _statement: &StatementSpec, _cause: &Error) {}

    /// A statement finished. For streams this happens when the stream closes.
    fn on_execute_complete(&self, _statement: &StatementSpec) {}
}

/// Bind a value, choosing the driver call from the value's type.
///
/// A generic [`Value::DateTime`] binds as a date when it falls on midnight and
/// as a timestamp otherwise.
pub fn bind_value(
    statement: &mut dyn RawStatement,
    index: usize,
    value: &Value,
) -> Result<(), BindError> {
    let result = match value {
        Value::Null => statement.bind_null(index),
        Value::Date(date) => statement.bind_date(index, *date),
        Value::Time(time) => statement.bind_time(index, *time),
        Value::Timestamp(ts) => statement.bind_timestamp(index, *ts),
        Value::DateTime(dt) if has_time_component(dt) => statement.bind_timestamp(index, *dt),
        Value::DateTime(dt) => statement.bind_date(index, dt.date()),
        Value::Blob(bytes) => statement.bind_blob(index, bytes),
        Value::Clob(text) => statement.bind_clob(index, text),
        other => statement.bind_object(index, other),
    };

    result.map_err(|source| BindError {
        index,
        value: value.clone(),
        source,
    })
}

/// Render a value as a SQL literal.
///
/// Strings are single-quoted with embedded quotes doubled. Numbers use their
/// decimal text. Values without a literal form (booleans, binary data, large
/// objects, non-finite floats) yield `None`.
pub fn format_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("NULL".to_string()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Float(f) if f.is_finite() => Some(f.to_string()),
        Value::String(s) => Some(quote(s)),
        Value::Date(date) => Some(quote(&date.format(DATE_LITERAL).to_string())),
        Value::Time(time) => Some(quote(&time.format(TIME_LITERAL).to_string())),
        Value::Timestamp(ts) | Value::DateTime(ts) => Some(quote(&temporal_literal(ts))),
        _ => None,
    }
}

fn temporal_literal(value: &NaiveDateTime) -> String {
    if has_time_component(value) {
        value.format(TIMESTAMP_LITERAL).to_string()
    } else {
        value.format(DATE_LITERAL).to_string()
    }
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Controller with the default binding and no-op notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultController;

impl StatementController for DefaultController {}

/// Controller that logs every notification through `tracing`.
///
/// Binding and formatting are delegated to the wrapped controller, and so are
/// notifications once they have been logged.
pub struct LoggingController {
    inner: Arc<dyn StatementController>,
    placeholder: String,
    started: Mutex<HashMap<String, Vec<Instant>>>,
}

impl LoggingController {
    /// Log around the default controller.
    pub fn new() -> Self {
        Self::wrap(Arc::new(DefaultController))
    }

    /// Log around another controller.
    pub fn wrap(inner: Arc<dyn StatementController>) -> Self {
        Self {
            inner,
            placeholder: PLACEHOLDER.to_string(),
            started: Mutex::new(HashMap::new()),
        }
    }

    /// Placeholder used when rendering statements into log lines.
    pub fn with_placeholder(mut self, placeholder: impl Into<String>) -> Self {
        self.placeholder = placeholder.into();
        self
    }

    fn render(&self, statement: &StatementSpec) -> String {
        statement
            .format_with(self.inner.as_ref(), &self.placeholder)
            .to_string()
    }

    fn take_start(&self, statement: &StatementSpec) -> Option<Instant> {
        let mut started = self.started.lock();
        let stack = started.get_mut(statement.sql())?;
        let start = stack.pop();
        if stack.is_empty() {
            started.remove(statement.sql());
        }
        start
    }
}

impl Default for LoggingController {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LoggingController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoggingController")
            .field("placeholder", &self.placeholder)
            .finish_non_exhaustive()
    }
}

impl StatementController for LoggingController {
    fn bind(
        &self,
        statement: &mut dyn RawStatement,
        index: usize,
        value: &Value,
    ) -> Result<(), BindError> {
        self.inner.bind(statement, index, value)
    }

    fn format(&self, value: &Value) -> Option<String> {
        self.inner.format(value)
    }

    fn on_connect(&self, connection: &dyn RawConnection) {
        tracing::debug!("Connection opened");
        self.inner.on_connect(connection);
    }

    fn on_disconnect(&self, connection: &dyn RawConnection) {
        tracing::debug!("Connection closing");
        self.inner.on_disconnect(connection);
    }

    fn on_execute_start(&self, statement: &StatementSpec) {
        tracing::debug!(sql = %self.render(statement), "Executing statement");
        self.started
            .lock()
            .entry(statement.sql().to_string())
            .or_default()
            .push(Instant::now());
        self.inner.on_execute_start(statement);
    }

    fn on_execute_fail(&self, statement: &StatementSpec, cause: &Error) {
        let elapsed = self.take_start(statement).map(|start| start.elapsed());
        tracing::warn!(
            sql = %self.render(statement),
            elapsed = ?elapsed,
            error = %cause,
            "Statement failed"
        );
        self.inner.on_execute_fail(statement, cause);
    }

    fn on_execute_complete(&self, statement: &StatementSpec) {
        let elapsed = self.take_start(statement).map(|start| start.elapsed());
        tracing::debug!(
            sql = %self.render(statement),
            elapsed = ?elapsed,
            "Statement completed"
        );
        self.inner.on_execute_complete(statement);
    }
}

//! Statement specifications.
//!
//! A [`StatementSpec`] is the SQL text of one statement together with its
//! positional `?` parameters. It is built per call and never mutated.

use crate::query::controller::StatementController;
use crate::types::Value;
use std::fmt;

/// Placeholder marking a positional parameter in SQL text.
pub const PLACEHOLDER: &str = "?";

/// SQL text plus ordered positional parameter values.
#[derive(Debug, Clone, PartialEq)]
pub struct StatementSpec {
    sql: String,
    parameters: Vec<Value>,
}

impl StatementSpec {
    /// Create a statement with positional parameters.
    pub fn new(sql: impl Into<String>, parameters: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            parameters,
        }
    }

    /// Create a statement without parameters.
    pub fn simple(sql: impl Into<String>) -> Self {
        Self::new(sql, Vec::new())
    }

    /// SQL text.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Positional parameter values, in placeholder order.
    pub fn parameters(&self) -> &[Value] {
        &self.parameters
    }

    /// A simple statement has no parameters and executes as plain SQL text.
    pub fn is_simple(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Render parameters inline for logging, using `?` placeholders.
    ///
    /// See [`format_with`](Self::format_with).
    pub fn format(&self, controller: &dyn StatementController) -> StatementSpec {
        self.format_with(controller, PLACEHOLDER)
    }

    /// Render parameters inline for logging.
    ///
    /// Each placeholder is replaced by the controller's literal rendering of
    /// the matching parameter. Parameters the controller cannot render keep
    /// their placeholder and are carried over into the parameters of the
    /// returned spec, as are parameters without a matching placeholder.
    ///
    /// The output is meant for humans. Rendering is not escaping, so never
    /// execute the returned text.
    ///
    /// # Examples
    ///
    /// ```
    /// use rowline::{params, DefaultController, StatementSpec};
    ///
    /// let spec = StatementSpec::new("select * from t where x = ? and s = ?", params![42, "O'Brien"]);
    /// let formatted = spec.format(&DefaultController);
    /// assert_eq!(formatted.sql(), "select * from t where x = 42 and s = 'O''Brien'");
    /// assert!(formatted.parameters().is_empty());
    /// ```
    pub fn format_with(
        &self,
        controller: &dyn StatementController,
        placeholder: &str,
    ) -> StatementSpec {
        if placeholder.is_empty() || self.parameters.is_empty() {
            return self.clone();
        }

        let mut sql = String::with_capacity(self.sql.len());
        let mut residual = Vec::new();
        let mut parameters = self.parameters.iter();
        let mut pieces = self.sql.split(placeholder);

        if let Some(first) = pieces.next() {
            sql.push_str(first);
        }
        for piece in pieces {
            match parameters.next() {
                Some(value) => match controller.format(value) {
                    Some(literal) => sql.push_str(&literal),
                    None => {
                        sql.push_str(placeholder);
                        residual.push(value.clone());
                    }
                },
                None => sql.push_str(placeholder),
            }
            sql.push_str(piece);
        }
        residual.extend(parameters.cloned());

        StatementSpec::new(sql, residual)
    }
}

impl fmt::Display for StatementSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.parameters.is_empty() {
            return write!(f, "{}", self.sql);
        }
        write!(f, "{} [", self.sql)?;
        for (i, value) in self.parameters.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, "]")
    }
}

impl From<&str> for StatementSpec {
    fn from(sql: &str) -> Self {
        StatementSpec::simple(sql)
    }
}

impl From<String> for StatementSpec {
    fn from(sql: String) -> Self {
        StatementSpec::simple(sql)
    }
}

impl<S: Into<String>> From<(S, Vec<Value>)> for StatementSpec {
    fn from((sql, parameters): (S, Vec<Value>)) -> Self {
        StatementSpec::new(sql, parameters)
    }
}

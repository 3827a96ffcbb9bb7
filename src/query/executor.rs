//! Statement execution.
//!
//! [`StatementExecutor`] compiles a [`StatementSpec`] on a raw connection,
//! binds its parameters through the session's [`StatementController`] and
//! executes it. The statement and its cursor are held by an [`Executed`]
//! guard that releases them on every exit path.

use crate::driver::{RawConnection, RawCursor, RawStatement};
use crate::error::{DriverError, Error, Result, StatementError};
use crate::query::controller::StatementController;
use crate::query::row::{ParseResult, Row};
use crate::query::statement::StatementSpec;
use crate::types::Value;
use std::sync::Arc;

/// Statement and optional cursor produced by one execution.
///
/// Dropping the guard releases both; call [`release`](Self::release) to
/// observe failures.
pub struct Executed {
    statement: Option<Box<dyn RawStatement>>,
    cursor: Option<Box<dyn RawCursor>>,
}

impl Executed {
    fn new(statement: Box<dyn RawStatement>) -> Self {
        Self {
            statement: Some(statement),
            cursor: None,
        }
    }

    /// Whether the statement produced a result cursor.
    pub fn has_cursor(&self) -> bool {
        self.cursor.is_some()
    }

    pub(crate) fn cursor_mut(&mut self) -> Option<&mut (dyn RawCursor + 'static)> {
        self.cursor.as_deref_mut()
    }

    fn statement_mut(&mut self) -> std::result::Result<&mut (dyn RawStatement + 'static), DriverError> {
        self.statement.as_deref_mut().ok_or(DriverError::Closed)
    }

    /// Close the cursor, then the statement.
    ///
    /// Both closes are attempted; the first failure is returned. Releasing
    /// twice is a no-op.
    pub fn release(&mut self) -> std::result::Result<(), DriverError> {
        let cursor = self.cursor.take().map(|mut cursor| cursor.close());
        let statement = self.statement.take().map(|mut statement| statement.close());

        cursor.unwrap_or(Ok(()))?;
        statement.unwrap_or(Ok(()))
    }
}

impl Drop for Executed {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!(error = %e, "Failed to release statement resources");
        }
    }
}

/// Compiles, binds and executes statements.
#[derive(Clone)]
pub struct StatementExecutor {
    controller: Arc<dyn StatementController>,
}

impl StatementExecutor {
    /// Create an executor that binds and notifies through `controller`.
    pub fn new(controller: Arc<dyn StatementController>) -> Self {
        Self { controller }
    }

    /// The controller used for binding and notifications.
    pub fn controller(&self) -> &Arc<dyn StatementController> {
        &self.controller
    }

    /// Execute a statement and hand back its statement and cursor.
    ///
    /// Simple statements execute as plain SQL text; parameterized ones are
    /// prepared and bound from index 1. Fires `on_execute_start`, and
    /// `on_execute_fail` before returning an error. Completion is left to the
    /// caller, which knows when the results have been consumed.
    pub fn execute(&self, conn: &mut dyn RawConnection, spec: &StatementSpec) -> Result<Executed> {
        self.controller.on_execute_start(spec);
        self.compile(conn, spec).map_err(|err| {
            self.controller.on_execute_fail(spec, &err);
            err
        })
    }

    fn compile(&self, conn: &mut dyn RawConnection, spec: &StatementSpec) -> Result<Executed> {
        let mut executed = if spec.is_simple() {
            let statement = conn
                .create_statement()
                .map_err(|source| execute_error(spec, source))?;
            let mut executed = Executed::new(statement);
            executed
                .statement_mut()
                .and_then(|statement| statement.execute_sql(spec.sql()))
                .map_err(|source| execute_error(spec, source))?;
            executed
        } else {
            let statement = conn
                .prepare_statement(spec.sql())
                .map_err(|source| execute_error(spec, source))?;
            let mut executed = Executed::new(statement);
            let statement = executed
                .statement_mut()
                .map_err(|source| execute_error(spec, source))?;
            self.controller.bind_all(statement, 1, spec.parameters())?;
            statement
                .execute()
                .map_err(|source| execute_error(spec, source))?;
            executed
        };

        executed.cursor = executed
            .statement_mut()
            .and_then(|statement| statement.result_cursor())
            .map_err(|source| execute_error(spec, source))?;

        Ok(executed)
    }

    /// Execute a query and parse every row, skipping rows the parser skips.
    ///
    /// Statement and cursor are released before returning, whether or not
    /// parsing succeeded.
    pub fn collect_list<T, F>(
        &self,
        conn: &mut dyn RawConnection,
        spec: &StatementSpec,
        parser: F,
    ) -> Result<Vec<T>>
    where
        F: Fn(&Row<'_>) -> ParseResult<T>,
    {
        let mut executed = self.execute(conn, spec)?;
        let rows = drain(&mut executed, spec, &parser);
        self.finish(executed, spec, rows)
    }

    /// Execute a statement for its effect.
    pub fn execute_no_result(&self, conn: &mut dyn RawConnection, spec: &StatementSpec) -> Result<()> {
        let executed = self.execute(conn, spec)?;
        self.finish(executed, spec, Ok(()))
    }

    /// Call a stored procedure and return its integer return code.
    ///
    /// Issues `{? = call name(?, ...)}` with the return code registered as
    /// output parameter 1 and `args` bound from index 2. A procedure that
    /// returns NULL yields 0.
    pub fn call_procedure(
        &self,
        conn: &mut dyn RawConnection,
        name: &str,
        args: &[Value],
    ) -> Result<i32> {
        let placeholders = vec!["?"; args.len()].join(",");
        let spec = StatementSpec::new(
            format!("{{? = call {}({})}}", name, placeholders),
            args.to_vec(),
        );

        self.controller.on_execute_start(&spec);
        let called = self.call(conn, &spec);
        match called {
            Ok((executed, code)) => self.finish(executed, &spec, Ok(code)),
            Err(err) => {
                self.controller.on_execute_fail(&spec, &err);
                Err(err)
            }
        }
    }

    fn call(&self, conn: &mut dyn RawConnection, spec: &StatementSpec) -> Result<(Executed, i32)> {
        let statement = conn
            .prepare_call(spec.sql())
            .map_err(|source| execute_error(spec, source))?;
        let mut executed = Executed::new(statement);
        let statement = executed
            .statement_mut()
            .map_err(|source| execute_error(spec, source))?;

        statement
            .register_out_integer(1)
            .map_err(|source| execute_error(spec, source))?;
        self.controller.bind_all(statement, 2, spec.parameters())?;
        statement
            .execute()
            .map_err(|source| execute_error(spec, source))?;

        let code = statement
            .out_integer(1)
            .and_then(|code| {
                let code = code.unwrap_or(0);
                i32::try_from(code).map_err(|_| DriverError::TypeMismatch {
                    index: 1,
                    expected: "INTEGER",
                    found: code.to_string(),
                })
            })
            .map_err(|source| read_error(spec, source))?;

        Ok((executed, code))
    }

    /// Release `executed`, then report completion or failure of `spec`.
    fn finish<R>(&self, mut executed: Executed, spec: &StatementSpec, outcome: Result<R>) -> Result<R> {
        let released = executed.release().map_err(|source| {
            Error::from(StatementError::Close {
                sql: spec.sql().to_string(),
                source,
            })
        });
        let outcome = outcome.and_then(|value| released.map(|_| value));

        match &outcome {
            Ok(_) => self.controller.on_execute_complete(spec),
            Err(err) => self.controller.on_execute_fail(spec, err),
        }
        outcome
    }
}

impl std::fmt::Debug for StatementExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementExecutor").finish_non_exhaustive()
    }
}

fn drain<T, F>(executed: &mut Executed, spec: &StatementSpec, parser: &F) -> Result<Vec<T>>
where
    F: Fn(&Row<'_>) -> ParseResult<T>,
{
    let mut rows = Vec::new();
    let Some(cursor) = executed.cursor_mut() else {
        return Ok(rows);
    };

    while cursor.advance().map_err(|source| read_error(spec, source))? {
        if let Some(value) = parser(&Row::new(&*cursor)).map_err(|source| read_error(spec, source))? {
            rows.push(value);
        }
    }
    Ok(rows)
}

pub(crate) fn execute_error(spec: &StatementSpec, source: DriverError) -> Error {
    StatementError::Execute {
        sql: spec.sql().to_string(),
        source,
    }
    .into()
}

pub(crate) fn read_error(spec: &StatementSpec, source: DriverError) -> Error {
    StatementError::Read {
        sql: spec.sql().to_string(),
        source,
    }
    .into()
}

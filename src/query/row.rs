//! Row access for result parsers.
//!
//! Parsers see the cursor's current row through [`Row`], which only reads
//! columns and never moves the cursor. A parser returns `Ok(None)` to skip a
//! row; skipped rows never reach the caller.

use crate::driver::RawCursor;
use crate::error::DriverError;
use crate::types::Value;

/// Outcome of parsing one row: a value, a skip (`None`) or a failure.
pub type ParseResult<T> = Result<Option<T>, DriverError>;

/// Converts the current row into a domain value.
pub trait RowParser<T>: Send {
    /// Parse the current row.
    fn parse(&self, row: &Row<'_>) -> ParseResult<T>;
}

impl<T, F> RowParser<T> for F
where
    F: Fn(&Row<'_>) -> ParseResult<T> + Send,
{
    fn parse(&self, row: &Row<'_>) -> ParseResult<T> {
        self(row)
    }
}

/// Read-only view of the cursor's current row. Column indexes are 1-based.
pub struct Row<'a> {
    cursor: &'a dyn RawCursor,
}

impl<'a> Row<'a> {
    pub(crate) fn new(cursor: &'a dyn RawCursor) -> Self {
        Self { cursor }
    }

    /// Number of columns.
    pub fn column_count(&self) -> usize {
        self.cursor.column_count()
    }

    /// Column names in order.
    pub fn column_names(&self) -> Vec<String> {
        self.cursor.column_names()
    }

    /// Read a column as a dynamic value.
    pub fn get_value(&self, index: usize) -> Result<Value, DriverError> {
        self.cursor.value(index)
    }

    /// Whether the last column read was SQL NULL.
    pub fn was_null(&self) -> bool {
        self.cursor.was_null()
    }

    /// Read an integer column; NULL reads as 0.
    pub fn get_i64(&self, index: usize) -> Result<i64, DriverError> {
        Ok(self.opt_i64(index)?.unwrap_or(0))
    }

    /// Read an integer column; NULL reads as 0.
    pub fn get_i32(&self, index: usize) -> Result<i32, DriverError> {
        Ok(self.opt_i32(index)?.unwrap_or(0))
    }

    /// Read an integer column; NULL reads as 0.
    pub fn get_i16(&self, index: usize) -> Result<i16, DriverError> {
        Ok(self.opt_i16(index)?.unwrap_or(0))
    }

    /// Read a floating point column; NULL reads as 0.0.
    pub fn get_f64(&self, index: usize) -> Result<f64, DriverError> {
        Ok(self.opt_f64(index)?.unwrap_or(0.0))
    }

    /// Read a floating point column; NULL reads as 0.0.
    pub fn get_f32(&self, index: usize) -> Result<f32, DriverError> {
        Ok(self.opt_f32(index)?.unwrap_or(0.0))
    }

    /// Read a boolean column; NULL reads as false.
    pub fn get_bool(&self, index: usize) -> Result<bool, DriverError> {
        let value = self.get_value(index)?;
        if value.is_null() {
            return Ok(false);
        }
        value.as_bool().ok_or_else(|| mismatch(index, "BOOLEAN", &value))
    }

    /// Read a column as text. Non-text values use their display form.
    pub fn get_string(&self, index: usize) -> Result<Option<String>, DriverError> {
        let value = self.get_value(index)?;
        Ok(match value {
            Value::Null => None,
            Value::String(s) | Value::Clob(s) => Some(s),
            other => Some(other.to_string()),
        })
    }

    /// Read a binary column.
    pub fn get_bytes(&self, index: usize) -> Result<Option<Vec<u8>>, DriverError> {
        let value = self.get_value(index)?;
        match value {
            Value::Null => Ok(None),
            Value::Binary(b) | Value::Blob(b) => Ok(Some(b)),
            Value::String(s) | Value::Clob(s) => Ok(Some(s.into_bytes())),
            other => Err(mismatch(index, "BINARY", &other)),
        }
    }

    /// Read an integer column, `None` when NULL.
    pub fn opt_i64(&self, index: usize) -> Result<Option<i64>, DriverError> {
        let value = self.get_value(index)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_i64()
            .map(Some)
            .ok_or_else(|| mismatch(index, "BIGINT", &value))
    }

    /// Read an integer column, `None` when NULL.
    pub fn opt_i32(&self, index: usize) -> Result<Option<i32>, DriverError> {
        self.narrow(index, "INTEGER")
    }

    /// Read an integer column, `None` when NULL.
    pub fn opt_i16(&self, index: usize) -> Result<Option<i16>, DriverError> {
        self.narrow(index, "SMALLINT")
    }

    /// Read a floating point column, `None` when NULL.
    pub fn opt_f64(&self, index: usize) -> Result<Option<f64>, DriverError> {
        let value = self.get_value(index)?;
        if value.is_null() {
            return Ok(None);
        }
        value
            .as_f64()
            .map(Some)
            .ok_or_else(|| mismatch(index, "DOUBLE", &value))
    }

    /// Read a floating point column, `None` when NULL.
    pub fn opt_f32(&self, index: usize) -> Result<Option<f32>, DriverError> {
        Ok(self.opt_f64(index)?.map(|v| v as f32))
    }

    fn narrow<N: TryFrom<i64>>(
        &self,
        index: usize,
        expected: &'static str,
    ) -> Result<Option<N>, DriverError> {
        match self.opt_i64(index)? {
            Some(wide) => N::try_from(wide).map(Some).map_err(|_| {
                DriverError::TypeMismatch {
                    index,
                    expected,
                    found: wide.to_string(),
                }
            }),
            None => Ok(None),
        }
    }
}

fn mismatch(index: usize, expected: &'static str, found: &Value) -> DriverError {
    DriverError::TypeMismatch {
        index,
        expected,
        found: found.type_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::protocol::testing::MockCursor;

    fn cursor_with(values: Vec<Value>) -> MockCursor {
        let mut cursor = MockCursor::new();
        let count = values.len();
        cursor.expect_column_count().return_const(count);
        cursor.expect_value().returning(move |index| {
            values
                .get(index - 1)
                .cloned()
                .ok_or(DriverError::ColumnOutOfRange { index, count })
        });
        cursor
    }

    #[test]
    fn test_null_defaults() {
        let cursor = cursor_with(vec![Value::Null]);
        let row = Row::new(&cursor);
        assert_eq!(row.get_i64(1).unwrap(), 0);
        assert_eq!(row.get_i32(1).unwrap(), 0);
        assert_eq!(row.get_f64(1).unwrap(), 0.0);
        assert!(!row.get_bool(1).unwrap());
        assert_eq!(row.get_string(1).unwrap(), None);
        assert_eq!(row.opt_i64(1).unwrap(), None);
        assert_eq!(row.opt_f32(1).unwrap(), None);
    }

    #[test]
    fn test_typed_reads() {
        let cursor = cursor_with(vec![
            Value::Integer(400),
            Value::String("a".to_string()),
            Value::Float(1.5),
            Value::Binary(vec![1, 2]),
        ]);
        let row = Row::new(&cursor);
        assert_eq!(row.column_count(), 4);
        assert_eq!(row.get_i64(1).unwrap(), 400);
        assert_eq!(row.opt_i16(1).unwrap(), Some(400));
        assert_eq!(row.get_string(2).unwrap().as_deref(), Some("a"));
        assert_eq!(row.get_string(1).unwrap().as_deref(), Some("400"));
        assert_eq!(row.get_f32(3).unwrap(), 1.5);
        assert_eq!(row.get_bytes(4).unwrap(), Some(vec![1, 2]));
    }

    #[test]
    fn test_narrowing_overflow() {
        let cursor = cursor_with(vec![Value::Integer(70_000)]);
        let row = Row::new(&cursor);
        assert!(matches!(
            row.opt_i16(1),
            Err(DriverError::TypeMismatch { index: 1, expected: "SMALLINT", .. })
        ));
        assert_eq!(row.opt_i32(1).unwrap(), Some(70_000));
    }

    #[test]
    fn test_type_mismatch() {
        let cursor = cursor_with(vec![Value::String("abc".to_string())]);
        let row = Row::new(&cursor);
        assert!(matches!(
            row.get_i64(1),
            Err(DriverError::TypeMismatch { expected: "BIGINT", .. })
        ));
    }

    #[test]
    fn test_column_out_of_range() {
        let cursor = cursor_with(vec![Value::Integer(1)]);
        let row = Row::new(&cursor);
        assert!(matches!(
            row.get_value(2),
            Err(DriverError::ColumnOutOfRange { index: 2, count: 1 })
        ));
    }

    #[test]
    fn test_closure_parser() {
        let cursor = cursor_with(vec![Value::Integer(5)]);
        let parser = |row: &Row<'_>| -> ParseResult<i64> { row.opt_i64(1) };
        assert_eq!(parser.parse(&Row::new(&cursor)).unwrap(), Some(5));
    }
}

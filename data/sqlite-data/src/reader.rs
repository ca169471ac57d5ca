///
/// Forward-only reader over the result sets of a command.
///
/// The command text may hold several statements. The reader compiles and runs
/// them one at a time: statements that produce no columns run to completion
/// as they are reached, and the reader stops on each statement that produces
/// columns so its rows can be read. The first row of each result set is
/// fetched eagerly, which is how `has_rows` is known before the first `read`.
///
/// Closing (or dropping) the reader runs whatever statements remain.
///

use std::ffi::CString;
use std::time::Duration;

use rusqlite::ffi;

use crate::command::{self, Parameter};
use crate::connection::{Connection, ConnectionState};
use crate::error::{Result, SqliteError};
use crate::statement::Statement;
use crate::value::{FromSql, StorageClass, Value};

pub struct DataReader<'c> {
    connection: &'c Connection,
    sql: CString,
    offset: usize,
    parameters: Vec<Parameter>,
    timeout: Duration,
    current: Option<Statement<'c>>,
    changes_before: i64,
    has_rows: bool,
    prefetched: bool,
    positioned: bool,
    exhausted: bool,
    records_affected: i64,
    closed: bool,
}

impl<'c> DataReader<'c> {
    pub(crate) fn execute(
        connection: &'c Connection,
        sql: CString,
        parameters: Vec<Parameter>,
        timeout: Duration,
    ) -> Result<Self> {
        let mut reader = Self {
            connection,
            sql,
            offset: 0,
            parameters,
            timeout,
            current: None,
            changes_before: 0,
            has_rows: false,
            prefetched: false,
            positioned: false,
            exhausted: true,
            records_affected: -1,
            closed: false,
        };
        if let Err(err) = reader.advance() {
            reader.closed = true;
            return Err(err);
        }
        Ok(reader)
    }

    fn total_changes(&self) -> i64 {
        i64::from(unsafe { ffi::sqlite3_total_changes(self.connection.db_ptr()) })
    }

    /// Adds the rows changed by a completed data-modifying statement. Rows
    /// written by triggers are not counted, and a statement that changed
    /// nothing adds zero rather than the previous statement's count.
    fn record_changes(&mut self, statement: &Statement<'_>) -> Result<()> {
        if statement.is_readonly()? {
            return Ok(());
        }
        let changed = if self.total_changes() == self.changes_before {
            0
        } else {
            i64::from(unsafe { ffi::sqlite3_changes(self.connection.db_ptr()) })
        };
        self.records_affected = self.records_affected.max(0) + changed;
        Ok(())
    }

    fn finish_current(&mut self) -> Result<()> {
        if let Some(statement) = self.current.take() {
            if !statement.is_finalized() {
                self.record_changes(&statement)?;
            }
        }
        self.has_rows = false;
        self.prefetched = false;
        self.positioned = false;
        self.exhausted = true;
        Ok(())
    }

    /// Runs statements until one produces columns. Returns `false` when the
    /// text is used up.
    fn advance(&mut self) -> Result<bool> {
        self.finish_current()?;
        while let Some((mut statement, offset)) =
            Statement::prepare_next(self.connection, &self.sql, self.offset, self.timeout)?
        {
            self.offset = offset;
            command::bind_parameters(&mut statement, &self.parameters)?;
            self.changes_before = self.total_changes();
            let stepped = statement.step()?;

            if statement.column_count()? == 0 {
                self.record_changes(&statement)?;
                continue;
            }

            self.has_rows = stepped;
            self.prefetched = stepped;
            self.exhausted = !stepped;
            self.current = Some(statement);
            return Ok(true);
        }
        self.offset = self.sql.as_bytes().len();
        Ok(false)
    }

    fn require_open(&self, operation: &str) -> Result<()> {
        if self.closed {
            return Err(SqliteError::reader_closed(operation));
        }
        Ok(())
    }

    fn statement(&self, operation: &str) -> Result<&Statement<'c>> {
        self.require_open(operation)?;
        self.current.as_ref().ok_or_else(SqliteError::no_data)
    }

    fn row(&self, operation: &str, ordinal: usize) -> Result<&Statement<'c>> {
        let statement = self.statement(operation)?;
        let count = statement.column_count()?;
        if ordinal >= count {
            return Err(SqliteError::OutOfRange {
                parameter: "ordinal",
                index: ordinal,
                bound: count as isize - 1,
            });
        }
        if !self.positioned {
            return Err(SqliteError::no_data());
        }
        Ok(statement)
    }

    /// Moves to the next row of the current result set.
    pub fn read(&mut self) -> Result<bool> {
        self.require_open("read")?;
        if self.prefetched {
            self.prefetched = false;
            self.positioned = true;
            return Ok(true);
        }
        if self.exhausted {
            self.positioned = false;
            return Ok(false);
        }
        let Some(statement) = self.current.as_mut() else {
            return Ok(false);
        };
        let stepped = statement.step()?;
        self.positioned = stepped;
        self.exhausted = !stepped;
        Ok(stepped)
    }

    /// Moves to the next result set. Returns `false` when none remain.
    pub fn next_result(&mut self) -> Result<bool> {
        self.require_open("next_result")?;
        if self.connection.state() != ConnectionState::Open {
            return Err(SqliteError::requires_open("next_result"));
        }
        self.advance()
    }

    /// Whether the current result set has at least one row.
    pub fn has_rows(&self) -> bool {
        self.has_rows
    }

    pub fn field_count(&self) -> Result<usize> {
        self.require_open("field_count")?;
        match &self.current {
            Some(statement) => statement.column_count(),
            None => Ok(0),
        }
    }

    /// Rows changed by the statements run so far, or -1 if none changed data.
    pub fn records_affected(&self) -> i64 {
        self.records_affected
    }

    pub fn get_name(&self, ordinal: usize) -> Result<String> {
        self.statement("get_name")?.column_name(ordinal)
    }

    /// Finds a column by name, preferring an exact match over a
    /// case-insensitive one.
    pub fn get_ordinal(&self, name: &str) -> Result<usize> {
        let statement = self.statement("get_ordinal")?;
        let count = statement.column_count()?;
        let names = (0..count)
            .map(|ordinal| statement.column_name(ordinal))
            .collect::<Result<Vec<_>>>()?;
        names
            .iter()
            .position(|column| column == name)
            .or_else(|| names.iter().position(|column| column.eq_ignore_ascii_case(name)))
            .ok_or_else(|| SqliteError::ColumnNotFound(name.to_string()))
    }

    pub fn get<T: FromSql>(&self, ordinal: usize) -> Result<T> {
        self.row("get", ordinal)?.get(ordinal)
    }

    pub fn get_value(&self, ordinal: usize) -> Result<Value> {
        self.row("get_value", ordinal)?.value(ordinal)
    }

    pub fn is_null(&self, ordinal: usize) -> Result<bool> {
        self.row("is_null", ordinal)?.is_null(ordinal)
    }

    pub fn get_storage_class(&self, ordinal: usize) -> Result<StorageClass> {
        self.row("get_storage_class", ordinal)?.storage_class(ordinal)
    }

    /// The declared type of the column, or the storage class name of the
    /// current value when the column has no declared type.
    pub fn get_data_type_name(&self, ordinal: usize) -> Result<String> {
        let statement = self.statement("get_data_type_name")?;
        if let Some(declared) = statement.column_decltype(ordinal)? {
            return Ok(declared);
        }
        let class = if self.positioned {
            statement.storage_class(ordinal)?
        } else {
            StorageClass::Null
        };
        Ok(class.type_name().to_string())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Runs the remaining statements and releases the reader.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        let result = self.drain();
        self.closed = true;
        self.current = None;
        result
    }

    fn drain(&mut self) -> Result<()> {
        if self.connection.state() != ConnectionState::Open {
            return Ok(());
        }
        while self.advance()? {}
        Ok(())
    }
}

impl Drop for DataReader<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "closing reader failed");
        }
    }
}

impl std::fmt::Debug for DataReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataReader")
            .field("has_rows", &self.has_rows)
            .field("records_affected", &self.records_affected)
            .field("closed", &self.closed)
            .finish()
    }
}

///
/// Statement engine: one compiled unit of SQL and the per-connection registry
/// of live statements.
///
/// Every prepared statement handle is owned by its connection's
/// `StatementRegistry` and addressed by an id, following the handle-registry
/// pattern used elsewhere in this workspace. A `Statement` only carries the id,
/// so closing the connection finalizes every statement it created and any
/// later use of a stale `Statement` reports that it was finalized instead of
/// touching freed memory.
///
/// Lifecycle: prepared → (bind)* → step* → (reset → bind* → step*)* → finalized.
/// Binding while a row is pending is rejected. A step that hits a busy or
/// locked database resets the statement and retries every 150 ms until the
/// command timeout elapses (a zero timeout never gives up).
///

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::thread;
use std::time::{Duration, Instant};

use rusqlite::ffi;

use crate::connection::Connection;
use crate::error::{self, Result, SqliteError};
use crate::handle::StatementHandle;
use crate::value::{ColumnValues, FromSql, RawValues, StorageClass, ToSql, Value, ValueRef};

pub(crate) const BUSY_RETRY_DELAY: Duration = Duration::from_millis(150);

const PARAMETER_PREFIXES: [char; 3] = ['@', '$', ':'];

pub(crate) struct StatementRegistry {
    statements: HashMap<u64, StatementHandle>,
    next_id: u64,
}

impl StatementRegistry {
    pub(crate) fn new() -> Self {
        Self {
            statements: HashMap::new(),
            next_id: 1,
        }
    }

    fn insert(&mut self, handle: StatementHandle) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.statements.insert(id, handle);
        id
    }

    fn get(&self, id: u64) -> Option<*mut ffi::sqlite3_stmt> {
        self.statements.get(&id).map(StatementHandle::as_ptr)
    }

    fn remove(&mut self, id: u64) -> Option<StatementHandle> {
        self.statements.remove(&id)
    }

    /// Takes every live handle out of the registry. Dropping the result
    /// finalizes them.
    pub(crate) fn drain(&mut self) -> Vec<StatementHandle> {
        self.statements.drain().map(|(_, handle)| handle).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.statements.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Ready,
    Row,
    Done,
}

pub(crate) fn may_retry(started: Instant, timeout: Duration) -> bool {
    timeout.is_zero() || started.elapsed() < timeout
}

/// A single compiled SQL statement.
pub struct Statement<'c> {
    connection: &'c Connection,
    id: u64,
    sql: String,
    phase: Phase,
    timeout: Duration,
    columns: ColumnValues,
}

impl<'c> Statement<'c> {
    /// Compiles the next statement in `sql` starting at byte `offset`.
    ///
    /// Returns the statement and the offset just past it, or `None` once only
    /// whitespace and comments remain.
    pub(crate) fn prepare_next(
        connection: &'c Connection,
        sql: &CStr,
        offset: usize,
        timeout: Duration,
    ) -> Result<Option<(Statement<'c>, usize)>> {
        let db = connection.db_ptr();
        let bytes = sql.to_bytes();
        let mut offset = offset;

        while offset < bytes.len() {
            let remaining = c_int::try_from(bytes.len() - offset)
                .map_err(|_| SqliteError::native(ffi::SQLITE_TOOBIG, "string or blob too big"))?;
            let base: *const c_char = unsafe { sql.as_ptr().add(offset) };
            let mut raw = ptr::null_mut();
            let mut tail: *const c_char = ptr::null();

            let started = Instant::now();
            let rc = loop {
                let rc = unsafe { ffi::sqlite3_prepare_v2(db, base, remaining, &mut raw, &mut tail) };
                if error::is_busy(rc) && may_retry(started, timeout) {
                    thread::sleep(BUSY_RETRY_DELAY);
                    continue;
                }
                break rc;
            };
            if rc != ffi::SQLITE_OK {
                return Err(SqliteError::from_status(rc, db));
            }

            let consumed = if tail.is_null() {
                bytes.len() - offset
            } else {
                (tail as usize - base as usize).min(bytes.len() - offset)
            };
            let text = String::from_utf8_lossy(&bytes[offset..offset + consumed])
                .trim()
                .to_string();
            offset += consumed;

            if raw.is_null() {
                if consumed == 0 {
                    break;
                }
                continue;
            }

            let handle = unsafe { StatementHandle::acquire(raw) };
            let id = connection.statements().borrow_mut().insert(handle);
            tracing::trace!(id, sql = %text, "prepared statement");
            let statement = Statement {
                connection,
                id,
                sql: text,
                phase: Phase::Ready,
                timeout,
                columns: ColumnValues { stmt: raw },
            };
            return Ok(Some((statement, offset)));
        }
        Ok(None)
    }

    /// Compiles the first statement of `sql`; trailing text is ignored.
    pub(crate) fn prepare(connection: &'c Connection, sql: &str, timeout: Duration) -> Result<Self> {
        let text = CString::new(sql)
            .map_err(|_| SqliteError::Argument("SQL text must not contain NUL characters.".into()))?;
        Self::prepare_next(connection, &text, 0, timeout)?
            .map(|(statement, _)| statement)
            .ok_or_else(|| SqliteError::Argument("The SQL text contains no statement.".into()))
    }

    fn raw(&self) -> Result<*mut ffi::sqlite3_stmt> {
        self.connection
            .statements()
            .borrow()
            .get(self.id)
            .ok_or_else(SqliteError::statement_finalized)
    }

    /// The text of this compiled unit.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn is_finalized(&self) -> bool {
        self.raw().is_err()
    }

    pub fn column_count(&self) -> Result<usize> {
        let raw = self.raw()?;
        Ok(unsafe { ffi::sqlite3_column_count(raw) }.max(0) as usize)
    }

    fn check_column(&self, ordinal: usize) -> Result<*mut ffi::sqlite3_stmt> {
        let count = self.column_count()?;
        if ordinal >= count {
            return Err(SqliteError::OutOfRange {
                parameter: "ordinal",
                index: ordinal,
                bound: count as isize - 1,
            });
        }
        self.raw()
    }

    pub fn column_name(&self, ordinal: usize) -> Result<String> {
        let raw = self.check_column(ordinal)?;
        let ptr = unsafe { ffi::sqlite3_column_name(raw, ordinal as c_int) };
        if ptr.is_null() {
            return Err(SqliteError::native(ffi::SQLITE_NOMEM, "out of memory"));
        }
        Ok(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }

    /// The declared type of a result column, when it comes straight from a
    /// table column with a declared type.
    pub fn column_decltype(&self, ordinal: usize) -> Result<Option<String>> {
        let raw = self.check_column(ordinal)?;
        let ptr = unsafe { ffi::sqlite3_column_decltype(raw, ordinal as c_int) };
        if ptr.is_null() {
            return Ok(None);
        }
        Ok(Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()))
    }

    pub fn parameter_count(&self) -> Result<usize> {
        let raw = self.raw()?;
        Ok(unsafe { ffi::sqlite3_bind_parameter_count(raw) }.max(0) as usize)
    }

    /// The name of the 1-based parameter `index`, including its prefix.
    /// Anonymous `?` parameters have no name.
    pub fn parameter_name(&self, index: usize) -> Result<Option<String>> {
        let raw = self.raw()?;
        let ptr = unsafe { ffi::sqlite3_bind_parameter_name(raw, index as c_int) };
        if ptr.is_null() {
            return Ok(None);
        }
        Ok(Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()))
    }

    /// Resolves a parameter name to its 1-based index. Names given without a
    /// prefix also match `@name`, `$name` and `:name`.
    pub fn parameter_index(&self, name: &str) -> Result<Option<usize>> {
        let raw = self.raw()?;
        let lookup = |candidate: &str| -> Option<usize> {
            let text = CString::new(candidate).ok()?;
            let index = unsafe { ffi::sqlite3_bind_parameter_index(raw, text.as_ptr()) };
            (index > 0).then_some(index as usize)
        };
        if let Some(index) = lookup(name) {
            return Ok(Some(index));
        }
        if name.starts_with(PARAMETER_PREFIXES) || name.starts_with('?') {
            return Ok(None);
        }
        Ok(PARAMETER_PREFIXES
            .iter()
            .find_map(|prefix| lookup(&format!("{prefix}{name}"))))
    }

    /// Whether executing the statement leaves the database unchanged.
    pub fn is_readonly(&self) -> Result<bool> {
        let raw = self.raw()?;
        Ok(unsafe { ffi::sqlite3_stmt_readonly(raw) } != 0)
    }

    fn prepare_binding(&mut self) -> Result<*mut ffi::sqlite3_stmt> {
        let raw = self.raw()?;
        match self.phase {
            Phase::Row => Err(SqliteError::InvalidOperation(
                "Parameters cannot be bound while the statement has a pending row; reset it first."
                    .into(),
            )),
            Phase::Done => {
                self.reset()?;
                Ok(raw)
            }
            Phase::Ready => Ok(raw),
        }
    }

    /// Binds an owned value to the 1-based parameter `index`.
    pub fn bind_value(&mut self, index: usize, value: &Value) -> Result<()> {
        let raw = self.prepare_binding()?;
        let count = self.parameter_count()?;
        if index == 0 || index > count {
            return Err(SqliteError::OutOfRange {
                parameter: "parameter index",
                index,
                bound: count as isize,
            });
        }
        let slot = index as c_int;
        let rc = unsafe {
            match value {
                Value::Null => ffi::sqlite3_bind_null(raw, slot),
                Value::Integer(i) => ffi::sqlite3_bind_int64(raw, slot, *i),
                Value::Real(r) => ffi::sqlite3_bind_double(raw, slot, *r),
                Value::Text(text) => ffi::sqlite3_bind_text(
                    raw,
                    slot,
                    text.as_ptr().cast(),
                    length(text.len())?,
                    ffi::SQLITE_TRANSIENT(),
                ),
                Value::Blob(bytes) if bytes.is_empty() => ffi::sqlite3_bind_zeroblob(raw, slot, 0),
                Value::Blob(bytes) => ffi::sqlite3_bind_blob(
                    raw,
                    slot,
                    bytes.as_ptr().cast(),
                    length(bytes.len())?,
                    ffi::SQLITE_TRANSIENT(),
                ),
            }
        };
        tracing::trace!(id = self.id, index, "bound parameter");
        error::check(rc, self.connection.db_ptr())
    }

    pub fn bind<T: ToSql + ?Sized>(&mut self, index: usize, value: &T) -> Result<()> {
        let value = value.to_sql(&self.connection.bind_context())?;
        self.bind_value(index, &value)
    }

    pub fn bind_named<T: ToSql + ?Sized>(&mut self, name: &str, value: &T) -> Result<()> {
        let index = self.parameter_index(name)?.ok_or_else(|| {
            SqliteError::Argument(format!("No parameter named '{name}' exists in the statement."))
        })?;
        self.bind(index, value)
    }

    pub fn clear_bindings(&mut self) -> Result<()> {
        let raw = self.prepare_binding()?;
        let rc = unsafe { ffi::sqlite3_clear_bindings(raw) };
        error::check(rc, self.connection.db_ptr())
    }

    /// Advances to the next row. Returns `true` when a row is available and
    /// `false` once the statement has run to completion.
    pub fn step(&mut self) -> Result<bool> {
        let raw = self.raw()?;
        let started = Instant::now();
        loop {
            let rc = unsafe { ffi::sqlite3_step(raw) };
            match rc {
                ffi::SQLITE_ROW => {
                    self.phase = Phase::Row;
                    return Ok(true);
                }
                ffi::SQLITE_DONE => {
                    self.phase = Phase::Done;
                    return Ok(false);
                }
                rc if error::is_busy(rc) && may_retry(started, self.timeout) => {
                    tracing::trace!(id = self.id, code = rc, "database busy, retrying step");
                    unsafe { ffi::sqlite3_reset(raw) };
                    thread::sleep(BUSY_RETRY_DELAY);
                }
                rc => {
                    self.phase = Phase::Done;
                    let err = SqliteError::from_status(rc, self.connection.db_ptr());
                    unsafe { ffi::sqlite3_reset(raw) };
                    return Err(err);
                }
            }
        }
    }

    /// Returns the statement to its pre-execution state. Bindings are kept.
    pub fn reset(&mut self) -> Result<()> {
        let raw = self.raw()?;
        unsafe { ffi::sqlite3_reset(raw) };
        self.phase = Phase::Ready;
        Ok(())
    }

    /// Releases the native statement now instead of on drop.
    pub fn finalize(self) {}

    fn check_row(&self, ordinal: usize) -> Result<()> {
        self.check_column(ordinal)?;
        if self.phase != Phase::Row {
            return Err(SqliteError::no_data());
        }
        Ok(())
    }

    /// Reads column `ordinal` of the current row.
    pub fn get<T: FromSql>(&self, ordinal: usize) -> Result<T> {
        self.check_row(ordinal)?;
        T::from_sql(ValueRef::native(&self.columns, ordinal))
    }

    /// Copies column `ordinal` of the current row in its storage class.
    pub fn value(&self, ordinal: usize) -> Result<Value> {
        self.check_row(ordinal)?;
        Ok(ValueRef::native(&self.columns, ordinal).to_value())
    }

    pub fn is_null(&self, ordinal: usize) -> Result<bool> {
        self.check_row(ordinal)?;
        Ok(self.columns.class(ordinal) == StorageClass::Null)
    }

    pub(crate) fn storage_class(&self, ordinal: usize) -> Result<StorageClass> {
        self.check_row(ordinal)?;
        Ok(self.columns.class(ordinal))
    }

    pub(crate) fn has_row(&self) -> bool {
        self.phase == Phase::Row
    }
}

impl Drop for Statement<'_> {
    fn drop(&mut self) {
        let handle = self.connection.statements().borrow_mut().remove(self.id);
        if handle.is_some() {
            tracing::trace!(id = self.id, "finalized statement");
        }
    }
}

fn length(len: usize) -> Result<c_int> {
    c_int::try_from(len).map_err(|_| SqliteError::native(ffi::SQLITE_TOOBIG, "string or blob too big"))
}

///
/// Error types for the data-access layer.
///
/// Native engine failures are translated from status codes into
/// `SqliteError::Native`, carrying the code and the most specific message the
/// engine can give. Everything else (wrong connection state, conversion
/// failures, bad arguments) has its own variant, and `kind()` groups them into
/// a small stable taxonomy.
///

use std::ffi::CStr;
use std::os::raw::c_int;

use rusqlite::ffi;
use thiserror::Error;

use crate::engine::{self, ErrorText};
use crate::value::StorageClass;

const RESULT_CODE_HELP: &str =
    "For more information on this error code see https://www.sqlite.org/rescode.html";

#[derive(Debug, Error)]
pub enum SqliteError {
    #[error("SQLite Error {code}: '{message}'.")]
    Native { code: i32, message: String },

    #[error("{0}")]
    InvalidOperation(String),

    #[error("The {parameter} {index} is out of range; the highest valid {parameter} is {bound}.")]
    OutOfRange {
        parameter: &'static str,
        index: usize,
        bound: isize,
    },

    #[error("No column named '{0}' exists in the result set.")]
    ColumnNotFound(String),

    #[error("Specified cast is not valid: a {from} value cannot be read as {to}.")]
    InvalidCast {
        from: StorageClass,
        to: &'static str,
    },

    #[error("Value {value} does not fit in {target}.")]
    Overflow { value: String, target: &'static str },

    #[error("Value cannot be null. (Parameter '{0}')")]
    ArgumentNull(&'static str),

    #[error("{0}")]
    Argument(String),

    #[error("Keyword not supported: '{0}'.")]
    KeywordNotSupported(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, SqliteError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The engine reported a failure status.
    Native,
    /// The operation is not valid in the object's current state.
    State,
    /// A stored value could not be converted to or from the requested type.
    Conversion,
    /// A caller-supplied argument was rejected.
    Argument,
    /// A configuration file could not be read or parsed.
    Configuration,
}

impl SqliteError {
    pub fn native(code: i32, message: impl Into<String>) -> Self {
        SqliteError::Native {
            code,
            message: message.into(),
        }
    }

    /// Builds the error for a failing status, preferring the detailed message
    /// recorded on `db` when the handle is valid.
    pub fn from_status(rc: c_int, db: *mut ffi::sqlite3) -> Self {
        SqliteError::Native {
            code: rc,
            message: native_message(rc, db),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SqliteError::Native { .. } => ErrorKind::Native,
            SqliteError::InvalidOperation(_) => ErrorKind::State,
            SqliteError::InvalidCast { .. } | SqliteError::Overflow { .. } => ErrorKind::Conversion,
            SqliteError::OutOfRange { .. }
            | SqliteError::ColumnNotFound(_)
            | SqliteError::ArgumentNull(_)
            | SqliteError::Argument(_)
            | SqliteError::KeywordNotSupported(_) => ErrorKind::Argument,
            SqliteError::Io(_) | SqliteError::Toml(_) => ErrorKind::Configuration,
        }
    }

    /// The engine status code for native failures.
    pub fn native_code(&self) -> Option<i32> {
        match self {
            SqliteError::Native { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The bare message, without the native code decoration.
    pub fn message(&self) -> String {
        match self {
            SqliteError::Native { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub(crate) fn requires_open(operation: &str) -> Self {
        SqliteError::InvalidOperation(format!(
            "{operation} can only be called when the connection is open."
        ))
    }

    pub(crate) fn requires_closed(property: &str) -> Self {
        SqliteError::InvalidOperation(format!(
            "{property} can only be set when the connection is closed."
        ))
    }

    pub(crate) fn reader_closed(operation: &str) -> Self {
        SqliteError::InvalidOperation(format!(
            "Invalid attempt to call {operation} when the reader is closed."
        ))
    }

    pub(crate) fn no_data() -> Self {
        SqliteError::InvalidOperation("No data exists for the row/column.".to_string())
    }

    pub(crate) fn transaction_completed() -> Self {
        SqliteError::InvalidOperation(
            "This transaction has completed; it is no longer usable.".to_string(),
        )
    }

    pub(crate) fn statement_finalized() -> Self {
        SqliteError::InvalidOperation("The statement has been finalized.".to_string())
    }

    pub(crate) fn cast(from: StorageClass, to: &'static str) -> Self {
        SqliteError::InvalidCast { from, to }
    }
}

/// Returns `Ok` for the non-error statuses (`OK`, `ROW`, `DONE`) and the
/// translated error otherwise.
pub fn check(rc: c_int, db: *mut ffi::sqlite3) -> Result<()> {
    if is_success(rc) {
        Ok(())
    } else {
        Err(SqliteError::from_status(rc, db))
    }
}

pub(crate) fn is_success(rc: c_int) -> bool {
    matches!(rc, ffi::SQLITE_OK | ffi::SQLITE_ROW | ffi::SQLITE_DONE)
}

pub(crate) fn is_busy(rc: c_int) -> bool {
    matches!(rc & 0xff, ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED)
}

fn native_message(rc: c_int, db: *mut ffi::sqlite3) -> String {
    if !db.is_null() {
        let ptr = unsafe { ffi::sqlite3_errmsg(db) };
        if !ptr.is_null() {
            return unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
        }
    }
    fallback_message(rc)
}

fn fallback_message(rc: c_int) -> String {
    match engine::capabilities().error_text {
        ErrorText::StatusDescription => {
            let ptr = unsafe { ffi::sqlite3_errstr(rc) };
            if ptr.is_null() {
                return RESULT_CODE_HELP.to_string();
            }
            let description = unsafe { CStr::from_ptr(ptr) }.to_string_lossy();
            format!("{description} {RESULT_CODE_HELP}")
        }
        ErrorText::Generic => RESULT_CODE_HELP.to_string(),
    }
}

/// Symbolic name of a primary result code, e.g. `SQLITE_BUSY`.
pub fn status_name(rc: c_int) -> &'static str {
    match rc & 0xff {
        ffi::SQLITE_OK => "SQLITE_OK",
        ffi::SQLITE_ERROR => "SQLITE_ERROR",
        ffi::SQLITE_INTERNAL => "SQLITE_INTERNAL",
        ffi::SQLITE_PERM => "SQLITE_PERM",
        ffi::SQLITE_ABORT => "SQLITE_ABORT",
        ffi::SQLITE_BUSY => "SQLITE_BUSY",
        ffi::SQLITE_LOCKED => "SQLITE_LOCKED",
        ffi::SQLITE_NOMEM => "SQLITE_NOMEM",
        ffi::SQLITE_READONLY => "SQLITE_READONLY",
        ffi::SQLITE_INTERRUPT => "SQLITE_INTERRUPT",
        ffi::SQLITE_IOERR => "SQLITE_IOERR",
        ffi::SQLITE_CORRUPT => "SQLITE_CORRUPT",
        ffi::SQLITE_NOTFOUND => "SQLITE_NOTFOUND",
        ffi::SQLITE_FULL => "SQLITE_FULL",
        ffi::SQLITE_CANTOPEN => "SQLITE_CANTOPEN",
        ffi::SQLITE_PROTOCOL => "SQLITE_PROTOCOL",
        ffi::SQLITE_EMPTY => "SQLITE_EMPTY",
        ffi::SQLITE_SCHEMA => "SQLITE_SCHEMA",
        ffi::SQLITE_TOOBIG => "SQLITE_TOOBIG",
        ffi::SQLITE_CONSTRAINT => "SQLITE_CONSTRAINT",
        ffi::SQLITE_MISMATCH => "SQLITE_MISMATCH",
        ffi::SQLITE_MISUSE => "SQLITE_MISUSE",
        ffi::SQLITE_NOLFS => "SQLITE_NOLFS",
        ffi::SQLITE_AUTH => "SQLITE_AUTH",
        ffi::SQLITE_FORMAT => "SQLITE_FORMAT",
        ffi::SQLITE_RANGE => "SQLITE_RANGE",
        ffi::SQLITE_NOTADB => "SQLITE_NOTADB",
        ffi::SQLITE_NOTICE => "SQLITE_NOTICE",
        ffi::SQLITE_WARNING => "SQLITE_WARNING",
        ffi::SQLITE_ROW => "SQLITE_ROW",
        ffi::SQLITE_DONE => "SQLITE_DONE",
        _ => "SQLITE_UNKNOWN",
    }
}

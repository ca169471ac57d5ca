///
/// Incremental I/O on a single BLOB cell.
///
/// The blob cannot grow or shrink: writes must fit inside the current length,
/// which is fixed when the row is written (for example with `zeroblob(n)`).
///

use std::ffi::CString;
use std::os::raw::c_int;
use std::ptr;

use rusqlite::ffi;

use crate::connection::Connection;
use crate::error::{self, Result, SqliteError};
use crate::handle::BlobHandle;

pub struct Blob<'c> {
    connection: &'c Connection,
    handle: BlobHandle,
    len: usize,
}

fn name(value: &str) -> Result<CString> {
    CString::new(value).map_err(|_| SqliteError::Argument(format!("'{value}' must not contain NUL characters.")))
}

impl<'c> Blob<'c> {
    pub(crate) fn open(
        connection: &'c Connection,
        database: &str,
        table: &str,
        column: &str,
        rowid: i64,
        read_only: bool,
    ) -> Result<Self> {
        let db = connection.db_ptr();
        let (database, table, column) = (name(database)?, name(table)?, name(column)?);
        let mut raw = ptr::null_mut();
        let rc = unsafe {
            ffi::sqlite3_blob_open(
                db,
                database.as_ptr(),
                table.as_ptr(),
                column.as_ptr(),
                rowid,
                c_int::from(!read_only),
                &mut raw,
            )
        };
        let mut handle = unsafe { BlobHandle::acquire(raw) };
        if rc != ffi::SQLITE_OK {
            let err = SqliteError::from_status(rc, db);
            handle.release();
            return Err(err);
        }
        let len = unsafe { ffi::sqlite3_blob_bytes(handle.as_ptr()) }.max(0) as usize;
        tracing::trace!(rowid, len, read_only, "opened blob");
        Ok(Self {
            connection,
            handle,
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn span(&self, offset: usize, count: usize) -> Result<(c_int, c_int)> {
        if !self.handle.is_valid() {
            return Err(SqliteError::InvalidOperation("The blob has been closed.".into()));
        }
        let end = offset.checked_add(count).filter(|end| *end <= self.len);
        if end.is_none() {
            return Err(SqliteError::OutOfRange {
                parameter: "offset",
                index: offset,
                bound: self.len as isize - count as isize,
            });
        }
        // len fits in c_int because the engine reported it as one
        Ok((offset as c_int, count as c_int))
    }

    /// Reads up to `buffer.len()` bytes starting at `offset` and returns how
    /// many were read.
    pub fn read_at(&self, offset: usize, buffer: &mut [u8]) -> Result<usize> {
        let count = buffer.len().min(self.len.saturating_sub(offset));
        if count == 0 {
            return Ok(0);
        }
        let (offset, n) = self.span(offset, count)?;
        let rc = unsafe { ffi::sqlite3_blob_read(self.handle.as_ptr(), buffer.as_mut_ptr().cast(), n, offset) };
        error::check(rc, self.connection.db_ptr())?;
        Ok(count)
    }

    /// Overwrites `data.len()` bytes starting at `offset`.
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let (offset, n) = self.span(offset, data.len())?;
        let rc = unsafe { ffi::sqlite3_blob_write(self.handle.as_ptr(), data.as_ptr().cast(), n, offset) };
        error::check(rc, self.connection.db_ptr())
    }

    /// Closes the handle, reporting any deferred write failure.
    pub fn close(mut self) -> Result<()> {
        let rc = self.handle.release();
        error::check(rc, self.connection.db_ptr())
    }
}

impl std::fmt::Debug for Blob<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blob").field("len", &self.len).finish()
    }
}

///
/// Owned wrappers around raw engine handles.
///
/// Each handle kind knows the native finalizer for its resource:
/// - Database: sqlite3_close_v2 (sqlite3_close on engines without it)
/// - Statement: sqlite3_finalize
/// - Backup: sqlite3_backup_finish
/// - Blob: sqlite3_blob_close
///
/// Release is idempotent and runs at most once, either explicitly or on drop.
/// Failures during release are logged and otherwise ignored.
///

use std::fmt;
use std::marker::PhantomData;
use std::os::raw::c_int;
use std::ptr;

use rusqlite::ffi;

use crate::engine;

pub trait HandleKind {
    type Raw;
    const NAME: &'static str;

    /// Runs the native finalizer for `raw`.
    ///
    /// # Safety
    /// `raw` must be a live, non-null handle of this kind that is released
    /// nowhere else.
    unsafe fn release(raw: *mut Self::Raw) -> c_int;
}

pub enum DatabaseKind {}
pub enum StatementKind {}
pub enum BackupKind {}
pub enum BlobKind {}

impl HandleKind for DatabaseKind {
    type Raw = ffi::sqlite3;
    const NAME: &'static str = "database";

    unsafe fn release(raw: *mut ffi::sqlite3) -> c_int {
        if engine::capabilities().deferred_close {
            unsafe { ffi::sqlite3_close_v2(raw) }
        } else {
            unsafe { ffi::sqlite3_close(raw) }
        }
    }
}

impl HandleKind for StatementKind {
    type Raw = ffi::sqlite3_stmt;
    const NAME: &'static str = "statement";

    unsafe fn release(raw: *mut ffi::sqlite3_stmt) -> c_int {
        unsafe { ffi::sqlite3_finalize(raw) }
    }
}

impl HandleKind for BackupKind {
    type Raw = ffi::sqlite3_backup;
    const NAME: &'static str = "backup";

    unsafe fn release(raw: *mut ffi::sqlite3_backup) -> c_int {
        unsafe { ffi::sqlite3_backup_finish(raw) }
    }
}

impl HandleKind for BlobKind {
    type Raw = ffi::sqlite3_blob;
    const NAME: &'static str = "blob";

    unsafe fn release(raw: *mut ffi::sqlite3_blob) -> c_int {
        unsafe { ffi::sqlite3_blob_close(raw) }
    }
}

/// Exclusive owner of one native handle.
pub struct NativeHandle<K: HandleKind> {
    raw: *mut K::Raw,
    _kind: PhantomData<K>,
}

pub type DatabaseHandle = NativeHandle<DatabaseKind>;
pub type StatementHandle = NativeHandle<StatementKind>;
pub type BackupHandle = NativeHandle<BackupKind>;
pub type BlobHandle = NativeHandle<BlobKind>;

impl<K: HandleKind> NativeHandle<K> {
    /// Takes ownership of `raw`. A null pointer yields an invalid handle.
    ///
    /// # Safety
    /// A non-null `raw` must be a live handle of kind `K` that nothing else
    /// will release.
    pub unsafe fn acquire(raw: *mut K::Raw) -> Self {
        Self {
            raw,
            _kind: PhantomData,
        }
    }

    pub fn invalid() -> Self {
        Self {
            raw: ptr::null_mut(),
            _kind: PhantomData,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.raw.is_null()
    }

    /// The raw pointer, null once released. Ownership stays with the handle.
    pub fn as_ptr(&self) -> *mut K::Raw {
        self.raw
    }

    /// Runs the native finalizer once and invalidates the handle.
    ///
    /// Returns the finalizer's status; an already released handle reports
    /// `SQLITE_OK`.
    pub fn release(&mut self) -> c_int {
        let raw = std::mem::replace(&mut self.raw, ptr::null_mut());
        if raw.is_null() {
            return ffi::SQLITE_OK;
        }
        let rc = unsafe { K::release(raw) };
        if rc != ffi::SQLITE_OK {
            tracing::debug!(kind = K::NAME, code = rc, "native release reported a failure");
        }
        rc
    }
}

impl<K: HandleKind> Default for NativeHandle<K> {
    fn default() -> Self {
        Self::invalid()
    }
}

impl<K: HandleKind> Drop for NativeHandle<K> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<K: HandleKind> fmt::Debug for NativeHandle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeHandle")
            .field("kind", &K::NAME)
            .field("raw", &self.raw)
            .finish()
    }
}

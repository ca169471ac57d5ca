///
/// Connection manager.
///
/// A `Connection` owns one native database handle and everything tied to
/// it: the live statement registry, the active transaction, and the
/// configuration (pragmas plus user-defined routines) applied on every open.
///
/// Lifecycle:
/// - `open` resolves the connection string into a filename and open flags,
///   opens the native handle, applies pragmas in a fixed order, then replays
///   collations, functions and aggregates.
/// - `close` rolls back any active transaction, finalizes every live
///   statement, and releases the native handle. It never fails and is a
///   no-op on a closed connection.
///
/// Pragma-backed options (`foreign_keys`, `recursive_triggers`,
/// `journal_mode`, `automatic_index`) can only change while closed;
/// `synchronous` and `auto_vacuum` apply immediately on an open connection.
///
/// The type is single-threaded (`!Send`): statements, readers and
/// transactions borrow it and rely on its interior state not changing under
/// them from another thread.
///

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::ffi::{CStr, CString};
use std::os::raw::c_int;
use std::path::{Path, PathBuf};
use std::ptr;
use std::rc::Rc;
use std::time::Duration;

use rusqlite::ffi;

use crate::blob::Blob;
use crate::command::Command;
use crate::config::{self, AutoVacuumMode, Configuration, JournalMode, SynchronousMode};
use crate::connection_string::{CacheMode, ConnectionStringBuilder, OpenMode};
use crate::engine;
use crate::error::{self, Result, SqliteError};
use crate::functions::{self, Arguments, FunctionFlags, NativeRoutine};
use crate::handle::{BackupHandle, DatabaseHandle};
use crate::reader::DataReader;
use crate::statement::{Statement, StatementRegistry};
use crate::transaction::{IsolationLevel, Transaction, TransactionState};
use crate::value::{BindContext, FromSql, ToSql};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const MAIN_DATABASE: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Open,
    Connecting,
    Broken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub original: ConnectionState,
    pub current: ConnectionState,
}

type StateListener = Box<dyn FnMut(&StateChange)>;

pub struct Connection {
    connection_string: RefCell<Option<ConnectionStringBuilder>>,
    state: Cell<ConnectionState>,
    db: RefCell<DatabaseHandle>,
    configuration: RefCell<Configuration>,
    statements: RefCell<StatementRegistry>,
    transaction: RefCell<Option<Rc<TransactionState>>>,
    default_timeout: Cell<Duration>,
    base_directory: RefCell<Option<PathBuf>>,
    listeners: RefCell<Vec<StateListener>>,
}

impl Default for Connection {
    fn default() -> Self {
        Self {
            connection_string: RefCell::new(None),
            state: Cell::new(ConnectionState::Closed),
            db: RefCell::new(DatabaseHandle::invalid()),
            configuration: RefCell::new(Configuration::default()),
            statements: RefCell::new(StatementRegistry::new()),
            transaction: RefCell::new(None),
            default_timeout: Cell::new(DEFAULT_TIMEOUT),
            base_directory: RefCell::new(None),
            listeners: RefCell::new(Vec::new()),
        }
    }
}

/// Resolves a connection string into the filename and flags passed to the
/// native open call.
pub(crate) fn open_target(builder: &ConnectionStringBuilder, base_directory: Option<&Path>) -> (String, c_int) {
    let mut filename = builder.data_source.clone();
    let mut flags = 0;

    let is_uri = filename
        .get(..5)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("file:"));
    if is_uri {
        flags |= ffi::SQLITE_OPEN_URI;
    }

    match builder.mode {
        OpenMode::ReadOnly => flags |= ffi::SQLITE_OPEN_READONLY,
        OpenMode::ReadWrite => flags |= ffi::SQLITE_OPEN_READWRITE,
        OpenMode::Memory => {
            flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE | ffi::SQLITE_OPEN_MEMORY;
            if !is_uri {
                flags |= ffi::SQLITE_OPEN_URI;
                filename = format!("file:{filename}");
            }
        }
        OpenMode::ReadWriteCreate => flags |= ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE,
    }

    match builder.cache {
        CacheMode::Shared => flags |= ffi::SQLITE_OPEN_SHAREDCACHE,
        CacheMode::Private => flags |= ffi::SQLITE_OPEN_PRIVATECACHE,
        CacheMode::Default => {}
    }

    if let Some(base) = base_directory {
        let relative = flags & ffi::SQLITE_OPEN_URI == 0
            && !filename.is_empty()
            && filename != ":memory:"
            && !Path::new(&filename).has_root();
        if relative {
            filename = base.join(&filename).to_string_lossy().into_owned();
        }
    }

    (filename, flags)
}

impl Connection {
    pub fn new(connection_string: &str) -> Result<Self> {
        let connection = Self::default();
        connection.set_connection_string(connection_string)?;
        Ok(connection)
    }

    /// Creates a connection whose configuration starts as a copy of
    /// `configuration`.
    pub fn with_configuration(connection_string: &str, configuration: &Configuration) -> Result<Self> {
        let connection = Self::new(connection_string)?;
        *connection.configuration.borrow_mut() = configuration.clone();
        Ok(connection)
    }

    pub(crate) fn db_ptr(&self) -> *mut ffi::sqlite3 {
        self.db.borrow().as_ptr()
    }

    pub(crate) fn statements(&self) -> &RefCell<StatementRegistry> {
        &self.statements
    }

    pub(crate) fn bind_context(&self) -> BindContext {
        let binary_guid = self
            .connection_string
            .borrow()
            .as_ref()
            .is_none_or(|builder| builder.binary_guid);
        BindContext { binary_guid }
    }

    pub(crate) fn clear_transaction(&self) {
        self.transaction.borrow_mut().take();
    }

    fn require_open(&self, operation: &str) -> Result<*mut ffi::sqlite3> {
        let db = self.db_ptr();
        if self.state.get() != ConnectionState::Open || db.is_null() {
            return Err(SqliteError::requires_open(operation));
        }
        Ok(db)
    }

    fn require_closed(&self, property: &str) -> Result<()> {
        if self.state.get() != ConnectionState::Closed {
            return Err(SqliteError::requires_closed(property));
        }
        Ok(())
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn connection_string(&self) -> String {
        self.connection_string
            .borrow()
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    pub fn set_connection_string(&self, connection_string: &str) -> Result<()> {
        if self.state.get() != ConnectionState::Closed {
            return Err(SqliteError::InvalidOperation(
                "The connection string cannot be set when the connection is open.".into(),
            ));
        }
        let builder = ConnectionStringBuilder::parse(connection_string)?;
        *self.connection_string.borrow_mut() = Some(builder);
        Ok(())
    }

    /// Directory that relative data sources resolve against.
    pub fn set_base_directory(&self, directory: Option<PathBuf>) -> Result<()> {
        self.require_closed("base_directory")?;
        *self.base_directory.borrow_mut() = directory;
        Ok(())
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout.get()
    }

    /// Timeout inherited by commands created afterwards. Zero means no limit.
    pub fn set_default_timeout(&self, timeout: Duration) {
        self.default_timeout.set(timeout);
    }

    /// Registers a listener invoked after every state transition.
    pub fn on_state_change(&self, listener: impl FnMut(&StateChange) + 'static) {
        self.listeners.borrow_mut().push(Box::new(listener));
    }

    fn set_state(&self, current: ConnectionState) {
        let original = self.state.replace(current);
        if original != current {
            self.notify(StateChange { original, current });
        }
    }

    fn notify(&self, change: StateChange) {
        let mut listeners = std::mem::take(&mut *self.listeners.borrow_mut());
        for listener in listeners.iter_mut() {
            listener(&change);
        }
        let mut slot = self.listeners.borrow_mut();
        listeners.append(&mut slot);
        *slot = listeners;
    }

    /// Opens the native handle and applies the configuration. Opening an
    /// open connection does nothing.
    pub fn open(&self) -> Result<()> {
        if self.state.get() == ConnectionState::Open {
            return Ok(());
        }
        let builder = self.connection_string.borrow().clone().ok_or_else(|| {
            SqliteError::InvalidOperation(
                "The connection string must be set before open can be called.".into(),
            )
        })?;

        engine::initialize();
        let (filename, flags) = open_target(&builder, self.base_directory.borrow().as_deref());
        let c_filename = CString::new(filename.as_str())
            .map_err(|_| SqliteError::Argument("The data source must not contain NUL characters.".into()))?;

        let mut raw = ptr::null_mut();
        let rc = unsafe { ffi::sqlite3_open_v2(c_filename.as_ptr(), &mut raw, flags, ptr::null()) };
        let mut handle = unsafe { DatabaseHandle::acquire(raw) };
        if rc != ffi::SQLITE_OK {
            let err = SqliteError::from_status(rc, handle.as_ptr());
            handle.release();
            tracing::debug!(filename = %filename, code = rc, "open failed");
            return Err(err);
        }
        *self.db.borrow_mut() = handle;
        self.state.set(ConnectionState::Open);
        tracing::debug!(filename = %filename, flags, "connection opened");

        if let Err(err) = self.apply_configuration() {
            tracing::warn!(error = %err, "configuration failed, closing connection");
            self.release_native();
            self.state.set(ConnectionState::Closed);
            return Err(err);
        }

        self.notify(StateChange {
            original: ConnectionState::Closed,
            current: ConnectionState::Open,
        });
        Ok(())
    }

    fn apply_configuration(&self) -> Result<()> {
        let configuration = self.configuration.borrow().clone();
        for pragma in configuration.pragma_statements() {
            tracing::debug!(pragma = %pragma, "applying pragma");
            self.execute_non_query(&pragma)?;
        }
        let db = self.db_ptr();
        let bind = self.bind_context();
        for routine in configuration.routines() {
            tracing::debug!(routine = routine.name(), "registering routine");
            error::check(routine.install(db, bind), db)?;
        }
        Ok(())
    }

    /// Rolls back the active transaction, finalizes live statements and
    /// releases the native handle.
    pub fn close(&self) {
        if !self.db.borrow().is_valid() {
            return;
        }
        let active = self.transaction.borrow_mut().take();
        if let Some(transaction) = active {
            if !transaction.is_completed() {
                if let Err(err) = self.execute_non_query("ROLLBACK;") {
                    tracing::warn!(error = %err, "rollback on close failed");
                }
                transaction.mark_completed();
            }
        }
        self.release_native();
        self.set_state(ConnectionState::Closed);
        tracing::debug!("connection closed");
    }

    fn release_native(&self) {
        let statements = self.statements.borrow_mut().drain();
        drop(statements);
        let rc = self.db.borrow_mut().release();
        if rc != ffi::SQLITE_OK {
            tracing::warn!(code = rc, "closing the database handle reported a failure");
        }
    }

    /// The engine's filename for the main database while open, otherwise the
    /// configured data source.
    pub fn data_source(&self) -> String {
        if self.state.get() == ConnectionState::Open {
            let db = self.db_ptr();
            let name = CString::new(MAIN_DATABASE).ok();
            if let Some(name) = name {
                let ptr = unsafe { ffi::sqlite3_db_filename(db, name.as_ptr()) };
                if !ptr.is_null() {
                    let filename = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
                    if !filename.is_empty() {
                        return filename;
                    }
                }
            }
        }
        self.connection_string
            .borrow()
            .as_ref()
            .map(|builder| builder.data_source.clone())
            .unwrap_or_default()
    }

    pub fn database(&self) -> &'static str {
        MAIN_DATABASE
    }

    pub fn server_version(&self) -> String {
        engine::library_version()
    }

    /// A snapshot of the current configuration.
    pub fn configuration(&self) -> Configuration {
        self.configuration.borrow().clone()
    }

    pub fn foreign_keys(&self) -> Option<bool> {
        self.configuration.borrow().foreign_keys
    }

    pub fn set_foreign_keys(&self, value: Option<bool>) -> Result<()> {
        if self.configuration.borrow().foreign_keys == value {
            return Ok(());
        }
        self.require_closed("foreign_keys")?;
        self.configuration.borrow_mut().foreign_keys = value;
        Ok(())
    }

    pub fn recursive_triggers(&self) -> Option<bool> {
        self.configuration.borrow().recursive_triggers
    }

    pub fn set_recursive_triggers(&self, value: Option<bool>) -> Result<()> {
        if self.configuration.borrow().recursive_triggers == value {
            return Ok(());
        }
        self.require_closed("recursive_triggers")?;
        self.configuration.borrow_mut().recursive_triggers = value;
        Ok(())
    }

    pub fn journal_mode(&self) -> Option<JournalMode> {
        self.configuration.borrow().journal_mode
    }

    pub fn set_journal_mode(&self, value: Option<JournalMode>) -> Result<()> {
        if self.configuration.borrow().journal_mode == value {
            return Ok(());
        }
        self.require_closed("journal_mode")?;
        self.configuration.borrow_mut().journal_mode = value;
        Ok(())
    }

    pub fn automatic_index(&self) -> Option<bool> {
        self.configuration.borrow().automatic_index
    }

    pub fn set_automatic_index(&self, value: Option<bool>) -> Result<()> {
        if self.configuration.borrow().automatic_index == value {
            return Ok(());
        }
        self.require_closed("automatic_index")?;
        self.configuration.borrow_mut().automatic_index = value;
        Ok(())
    }

    pub fn synchronous(&self) -> Option<SynchronousMode> {
        self.configuration.borrow().synchronous
    }

    /// Records the mode and, on an open connection, applies it immediately.
    pub fn set_synchronous(&self, value: Option<SynchronousMode>) -> Result<()> {
        if self.configuration.borrow().synchronous == value {
            return Ok(());
        }
        self.configuration.borrow_mut().synchronous = value;
        if let (ConnectionState::Open, Some(mode)) = (self.state.get(), value) {
            self.execute_non_query(&config::synchronous_pragma(mode))?;
        }
        Ok(())
    }

    pub fn auto_vacuum(&self) -> Option<AutoVacuumMode> {
        self.configuration.borrow().auto_vacuum
    }

    pub fn set_auto_vacuum(&self, value: Option<AutoVacuumMode>) -> Result<()> {
        if self.configuration.borrow().auto_vacuum == value {
            return Ok(());
        }
        self.configuration.borrow_mut().auto_vacuum = value;
        if let (ConnectionState::Open, Some(mode)) = (self.state.get(), value) {
            self.execute_non_query(&config::auto_vacuum_pragma(mode))?;
        }
        Ok(())
    }

    pub fn create_command(&self, text: &str) -> Command<'_> {
        Command::new(self, text)
    }

    /// Compiles the first statement of `sql` for direct stepping.
    pub fn prepare(&self, sql: &str) -> Result<Statement<'_>> {
        self.require_open("prepare")?;
        Statement::prepare(self, sql, self.default_timeout.get())
    }

    pub fn execute_non_query(&self, sql: &str) -> Result<i64> {
        self.create_command(sql).execute_non_query()
    }

    pub fn execute_scalar<T: FromSql>(&self, sql: &str) -> Result<T> {
        self.create_command(sql).execute_scalar()
    }

    pub fn execute_reader(&self, sql: &str) -> Result<DataReader<'_>> {
        self.create_command(sql).execute_reader()
    }

    /// Number of statements currently prepared against this connection.
    pub fn live_statement_count(&self) -> usize {
        self.statements.borrow().len()
    }

    pub fn last_insert_rowid(&self) -> Result<i64> {
        let db = self.require_open("last_insert_rowid")?;
        Ok(unsafe { ffi::sqlite3_last_insert_rowid(db) })
    }

    /// Rows changed by the most recent data-modifying statement.
    pub fn changes(&self) -> Result<i64> {
        let db = self.require_open("changes")?;
        Ok(i64::from(unsafe { ffi::sqlite3_changes(db) }))
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.borrow().is_some()
    }

    pub fn begin_transaction(&self) -> Result<Transaction<'_>> {
        self.begin_transaction_with(IsolationLevel::Unspecified)
    }

    pub fn begin_transaction_with(&self, level: IsolationLevel) -> Result<Transaction<'_>> {
        self.require_open("begin_transaction")?;
        if self.transaction.borrow().is_some() {
            return Err(SqliteError::InvalidOperation(
                "Parallel transactions are not supported.".into(),
            ));
        }
        let transaction = Transaction::begin(self, level)?;
        *self.transaction.borrow_mut() = Some(transaction.state());
        Ok(transaction)
    }

    fn validate_name(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(SqliteError::ArgumentNull("name"));
        }
        Ok(())
    }

    fn install(&self, routine: Option<Rc<dyn NativeRoutine>>) -> Result<()> {
        let db = self.db_ptr();
        if let Some(routine) = routine {
            tracing::debug!(routine = routine.name(), "registering routine");
            error::check(routine.install(db, self.bind_context()), db)?;
        }
        Ok(())
    }

    pub fn create_collation<F>(&self, name: &str, compare: F) -> Result<()>
    where
        F: Fn(&str, &str) -> Ordering + 'static,
    {
        self.create_collation_with_state(name, (), move |_, a, b| compare(a, b))
    }

    pub fn create_collation_with_state<S, F>(&self, name: &str, state: S, compare: F) -> Result<()>
    where
        S: 'static,
        F: Fn(&S, &str, &str) -> Ordering + 'static,
    {
        Self::validate_name(name)?;
        self.require_open("create_collation")?;
        self.configuration
            .borrow_mut()
            .add_collation_with_state(name, state, compare);
        let routine = self.configuration.borrow().collation(name);
        self.install(routine)
    }

    pub fn remove_collation(&self, name: &str) -> Result<()> {
        Self::validate_name(name)?;
        let db = self.require_open("remove_collation")?;
        self.configuration.borrow_mut().remove_collation(name);
        error::check(functions::uninstall_collation(db, name), db)
    }

    /// Registers a scalar function. `arity` of -1 accepts any number of
    /// arguments. `state` is passed to every invocation.
    pub fn create_function<S, R, F>(
        &self,
        name: &str,
        arity: i32,
        flags: FunctionFlags,
        state: S,
        function: F,
    ) -> Result<()>
    where
        S: 'static,
        R: ToSql,
        F: Fn(&S, &Arguments<'_>) -> Result<R> + 'static,
    {
        Self::validate_name(name)?;
        self.require_open("create_function")?;
        self.configuration
            .borrow_mut()
            .add_function(name, arity, flags, state, function);
        let routine = self.configuration.borrow().function(name, arity);
        self.install(routine)
    }

    pub fn remove_function(&self, name: &str, arity: i32) -> Result<()> {
        Self::validate_name(name)?;
        let db = self.require_open("remove_function")?;
        self.configuration.borrow_mut().remove_function(name, arity);
        error::check(functions::uninstall_function(db, name, arity), db)
    }

    /// Registers an aggregate. Each execution starts from a clone of `seed`,
    /// folds every row through `step`, and produces its result with
    /// `finalize`.
    pub fn create_aggregate<A, R, S, F>(
        &self,
        name: &str,
        arity: i32,
        flags: FunctionFlags,
        seed: A,
        step: S,
        finalize: F,
    ) -> Result<()>
    where
        A: Clone + 'static,
        R: ToSql,
        S: Fn(A, &Arguments<'_>) -> Result<A> + 'static,
        F: Fn(A) -> Result<R> + 'static,
    {
        Self::validate_name(name)?;
        self.require_open("create_aggregate")?;
        self.configuration
            .borrow_mut()
            .add_aggregate(name, arity, flags, seed, step, finalize);
        let routine = self.configuration.borrow().function(name, arity);
        self.install(routine)
    }

    pub fn remove_aggregate(&self, name: &str, arity: i32) -> Result<()> {
        Self::validate_name(name)?;
        let db = self.require_open("remove_aggregate")?;
        self.configuration.borrow_mut().remove_aggregate(name, arity);
        error::check(functions::uninstall_function(db, name, arity), db)
    }

    pub fn enable_extensions(&self, enable: bool) -> Result<()> {
        let db = self.require_open("enable_extensions")?;
        let rc = unsafe { ffi::sqlite3_enable_load_extension(db, c_int::from(enable)) };
        error::check(rc, db)
    }

    pub fn load_extension(&self, path: &Path, entry_point: Option<&str>) -> Result<()> {
        let db = self.require_open("load_extension")?;
        let file = CString::new(path.to_string_lossy().as_bytes())
            .map_err(|_| SqliteError::Argument("The extension path must not contain NUL characters.".into()))?;
        let entry = entry_point
            .map(CString::new)
            .transpose()
            .map_err(|_| SqliteError::Argument("The entry point must not contain NUL characters.".into()))?;
        let mut message = ptr::null_mut();
        let rc = unsafe {
            ffi::sqlite3_load_extension(
                db,
                file.as_ptr(),
                entry.as_ref().map_or(ptr::null(), |e| e.as_ptr()),
                &mut message,
            )
        };
        if rc == ffi::SQLITE_OK {
            return Ok(());
        }
        let detail = if message.is_null() {
            None
        } else {
            let text = unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned();
            unsafe { ffi::sqlite3_free(message.cast()) };
            Some(text)
        };
        Err(match detail {
            Some(text) => SqliteError::native(rc, text),
            None => SqliteError::from_status(rc, db),
        })
    }

    /// Copies the main database into `destination`'s main database.
    pub fn backup_database(&self, destination: &Connection) -> Result<()> {
        self.backup_database_to(destination, MAIN_DATABASE, MAIN_DATABASE)
    }

    /// Copies database `source_name` into `destination_name` of
    /// `destination`, opening the destination for the duration of the copy
    /// when it is closed.
    pub fn backup_database_to(
        &self,
        destination: &Connection,
        destination_name: &str,
        source_name: &str,
    ) -> Result<()> {
        let source = self.require_open("backup_database")?;
        let destination_name = CString::new(destination_name)
            .map_err(|_| SqliteError::Argument("The database name must not contain NUL characters.".into()))?;
        let source_name = CString::new(source_name)
            .map_err(|_| SqliteError::Argument("The database name must not contain NUL characters.".into()))?;

        let close_destination = destination.state() == ConnectionState::Closed;
        if close_destination {
            destination.open()?;
        }

        let result = (|| {
            let target = destination.db_ptr();
            let raw = unsafe {
                ffi::sqlite3_backup_init(target, destination_name.as_ptr(), source, source_name.as_ptr())
            };
            if raw.is_null() {
                let rc = unsafe { ffi::sqlite3_errcode(target) };
                return Err(SqliteError::from_status(rc, target));
            }
            let mut backup = unsafe { BackupHandle::acquire(raw) };
            let rc = unsafe { ffi::sqlite3_backup_step(backup.as_ptr(), -1) };
            let finished = backup.release();
            error::check(rc, target)?;
            error::check(finished, target)
        })();

        if close_destination {
            destination.close();
        }
        result
    }

    /// Opens incremental I/O on one blob cell.
    pub fn open_blob(&self, table: &str, column: &str, rowid: i64, read_only: bool) -> Result<Blob<'_>> {
        self.require_open("open_blob")?;
        Blob::open(self, MAIN_DATABASE, table, column, rowid, read_only)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("connection_string", &self.connection_string())
            .field("state", &self.state.get())
            .field("live_statements", &self.live_statement_count())
            .finish()
    }
}

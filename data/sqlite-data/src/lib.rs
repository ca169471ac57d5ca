///
/// sqlite-data - Managed data access over SQLite
///
/// This crate wraps the raw SQLite C interface in a connection/command/
/// reader/transaction API. It includes:
///
/// - engine: process-wide initialization and engine capability detection
/// - handle: owned wrappers for database, statement, backup and blob handles
/// - error: status-code translation and the error taxonomy
/// - value: storage classes, `ToSql`/`FromSql` conversions
/// - datetime: Julian-day and ISO-8601 text conversions
/// - statement: single compiled statements and the live-statement registry
/// - command: SQL text plus parameters; execute entry points
/// - reader: forward-only cursor over one or more result sets
/// - connection_string: `key=value;...` connection strings
/// - config: pragma options, routine registries, TOML loading
/// - connection: open/close lifecycle, configuration, registration
/// - transaction: BEGIN/COMMIT/ROLLBACK with single-active enforcement
/// - functions: user-defined scalar functions, aggregates and collations
/// - blob: incremental BLOB I/O
///
/// Entry points:
/// - `Connection::new` then `open`
/// - `Connection::create_command` / `execute_reader` / `execute_non_query`
/// - `Connection::begin_transaction`
/// - `Connection::create_function` / `create_aggregate` / `create_collation`
///

pub mod blob;
pub mod command;
pub mod config;
pub mod connection;
pub mod connection_string;
pub mod datetime;
pub mod engine;
pub mod error;
pub mod functions;
pub mod handle;
pub mod reader;
pub mod statement;
pub mod transaction;
pub mod value;

pub use blob::Blob;
pub use command::{Command, Parameter};
pub use config::{AutoVacuumMode, Configuration, JournalMode, SynchronousMode};
pub use connection::{Connection, ConnectionState, StateChange};
pub use connection_string::{CacheMode, ConnectionStringBuilder, OpenMode};
pub use error::{ErrorKind, Result, SqliteError};
pub use functions::{Arguments, FunctionFlags};
pub use reader::DataReader;
pub use statement::Statement;
pub use transaction::{IsolationLevel, Transaction};
pub use value::{BindContext, FromSql, StorageClass, ToSql, Value, ValueRef};

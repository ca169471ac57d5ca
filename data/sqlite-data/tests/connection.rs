///
/// # Integration Tests for connections
///
/// Open flags against real files, configuration replay, shared-cache memory
/// databases, backup, and the close lifecycle.
///

use std::cell::RefCell;
use std::fs;
use std::rc::Rc;

use tempfile::TempDir;

use sqlite_data::{
    Configuration, Connection, ConnectionState, ErrorKind, FunctionFlags, JournalMode, SqliteError,
};

const SQLITE_READONLY: i32 = 8;
const SQLITE_CANTOPEN: i32 = 14;
const SQLITE_ERROR: i32 = 1;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn file_connection(dir: &TempDir, name: &str, extra: &str) -> Connection {
    let path = dir.path().join(name);
    Connection::new(&format!("Data Source={}{}", path.display(), extra))
        .expect("Failed to create connection")
}

#[test]
fn test_read_write_create_makes_file() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let connection = file_connection(&temp_dir, "created.db", "");
    connection.open().expect("Failed to open");
    connection
        .execute_non_query("CREATE TABLE t (x INTEGER);")
        .expect("Failed to create table");
    assert!(temp_dir.path().join("created.db").exists());
    assert!(connection.data_source().ends_with("created.db"));
}

#[test]
fn test_read_write_requires_existing_file() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let connection = file_connection(&temp_dir, "missing.db", ";Mode=ReadWrite");
    let err = connection.open().unwrap_err();
    assert_eq!(err.native_code(), Some(SQLITE_CANTOPEN));
    assert_eq!(connection.state(), ConnectionState::Closed);
}

#[test]
fn test_read_only_rejects_writes() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    {
        let writer = file_connection(&temp_dir, "ro.db", "");
        writer.open().unwrap();
        writer.execute_non_query("CREATE TABLE t (x INTEGER);").unwrap();
    }
    let reader = file_connection(&temp_dir, "ro.db", ";Mode=ReadOnly");
    reader.open().unwrap();
    let err = reader
        .execute_non_query("INSERT INTO t VALUES (1);")
        .unwrap_err();
    assert_eq!(err.native_code(), Some(SQLITE_READONLY));
    let count: i64 = reader.execute_scalar("SELECT count(*) FROM t;").unwrap();
    assert_eq!(count, 0);
}

#[test]
fn test_invalid_uri_mode() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let path = temp_dir.path().join("uri.db");
    let connection =
        Connection::new(&format!("Data Source=file:{}?mode=invalidmode", path.display())).unwrap();
    let err = connection.open().unwrap_err();
    assert_eq!(err.native_code(), Some(SQLITE_ERROR));
    assert!(err.message().contains("invalidmode"));
}

#[test]
fn test_base_directory_for_relative_paths() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let connection = Connection::new("Data Source=relative.db").unwrap();
    connection
        .set_base_directory(Some(temp_dir.path().to_path_buf()))
        .unwrap();
    connection.open().unwrap();
    connection.execute_non_query("CREATE TABLE t (x);").unwrap();
    assert!(temp_dir.path().join("relative.db").exists());
}

#[test]
fn test_shared_cache_memory_database() {
    let first = Connection::new("Data Source=people;Mode=Memory;Cache=Shared").unwrap();
    let second = Connection::new("Data Source=people;Mode=Memory;Cache=Shared").unwrap();
    first.open().unwrap();
    second.open().unwrap();
    first
        .execute_non_query("CREATE TABLE person (name TEXT); INSERT INTO person VALUES ('Ann');")
        .unwrap();
    let name: String = second.execute_scalar("SELECT name FROM person;").unwrap();
    assert_eq!(name, "Ann");
}

#[test]
fn test_private_memory_databases_are_isolated() {
    let first = Connection::new("Data Source=isolated;Mode=Memory").unwrap();
    let second = Connection::new("Data Source=isolated;Mode=Memory").unwrap();
    first.open().unwrap();
    second.open().unwrap();
    first.execute_non_query("CREATE TABLE t (x);").unwrap();
    let err = second.execute_scalar::<i64>("SELECT count(*) FROM t;").unwrap_err();
    assert!(err.message().contains("no such table"));
}

#[test]
fn test_configuration_from_toml_is_applied() {
    init_tracing();
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("db.toml");
    fs::write(
        &config_path,
        "foreign_keys = true\njournal_mode = \"wal\"\nsynchronous = \"normal\"\n",
    )
    .expect("Failed to write config");
    let configuration = Configuration::from_path(&config_path).expect("Failed to load config");

    let path = temp_dir.path().join("configured.db");
    let connection =
        Connection::with_configuration(&format!("Data Source={}", path.display()), &configuration)
            .unwrap();
    connection.open().unwrap();
    let foreign_keys: i64 = connection.execute_scalar("PRAGMA foreign_keys;").unwrap();
    let journal: String = connection.execute_scalar("PRAGMA journal_mode;").unwrap();
    let synchronous: i64 = connection.execute_scalar("PRAGMA synchronous;").unwrap();
    assert_eq!(foreign_keys, 1);
    assert_eq!(journal, "wal");
    assert_eq!(synchronous, 1);
    assert_eq!(connection.journal_mode(), Some(JournalMode::Wal));
}

#[test]
fn test_options_set_while_closed_apply_on_open() {
    let connection = Connection::new("Data Source=:memory:").unwrap();
    connection.set_foreign_keys(Some(true)).unwrap();
    connection.set_recursive_triggers(Some(true)).unwrap();
    connection.open().unwrap();
    let foreign_keys: i64 = connection.execute_scalar("PRAGMA foreign_keys;").unwrap();
    let recursive: i64 = connection.execute_scalar("PRAGMA recursive_triggers;").unwrap();
    assert_eq!((foreign_keys, recursive), (1, 1));
}

#[test]
fn test_failed_configuration_leaves_connection_closed() {
    init_tracing();
    let mut configuration = Configuration::new();
    configuration.add_function("too_many_args", 1000, FunctionFlags::default(), (), |_, _| Ok(0i64));
    let connection = Connection::with_configuration("Data Source=:memory:", &configuration).unwrap();
    let err = connection.open().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Native);
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert!(connection.execute_non_query("SELECT 1;").is_err());
}

#[test]
fn test_routines_replay_after_reopen() {
    let mut configuration = Configuration::new();
    configuration.add_function("double_it", 1, FunctionFlags::DETERMINISTIC, (), |_, args| {
        Ok(args.get::<i64>(0)? * 2)
    });
    let connection = Connection::with_configuration("Data Source=:memory:", &configuration).unwrap();
    connection.open().unwrap();
    let value: i64 = connection.execute_scalar("SELECT double_it(21);").unwrap();
    assert_eq!(value, 42);

    connection
        .create_function("triple_it", 1, FunctionFlags::default(), (), |_, args| {
            Ok(args.get::<i64>(0)? * 3)
        })
        .unwrap();
    connection.close();
    connection.open().unwrap();
    let value: i64 = connection.execute_scalar("SELECT triple_it(double_it(1));").unwrap();
    assert_eq!(value, 6);
}

#[test]
fn test_backup_into_closed_destination() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let source = Connection::new("Data Source=:memory:").unwrap();
    source.open().unwrap();
    source
        .execute_non_query("CREATE TABLE t (x INTEGER); INSERT INTO t VALUES (1), (2), (3);")
        .unwrap();

    let destination = file_connection(&temp_dir, "backup.db", "");
    source.backup_database(&destination).expect("Backup failed");
    assert_eq!(destination.state(), ConnectionState::Closed);

    destination.open().unwrap();
    let total: i64 = destination.execute_scalar("SELECT sum(x) FROM t;").unwrap();
    assert_eq!(total, 6);
}

#[test]
fn test_backup_keeps_open_destination_open() {
    let source = Connection::new("Data Source=:memory:").unwrap();
    let destination = Connection::new("Data Source=:memory:").unwrap();
    source.open().unwrap();
    destination.open().unwrap();
    source.execute_non_query("CREATE TABLE t (x); INSERT INTO t VALUES ('a');").unwrap();
    source.backup_database(&destination).unwrap();
    assert_eq!(destination.state(), ConnectionState::Open);
    let value: String = destination.execute_scalar("SELECT x FROM t;").unwrap();
    assert_eq!(value, "a");
}

#[test]
fn test_backup_requires_open_source() {
    let source = Connection::new("Data Source=:memory:").unwrap();
    let destination = Connection::new("Data Source=:memory:").unwrap();
    let err = source.backup_database(&destination).unwrap_err();
    assert_eq!(
        err.to_string(),
        "backup_database can only be called when the connection is open."
    );
}

#[test]
fn test_close_is_idempotent_and_invalidates_statements() {
    init_tracing();
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&events);
    let connection = Connection::new("Data Source=:memory:").unwrap();
    connection.on_state_change(move |change| sink.borrow_mut().push(change.current));
    connection.open().unwrap();

    let mut statement = connection.prepare("SELECT 1;").unwrap();
    connection.close();
    connection.close();

    let err = statement.step().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::State);
    assert_eq!(err.to_string(), "The statement has been finalized.");
    assert_eq!(
        *events.borrow(),
        vec![ConnectionState::Open, ConnectionState::Closed]
    );
}

#[test]
fn test_operations_require_open_connection() {
    let connection = Connection::new("Data Source=:memory:").unwrap();
    let err = connection.execute_non_query("SELECT 1;").unwrap_err();
    assert!(matches!(err, SqliteError::InvalidOperation(_)));
    assert!(connection.last_insert_rowid().is_err());
    assert!(connection.changes().is_err());
}

#[test]
fn test_last_insert_rowid_and_changes() {
    let connection = Connection::new("Data Source=:memory:").unwrap();
    connection.open().unwrap();
    connection
        .execute_non_query("CREATE TABLE t (id INTEGER PRIMARY KEY, x); INSERT INTO t (x) VALUES (1), (2);")
        .unwrap();
    assert_eq!(connection.last_insert_rowid().unwrap(), 2);
    assert_eq!(connection.execute_non_query("UPDATE t SET x = 0;").unwrap(), 2);
    assert_eq!(connection.changes().unwrap(), 2);
}

#[test]
fn test_load_missing_extension() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let connection = Connection::new("Data Source=:memory:").unwrap();
    connection.open().unwrap();
    connection.enable_extensions(true).unwrap();
    let missing = temp_dir.path().join("no_such_extension");
    let err = connection.load_extension(&missing, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Native);
    assert_eq!(err.native_code(), Some(SQLITE_ERROR));
}

#[test]
fn test_auto_vacuum_applies_while_open() {
    let connection = Connection::new("Data Source=:memory:").unwrap();
    connection.open().unwrap();
    connection
        .set_auto_vacuum(Some(sqlite_data::AutoVacuumMode::Full))
        .unwrap();
    assert_eq!(connection.configuration().auto_vacuum, Some(sqlite_data::AutoVacuumMode::Full));
    let mode: i64 = connection.execute_scalar("PRAGMA auto_vacuum;").unwrap();
    assert_eq!(mode, 1);
}

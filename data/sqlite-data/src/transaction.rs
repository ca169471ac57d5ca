///
/// Transaction controller.
///
/// A `Transaction` is bound to one connection and completes exactly once,
/// through `commit`, `rollback`, `dispose` or drop. The completion flag lives
/// in a `TransactionState` shared with the connection so that closing the
/// connection can roll back and complete a transaction it does not own.
///

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use rusqlite::ffi;

use crate::connection::Connection;
use crate::error::{Result, SqliteError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Keep whatever read-uncommitted setting the connection already has.
    #[default]
    Unspecified,
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
    Snapshot,
    Chaos,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IsolationLevel::Unspecified => "Unspecified",
            IsolationLevel::ReadUncommitted => "ReadUncommitted",
            IsolationLevel::ReadCommitted => "ReadCommitted",
            IsolationLevel::RepeatableRead => "RepeatableRead",
            IsolationLevel::Serializable => "Serializable",
            IsolationLevel::Snapshot => "Snapshot",
            IsolationLevel::Chaos => "Chaos",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
pub(crate) struct TransactionState {
    completed: Cell<bool>,
}

impl TransactionState {
    pub(crate) fn is_completed(&self) -> bool {
        self.completed.get()
    }

    pub(crate) fn mark_completed(&self) {
        self.completed.set(true);
    }
}

pub struct Transaction<'c> {
    connection: &'c Connection,
    state: Rc<TransactionState>,
    level: IsolationLevel,
}

impl<'c> Transaction<'c> {
    pub(crate) fn begin(connection: &'c Connection, requested: IsolationLevel) -> Result<Self> {
        let level = match requested {
            IsolationLevel::Chaos => {
                return Err(SqliteError::Argument(format!(
                    "The isolation level '{requested}' is not supported."
                )));
            }
            IsolationLevel::ReadUncommitted => {
                connection.execute_non_query("PRAGMA read_uncommitted = 1;")?;
                IsolationLevel::ReadUncommitted
            }
            IsolationLevel::Unspecified => {
                let read_uncommitted: i64 = connection.execute_scalar("PRAGMA read_uncommitted;")?;
                if read_uncommitted != 0 {
                    IsolationLevel::ReadUncommitted
                } else {
                    IsolationLevel::Serializable
                }
            }
            _ => {
                connection.execute_non_query("PRAGMA read_uncommitted = 0;")?;
                IsolationLevel::Serializable
            }
        };
        if let Err(err) = connection.execute_non_query("BEGIN;") {
            if requested == IsolationLevel::ReadUncommitted {
                reset_read_uncommitted(connection);
            }
            return Err(err);
        }
        tracing::debug!(isolation = %level, "transaction started");
        Ok(Self {
            connection,
            state: Rc::new(TransactionState::default()),
            level,
        })
    }

    pub(crate) fn state(&self) -> Rc<TransactionState> {
        Rc::clone(&self.state)
    }

    /// The owning connection, or `None` once the transaction has completed.
    pub fn connection(&self) -> Option<&'c Connection> {
        (!self.state.is_completed()).then_some(self.connection)
    }

    /// The effective isolation level. Levels stronger than read-uncommitted
    /// all run as serializable.
    pub fn isolation_level(&self) -> IsolationLevel {
        self.level
    }

    pub fn is_completed(&self) -> bool {
        self.state.is_completed()
    }

    pub fn commit(&mut self) -> Result<()> {
        self.complete("COMMIT;")
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.complete("ROLLBACK;")
    }

    /// Rolls back unless already completed. Safe to call repeatedly.
    ///
    /// The transaction always ends up completed, including when the engine
    /// already ended it (`INSERT OR ROLLBACK`, a `COMMIT` issued as text) or
    /// the rollback fails.
    pub fn dispose(&mut self) {
        if self.state.is_completed() {
            return;
        }
        if self.engine_ended() {
            tracing::debug!("transaction already ended by the engine");
            self.finish();
            return;
        }
        if let Err(err) = self.rollback() {
            tracing::warn!(error = %err, "rollback on dispose failed");
            self.finish();
        }
    }

    fn engine_ended(&self) -> bool {
        let db = self.connection.db_ptr();
        !db.is_null() && unsafe { ffi::sqlite3_get_autocommit(db) } != 0
    }

    fn complete(&mut self, sql: &str) -> Result<()> {
        if self.state.is_completed() {
            return Err(SqliteError::transaction_completed());
        }
        self.connection.execute_non_query(sql)?;
        self.finish();
        tracing::debug!(statement = sql, "transaction completed");
        Ok(())
    }

    fn finish(&self) {
        self.state.mark_completed();
        self.connection.clear_transaction();
        if self.level == IsolationLevel::ReadUncommitted {
            reset_read_uncommitted(self.connection);
        }
    }
}

fn reset_read_uncommitted(connection: &Connection) {
    if let Err(err) = connection.execute_non_query("PRAGMA read_uncommitted = 0;") {
        tracing::warn!(error = %err, "resetting read_uncommitted failed");
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("isolation_level", &self.level)
            .field("completed", &self.state.is_completed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn memory() -> Connection {
        let connection = Connection::new("Data Source=:memory:").unwrap();
        connection.open().unwrap();
        connection
    }

    #[test]
    fn test_commit_completes_and_detaches() {
        let connection = memory();
        let mut transaction = connection.begin_transaction().unwrap();
        assert!(connection.in_transaction());
        assert!(transaction.connection().is_some());
        transaction.commit().unwrap();
        assert!(transaction.is_completed());
        assert!(transaction.connection().is_none());
        assert!(!connection.in_transaction());
    }

    #[test]
    fn test_second_completion_fails() {
        let connection = memory();
        let mut transaction = connection.begin_transaction().unwrap();
        transaction.rollback().unwrap();
        let err = transaction.commit().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        assert_eq!(
            err.to_string(),
            "This transaction has completed; it is no longer usable."
        );
        assert!(transaction.rollback().is_err());
        transaction.dispose();
        transaction.dispose();
    }

    #[test]
    fn test_chaos_rejected() {
        let connection = memory();
        let err = connection
            .begin_transaction_with(IsolationLevel::Chaos)
            .unwrap_err();
        assert_eq!(err.to_string(), "The isolation level 'Chaos' is not supported.");
        assert!(!connection.in_transaction());
    }

    #[test]
    fn test_read_uncommitted_toggles_pragma() {
        let connection = memory();
        let mut transaction = connection
            .begin_transaction_with(IsolationLevel::ReadUncommitted)
            .unwrap();
        let flag: i64 = connection.execute_scalar("PRAGMA read_uncommitted;").unwrap();
        assert_eq!(flag, 1);
        assert_eq!(transaction.isolation_level(), IsolationLevel::ReadUncommitted);
        transaction.commit().unwrap();
        let flag: i64 = connection.execute_scalar("PRAGMA read_uncommitted;").unwrap();
        assert_eq!(flag, 0);
    }

    #[test]
    fn test_unspecified_infers_level() {
        let connection = memory();
        connection.execute_non_query("PRAGMA read_uncommitted = 1;").unwrap();
        let transaction = connection.begin_transaction().unwrap();
        assert_eq!(transaction.isolation_level(), IsolationLevel::ReadUncommitted);
        drop(transaction);
        connection.execute_non_query("PRAGMA read_uncommitted = 0;").unwrap();
        let transaction = connection
            .begin_transaction_with(IsolationLevel::RepeatableRead)
            .unwrap();
        assert_eq!(transaction.isolation_level(), IsolationLevel::Serializable);
    }

    #[test]
    fn test_drop_rolls_back() {
        let connection = memory();
        connection.execute_non_query("CREATE TABLE t (x INTEGER);").unwrap();
        {
            let _transaction = connection.begin_transaction().unwrap();
            connection.execute_non_query("INSERT INTO t VALUES (1);").unwrap();
        }
        let count: i64 = connection.execute_scalar("SELECT count(*) FROM t;").unwrap();
        assert_eq!(count, 0);
        assert!(!connection.in_transaction());
    }

    #[test]
    fn test_dispose_after_engine_rollback_clears_connection() {
        let connection = memory();
        connection
            .execute_non_query("CREATE TABLE t (x INTEGER PRIMARY KEY);")
            .unwrap();
        let transaction = connection.begin_transaction().unwrap();
        connection.execute_non_query("INSERT INTO t VALUES (1);").unwrap();
        let err = connection
            .execute_non_query("INSERT OR ROLLBACK INTO t VALUES (1);")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Native);
        drop(transaction);

        assert!(!connection.in_transaction());
        let mut next = connection.begin_transaction().unwrap();
        next.commit().unwrap();
    }

    #[test]
    fn test_dispose_after_textual_commit() {
        let connection = memory();
        connection.execute_non_query("CREATE TABLE t (x INTEGER);").unwrap();
        let mut transaction = connection.begin_transaction().unwrap();
        connection.execute_non_query("INSERT INTO t VALUES (1);").unwrap();
        connection.execute_non_query("COMMIT;").unwrap();
        transaction.dispose();
        assert!(transaction.is_completed());
        assert!(!connection.in_transaction());
        let count: i64 = connection.execute_scalar("SELECT count(*) FROM t;").unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_failed_begin_resets_read_uncommitted() {
        let connection = memory();
        connection.execute_non_query("BEGIN;").unwrap();
        let err = connection
            .begin_transaction_with(IsolationLevel::ReadUncommitted)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Native);
        assert!(!connection.in_transaction());
        let flag: i64 = connection.execute_scalar("PRAGMA read_uncommitted;").unwrap();
        assert_eq!(flag, 0);
        connection.execute_non_query("ROLLBACK;").unwrap();
    }
}

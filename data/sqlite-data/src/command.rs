///
/// Commands: SQL text plus the parameter values bound to every compiled unit
/// of that text when it executes.
///

use std::ffi::CString;
use std::time::Duration;

use crate::connection::{Connection, ConnectionState};
use crate::error::{Result, SqliteError};
use crate::reader::DataReader;
use crate::statement::Statement;
use crate::value::{FromSql, ToSql, Value, ValueRef};

const PREFIXES: [char; 3] = ['@', '$', ':'];

/// One parameter value. Unnamed parameters bind by position.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: Option<String>,
    pub value: Value,
}

impl Parameter {
    fn matches(&self, sql_name: &str) -> bool {
        match &self.name {
            Some(name) if name == sql_name => true,
            Some(name) if !name.starts_with(PREFIXES) => sql_name
                .strip_prefix(PREFIXES)
                .is_some_and(|bare| bare == name),
            _ => false,
        }
    }
}

#[derive(Debug)]
pub struct Command<'c> {
    connection: &'c Connection,
    text: String,
    timeout: Duration,
    parameters: Vec<Parameter>,
}

impl<'c> Command<'c> {
    pub(crate) fn new(connection: &'c Connection, text: &str) -> Self {
        Self {
            connection,
            text: text.to_string(),
            timeout: connection.default_timeout(),
            parameters: Vec::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: &str) {
        self.text = text.to_string();
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Busy-retry budget for each step. Zero waits indefinitely.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Adds a named parameter. The name may omit its `@`, `$` or `:` prefix.
    pub fn add_parameter<T: ToSql + ?Sized>(&mut self, name: &str, value: &T) -> Result<&mut Self> {
        if name.is_empty() {
            return Err(SqliteError::ArgumentNull("name"));
        }
        let value = value.to_sql(&self.connection.bind_context())?;
        self.parameters.push(Parameter {
            name: Some(name.to_string()),
            value,
        });
        Ok(self)
    }

    /// Adds a parameter bound by position to `?` placeholders.
    pub fn add_positional<T: ToSql + ?Sized>(&mut self, value: &T) -> Result<&mut Self> {
        let value = value.to_sql(&self.connection.bind_context())?;
        self.parameters.push(Parameter { name: None, value });
        Ok(self)
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn clear_parameters(&mut self) {
        self.parameters.clear();
    }

    /// Compiles and starts executing the text, positioned before the first
    /// row of the first result-producing unit.
    pub fn execute_reader(&self) -> Result<DataReader<'c>> {
        if self.connection.state() != ConnectionState::Open {
            return Err(SqliteError::requires_open("execute_reader"));
        }
        if self.text.trim().is_empty() {
            return Err(SqliteError::InvalidOperation(
                "execute_reader can only be called when the command text has been set.".into(),
            ));
        }
        let text = CString::new(self.text.as_str())
            .map_err(|_| SqliteError::Argument("SQL text must not contain NUL characters.".into()))?;
        DataReader::execute(self.connection, text, self.parameters.clone(), self.timeout)
    }

    /// Runs every unit of the text and returns the number of rows changed,
    /// or -1 when no unit modified data.
    pub fn execute_non_query(&self) -> Result<i64> {
        let mut reader = self.execute_reader()?;
        reader.close()?;
        Ok(reader.records_affected())
    }

    /// First column of the first row, read as `T`. A query that yields no
    /// rows reads as NULL.
    pub fn execute_scalar<T: FromSql>(&self) -> Result<T> {
        let mut reader = self.execute_reader()?;
        let value = if reader.read()? {
            reader.get(0)?
        } else {
            T::from_sql(ValueRef::from_value(&Value::Null))?
        };
        reader.close()?;
        Ok(value)
    }
}

/// Binds every parameter `statement` references, or fails listing the ones
/// nothing in `parameters` satisfies.
pub(crate) fn bind_parameters(statement: &mut Statement<'_>, parameters: &[Parameter]) -> Result<()> {
    let count = statement.parameter_count()?;
    let positional: Vec<&Parameter> = parameters.iter().filter(|p| p.name.is_none()).collect();
    let mut next_positional = 0;
    let mut missing = Vec::new();

    for index in 1..=count {
        let sql_name = statement.parameter_name(index)?;
        let parameter = match sql_name.as_deref() {
            None => {
                next_positional += 1;
                positional.get(next_positional - 1).copied()
            }
            Some(name) => match name.strip_prefix('?') {
                Some(number) => number
                    .parse::<usize>()
                    .ok()
                    .and_then(|n| positional.get(n.checked_sub(1)?).copied()),
                None => parameters.iter().rev().find(|p| p.matches(name)),
            },
        };
        match parameter {
            Some(parameter) => statement.bind_value(index, &parameter.value)?,
            None => missing.push(sql_name.unwrap_or_else(|| format!("?{index}"))),
        }
    }

    if !missing.is_empty() {
        return Err(SqliteError::InvalidOperation(format!(
            "Must add values for the following parameters: {}",
            missing.join(", ")
        )));
    }
    Ok(())
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
    fn test_parameter_matching() {
        let bare = Parameter {
            name: Some("id".into()),
            value: Value::Null,
        };
        assert!(bare.matches("@id"));
        assert!(bare.matches("$id"));
        assert!(bare.matches("id"));
        let prefixed = Parameter {
            name: Some("@id".into()),
            value: Value::Null,
        };
        assert!(prefixed.matches("@id"));
        assert!(!prefixed.matches(":id"));
    }

    #[test]
    fn test_requires_open_connection() {
        let connection = Connection::new("Data Source=:memory:").unwrap();
        let err = connection.create_command("SELECT 1;").execute_reader().unwrap_err();
        assert_eq!(
            err.to_string(),
            "execute_reader can only be called when the connection is open."
        );
    }

    #[test]
    fn test_requires_text() {
        let connection = memory();
        let err = connection.create_command("  ").execute_non_query().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
    }

    #[test]
    fn test_named_and_positional_parameters() {
        let connection = memory();
        let mut command = connection.create_command("SELECT @a || ? || $b;");
        command.add_parameter("a", "x").unwrap();
        command.add_positional(&2i64).unwrap();
        command.add_parameter("$b", "z").unwrap();
        let value: String = command.execute_scalar().unwrap();
        assert_eq!(value, "x2z");
    }

    #[test]
    fn test_missing_parameters_listed() {
        let connection = memory();
        let mut command = connection.create_command("SELECT @a, @b;");
        command.add_parameter("a", &1i64).unwrap();
        let err = command.execute_scalar::<i64>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Must add values for the following parameters: @b"
        );
    }

    #[test]
    fn test_parameters_bind_every_unit() {
        let connection = memory();
        connection.execute_non_query("CREATE TABLE t (x INTEGER);").unwrap();
        let mut command =
            connection.create_command("INSERT INTO t VALUES (@x); INSERT INTO t VALUES (@x + 1);");
        command.add_parameter("x", &10i64).unwrap();
        assert_eq!(command.execute_non_query().unwrap(), 2);
        let total: i64 = connection.execute_scalar("SELECT sum(x) FROM t;").unwrap();
        assert_eq!(total, 21);
        command.clear_parameters();
        assert!(command.parameters().is_empty());
    }

    #[test]
    fn test_scalar_without_rows_reads_null() {
        let connection = memory();
        connection.execute_non_query("CREATE TABLE t (x INTEGER);").unwrap();
        let value: Option<i64> = connection.execute_scalar("SELECT x FROM t;").unwrap();
        assert_eq!(value, None);
        let err = connection.execute_scalar::<i64>("SELECT x FROM t;").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conversion);
    }

    #[test]
    fn test_non_query_without_changes() {
        let connection = memory();
        assert_eq!(connection.execute_non_query("SELECT 1;").unwrap(), -1);
    }
}

///
/// # Integration Tests for value marshaling
///
/// Round trips through bound parameters and result columns, Julian-day dates,
/// GUID storage and cast failures.
///

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use uuid::Uuid;

use sqlite_data::{Connection, ErrorKind, SqliteError, StorageClass, Value};

fn memory(connection_string: &str) -> Connection {
    let connection = Connection::new(connection_string).expect("Failed to create connection");
    connection.open().expect("Failed to open connection");
    connection
}

#[test]
fn test_integer_round_trip() {
    let connection = memory("Data Source=:memory:");
    let mut command = connection.create_command("SELECT @value;");
    command.add_parameter("value", &i64::MIN).unwrap();
    let value: i64 = command.execute_scalar().unwrap();
    assert_eq!(value, i64::MIN);
}

#[test]
fn test_blob_round_trip() {
    let connection = memory("Data Source=:memory:");
    let payload = vec![0x7fu8, 0x00, 0xff, 0x10];
    let mut command = connection.create_command("SELECT @payload, typeof(@payload);");
    command.add_parameter("payload", &payload).unwrap();
    let mut reader = command.execute_reader().unwrap();
    assert!(reader.read().unwrap());
    assert_eq!(reader.get::<Vec<u8>>(0).unwrap(), payload);
    assert_eq!(reader.get::<String>(1).unwrap(), "blob");
}

#[test]
fn test_empty_blob_is_not_null() {
    let connection = memory("Data Source=:memory:");
    let mut command = connection.create_command("SELECT @empty IS NULL, length(@empty);");
    command.add_parameter("empty", &Vec::<u8>::new()).unwrap();
    let mut reader = command.execute_reader().unwrap();
    assert!(reader.read().unwrap());
    assert!(!reader.get::<bool>(0).unwrap());
    assert_eq!(reader.get::<i64>(1).unwrap(), 0);
}

#[test]
fn test_null_cast_failure() {
    let connection = memory("Data Source=:memory:");
    let mut reader = connection.execute_reader("SELECT NULL;").unwrap();
    assert!(reader.read().unwrap());
    let err = reader.get::<i64>(0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conversion);
    assert!(matches!(
        err,
        SqliteError::InvalidCast {
            from: StorageClass::Null,
            ..
        }
    ));
    assert_eq!(reader.get::<Option<i64>>(0).unwrap(), None);
    assert_eq!(reader.get_value(0).unwrap(), Value::Null);
}

#[test]
fn test_unsigned_overflow_rejected() {
    let connection = memory("Data Source=:memory:");
    let mut command = connection.create_command("SELECT @big;");
    let err = command.add_parameter("big", &u64::MAX).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conversion);
    command.add_parameter("big", &(i64::MAX as u64)).unwrap();
    let value: u64 = command.execute_scalar().unwrap();
    assert_eq!(value, i64::MAX as u64);
}

#[test]
fn test_julian_day_to_datetime() {
    let connection = memory("Data Source=:memory:");
    let value: NaiveDateTime = connection
        .execute_scalar("SELECT julianday('2013-10-07 08:23:19.120');")
        .unwrap();
    assert_eq!((value.year(), value.month(), value.day()), (2013, 10, 7));
    assert_eq!((value.hour(), value.minute(), value.second()), (8, 23, 19));
    assert_eq!(value.nanosecond() / 1_000_000, 120);
}

#[test]
fn test_datetime_binds_as_text() {
    let connection = memory("Data Source=:memory:");
    let moment = NaiveDate::from_ymd_opt(2014, 4, 15)
        .unwrap()
        .and_hms_opt(10, 47, 16)
        .unwrap();
    let mut command = connection.create_command("SELECT @moment, julianday(@moment);");
    command.add_parameter("moment", &moment).unwrap();
    let mut reader = command.execute_reader().unwrap();
    assert!(reader.read().unwrap());
    assert_eq!(reader.get::<String>(0).unwrap(), "2014-04-15 10:47:16");
    assert_eq!(reader.get::<NaiveDateTime>(1).unwrap(), moment);
    assert_eq!(reader.get::<NaiveDateTime>(0).unwrap(), moment);
}

#[test]
fn test_time_and_date_text() {
    let connection = memory("Data Source=:memory:");
    let time: NaiveTime = connection.execute_scalar("SELECT '12:06:29';").unwrap();
    assert_eq!(time, NaiveTime::from_hms_opt(12, 6, 29).unwrap());
    let date: NaiveDate = connection.execute_scalar("SELECT '2014-04-15';").unwrap();
    assert_eq!(date, NaiveDate::from_ymd_opt(2014, 4, 15).unwrap());
}

#[test]
fn test_guid_stored_as_blob() {
    let connection = memory("Data Source=:memory:");
    let id = Uuid::parse_str("1c902ddb-f4b6-4945-af38-0dc1b0760465").unwrap();
    let mut command = connection.create_command("SELECT typeof(@id), length(@id), @id;");
    command.add_parameter("id", &id).unwrap();
    let mut reader = command.execute_reader().unwrap();
    assert!(reader.read().unwrap());
    assert_eq!(reader.get::<String>(0).unwrap(), "blob");
    assert_eq!(reader.get::<i64>(1).unwrap(), 16);
    assert_eq!(reader.get::<Uuid>(2).unwrap(), id);
}

#[test]
fn test_guid_stored_as_text() {
    let connection = memory("Data Source=:memory:;BinaryGUID=False");
    let id = Uuid::parse_str("1c902ddb-f4b6-4945-af38-0dc1b0760465").unwrap();
    let mut command = connection.create_command("SELECT typeof(@id), @id;");
    command.add_parameter("id", &id).unwrap();
    let mut reader = command.execute_reader().unwrap();
    assert!(reader.read().unwrap());
    assert_eq!(reader.get::<String>(0).unwrap(), "text");
    assert_eq!(reader.get::<Uuid>(1).unwrap(), id);
}

#[test]
fn test_storage_classes_reported() {
    let connection = memory("Data Source=:memory:");
    let mut reader = connection
        .execute_reader("SELECT 1, 1.5, 'a', X'01', NULL;")
        .unwrap();
    assert!(reader.read().unwrap());
    let classes: Vec<StorageClass> = (0..5)
        .map(|ordinal| reader.get_storage_class(ordinal).unwrap())
        .collect();
    assert_eq!(
        classes,
        vec![
            StorageClass::Integer,
            StorageClass::Real,
            StorageClass::Text,
            StorageClass::Blob,
            StorageClass::Null,
        ]
    );
}

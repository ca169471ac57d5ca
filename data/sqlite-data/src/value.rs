///
/// Value marshaling between Rust types and the engine's storage classes.
///
/// Outbound, `ToSql` turns a Rust value into an owned `Value` (one of the five
/// storage classes) which the statement engine binds. Inbound, `FromSql`
/// reads a typed value out of a `ValueRef`, which views either a column of
/// the current row, a user-routine argument, or an owned `Value`.
///
/// Conversion rules:
/// - Typed reads of NULL fail with a cast error; read through `Option<T>`.
/// - Timestamps are bound as ISO-8601 text and read from text, from a real
///   (fractional Julian day), or from an integer (whole Julian day).
/// - GUIDs are bound as 16-byte little-endian blobs (or text, when binary
///   GUIDs are disabled) and read from either form.
/// - Empty blobs stay zero-length blobs; they are never bound as NULL.
///

use std::fmt;
use std::os::raw::{c_int, c_uchar};
use std::slice;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rusqlite::ffi;
use uuid::Uuid;

use crate::datetime;
use crate::error::{Result, SqliteError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageClass {
    Integer,
    Real,
    Text,
    Blob,
    Null,
}

impl StorageClass {
    pub(crate) fn from_raw(code: c_int) -> Self {
        match code {
            ffi::SQLITE_INTEGER => StorageClass::Integer,
            ffi::SQLITE_FLOAT => StorageClass::Real,
            ffi::SQLITE_TEXT => StorageClass::Text,
            ffi::SQLITE_BLOB => StorageClass::Blob,
            _ => StorageClass::Null,
        }
    }

    /// The engine's name for the class. NULL reports `INTEGER`, matching the
    /// type affinity an untyped NULL column is given.
    pub fn type_name(&self) -> &'static str {
        match self {
            StorageClass::Integer | StorageClass::Null => "INTEGER",
            StorageClass::Real => "REAL",
            StorageClass::Text => "TEXT",
            StorageClass::Blob => "BLOB",
        }
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageClass::Integer => "INTEGER",
            StorageClass::Real => "REAL",
            StorageClass::Text => "TEXT",
            StorageClass::Blob => "BLOB",
            StorageClass::Null => "NULL",
        };
        f.write_str(name)
    }
}

/// An owned value in one of the engine's storage classes.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn storage_class(&self) -> StorageClass {
        match self {
            Value::Null => StorageClass::Null,
            Value::Integer(_) => StorageClass::Integer,
            Value::Real(_) => StorageClass::Real,
            Value::Text(_) => StorageClass::Text,
            Value::Blob(_) => StorageClass::Blob,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

/// Per-connection settings that influence outbound conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindContext {
    pub binary_guid: bool,
}

impl Default for BindContext {
    fn default() -> Self {
        Self { binary_guid: true }
    }
}

pub trait ToSql {
    fn to_sql(&self, context: &BindContext) -> Result<Value>;
}

pub trait FromSql: Sized {
    fn from_sql(value: ValueRef<'_>) -> Result<Self>;
}

/// Positional access to native values: the columns of the current row, or
/// the arguments of a user-routine invocation.
pub(crate) trait RawValues {
    fn count(&self) -> usize;
    fn class(&self, ordinal: usize) -> StorageClass;
    fn int64(&self, ordinal: usize) -> i64;
    fn double(&self, ordinal: usize) -> f64;
    fn text(&self, ordinal: usize) -> String;
    fn blob(&self, ordinal: usize) -> Vec<u8>;
}

/// The columns of the row a statement is positioned on.
pub(crate) struct ColumnValues {
    pub(crate) stmt: *mut ffi::sqlite3_stmt,
}

impl RawValues for ColumnValues {
    fn count(&self) -> usize {
        unsafe { ffi::sqlite3_column_count(self.stmt) }.max(0) as usize
    }

    fn class(&self, ordinal: usize) -> StorageClass {
        StorageClass::from_raw(unsafe { ffi::sqlite3_column_type(self.stmt, ordinal as c_int) })
    }

    fn int64(&self, ordinal: usize) -> i64 {
        unsafe { ffi::sqlite3_column_int64(self.stmt, ordinal as c_int) }
    }

    fn double(&self, ordinal: usize) -> f64 {
        unsafe { ffi::sqlite3_column_double(self.stmt, ordinal as c_int) }
    }

    fn text(&self, ordinal: usize) -> String {
        unsafe {
            let ptr = ffi::sqlite3_column_text(self.stmt, ordinal as c_int);
            let len = ffi::sqlite3_column_bytes(self.stmt, ordinal as c_int);
            text_from_raw(ptr, len)
        }
    }

    fn blob(&self, ordinal: usize) -> Vec<u8> {
        unsafe {
            let ptr = ffi::sqlite3_column_blob(self.stmt, ordinal as c_int);
            let len = ffi::sqlite3_column_bytes(self.stmt, ordinal as c_int);
            bytes_from_raw(ptr.cast(), len)
        }
    }
}

/// The argument vector handed to a user-defined routine.
pub(crate) struct ArgumentValues<'a> {
    pub(crate) values: &'a [*mut ffi::sqlite3_value],
}

impl RawValues for ArgumentValues<'_> {
    fn count(&self) -> usize {
        self.values.len()
    }

    fn class(&self, ordinal: usize) -> StorageClass {
        StorageClass::from_raw(unsafe { ffi::sqlite3_value_type(self.values[ordinal]) })
    }

    fn int64(&self, ordinal: usize) -> i64 {
        unsafe { ffi::sqlite3_value_int64(self.values[ordinal]) }
    }

    fn double(&self, ordinal: usize) -> f64 {
        unsafe { ffi::sqlite3_value_double(self.values[ordinal]) }
    }

    fn text(&self, ordinal: usize) -> String {
        unsafe {
            let ptr = ffi::sqlite3_value_text(self.values[ordinal]);
            let len = ffi::sqlite3_value_bytes(self.values[ordinal]);
            text_from_raw(ptr, len)
        }
    }

    fn blob(&self, ordinal: usize) -> Vec<u8> {
        unsafe {
            let ptr = ffi::sqlite3_value_blob(self.values[ordinal]);
            let len = ffi::sqlite3_value_bytes(self.values[ordinal]);
            bytes_from_raw(ptr.cast(), len)
        }
    }
}

unsafe fn text_from_raw(ptr: *const c_uchar, len: c_int) -> String {
    if ptr.is_null() || len <= 0 {
        return String::new();
    }
    let bytes = unsafe { slice::from_raw_parts(ptr, len as usize) };
    String::from_utf8_lossy(bytes).into_owned()
}

unsafe fn bytes_from_raw(ptr: *const u8, len: c_int) -> Vec<u8> {
    if ptr.is_null() || len <= 0 {
        return Vec::new();
    }
    unsafe { slice::from_raw_parts(ptr, len as usize) }.to_vec()
}

/// A borrowed view of a single value awaiting conversion.
#[derive(Clone, Copy)]
pub struct ValueRef<'a> {
    source: Source<'a>,
}

#[derive(Clone, Copy)]
enum Source<'a> {
    Native(&'a dyn RawValues, usize),
    Owned(&'a Value),
}

impl<'a> ValueRef<'a> {
    pub(crate) fn native(values: &'a dyn RawValues, ordinal: usize) -> Self {
        Self {
            source: Source::Native(values, ordinal),
        }
    }

    pub fn from_value(value: &'a Value) -> Self {
        Self {
            source: Source::Owned(value),
        }
    }

    pub fn storage_class(&self) -> StorageClass {
        match self.source {
            Source::Native(values, ordinal) => values.class(ordinal),
            Source::Owned(value) => value.storage_class(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.storage_class() == StorageClass::Null
    }

    /// Integer view with the engine's coercion rules (NULL reads as 0).
    pub fn as_i64(&self) -> i64 {
        match self.source {
            Source::Native(values, ordinal) => values.int64(ordinal),
            Source::Owned(value) => match value {
                Value::Null => 0,
                Value::Integer(i) => *i,
                Value::Real(r) => *r as i64,
                Value::Text(t) => numeric_prefix(t) as i64,
                Value::Blob(b) => numeric_prefix(&String::from_utf8_lossy(b)) as i64,
            },
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self.source {
            Source::Native(values, ordinal) => values.double(ordinal),
            Source::Owned(value) => match value {
                Value::Null => 0.0,
                Value::Integer(i) => *i as f64,
                Value::Real(r) => *r,
                Value::Text(t) => numeric_prefix(t),
                Value::Blob(b) => numeric_prefix(&String::from_utf8_lossy(b)),
            },
        }
    }

    pub fn as_text(&self) -> String {
        match self.source {
            Source::Native(values, ordinal) => values.text(ordinal),
            Source::Owned(value) => match value {
                Value::Null => String::new(),
                Value::Integer(i) => i.to_string(),
                Value::Real(r) => format_real(*r),
                Value::Text(t) => t.clone(),
                Value::Blob(b) => String::from_utf8_lossy(b).into_owned(),
            },
        }
    }

    pub fn as_blob(&self) -> Vec<u8> {
        match self.source {
            Source::Native(values, ordinal) => values.blob(ordinal),
            Source::Owned(Value::Blob(b)) => b.clone(),
            Source::Owned(Value::Null) => Vec::new(),
            Source::Owned(_) => self.as_text().into_bytes(),
        }
    }

    /// Copies the value out in its own storage class.
    pub fn to_value(&self) -> Value {
        match self.storage_class() {
            StorageClass::Null => Value::Null,
            StorageClass::Integer => Value::Integer(self.as_i64()),
            StorageClass::Real => Value::Real(self.as_f64()),
            StorageClass::Text => Value::Text(self.as_text()),
            StorageClass::Blob => Value::Blob(self.as_blob()),
        }
    }

    fn require(&self, target: &'static str) -> Result<StorageClass> {
        match self.storage_class() {
            StorageClass::Null => Err(SqliteError::cast(StorageClass::Null, target)),
            class => Ok(class),
        }
    }
}

impl fmt::Debug for ValueRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ValueRef").field(&self.to_value()).finish()
    }
}

fn numeric_prefix(text: &str) -> f64 {
    let text = text.trim();
    let end = text
        .char_indices()
        .take_while(|&(i, c)| {
            c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E') || (i == 0 && matches!(c, '+' | '-'))
        })
        .map(|(i, c)| i + c.len_utf8())
        .last()
        .unwrap_or(0);
    let mut candidate = &text[..end];
    while !candidate.is_empty() {
        if let Ok(value) = candidate.parse::<f64>() {
            return value;
        }
        candidate = &candidate[..candidate.len() - 1];
    }
    0.0
}

fn format_real(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

impl ToSql for Value {
    fn to_sql(&self, _: &BindContext) -> Result<Value> {
        Ok(self.clone())
    }
}

impl<T: ToSql + ?Sized> ToSql for &T {
    fn to_sql(&self, context: &BindContext) -> Result<Value> {
        (**self).to_sql(context)
    }
}

impl<T: ToSql> ToSql for Option<T> {
    fn to_sql(&self, context: &BindContext) -> Result<Value> {
        match self {
            Some(value) => value.to_sql(context),
            None => Ok(Value::Null),
        }
    }
}

macro_rules! integer_to_sql {
    ($($ty:ty),*) => {
        $(
            impl ToSql for $ty {
                fn to_sql(&self, _: &BindContext) -> Result<Value> {
                    Ok(Value::Integer(i64::from(*self)))
                }
            }
        )*
    };
}

integer_to_sql!(i8, i16, i32, i64, u8, u16, u32);

macro_rules! checked_integer_to_sql {
    ($($ty:ty),*) => {
        $(
            impl ToSql for $ty {
                fn to_sql(&self, _: &BindContext) -> Result<Value> {
                    i64::try_from(*self)
                        .map(Value::Integer)
                        .map_err(|_| SqliteError::Overflow {
                            value: self.to_string(),
                            target: "a 64-bit signed integer",
                        })
                }
            }
        )*
    };
}

checked_integer_to_sql!(u64, usize, isize, i128, u128);

impl ToSql for bool {
    fn to_sql(&self, _: &BindContext) -> Result<Value> {
        Ok(Value::Integer(i64::from(*self)))
    }
}

impl ToSql for f64 {
    fn to_sql(&self, _: &BindContext) -> Result<Value> {
        Ok(Value::Real(*self))
    }
}

impl ToSql for f32 {
    fn to_sql(&self, _: &BindContext) -> Result<Value> {
        Ok(Value::Real(f64::from(*self)))
    }
}

impl ToSql for char {
    fn to_sql(&self, _: &BindContext) -> Result<Value> {
        Ok(Value::Text(self.to_string()))
    }
}

impl ToSql for str {
    fn to_sql(&self, _: &BindContext) -> Result<Value> {
        Ok(Value::Text(self.to_string()))
    }
}

impl ToSql for String {
    fn to_sql(&self, _: &BindContext) -> Result<Value> {
        Ok(Value::Text(self.clone()))
    }
}

impl ToSql for [u8] {
    fn to_sql(&self, _: &BindContext) -> Result<Value> {
        Ok(Value::Blob(self.to_vec()))
    }
}

impl ToSql for Vec<u8> {
    fn to_sql(&self, _: &BindContext) -> Result<Value> {
        Ok(Value::Blob(self.clone()))
    }
}

impl<const N: usize> ToSql for [u8; N] {
    fn to_sql(&self, _: &BindContext) -> Result<Value> {
        Ok(Value::Blob(self.to_vec()))
    }
}

impl ToSql for NaiveDateTime {
    fn to_sql(&self, _: &BindContext) -> Result<Value> {
        Ok(Value::Text(datetime::format_naive(self)))
    }
}

impl ToSql for NaiveDate {
    fn to_sql(&self, _: &BindContext) -> Result<Value> {
        Ok(Value::Text(datetime::format_date(self)))
    }
}

impl ToSql for NaiveTime {
    fn to_sql(&self, _: &BindContext) -> Result<Value> {
        Ok(Value::Text(datetime::format_time(self)))
    }
}

impl ToSql for DateTime<FixedOffset> {
    fn to_sql(&self, _: &BindContext) -> Result<Value> {
        Ok(Value::Text(datetime::format_with_offset(self)))
    }
}

impl ToSql for DateTime<Utc> {
    fn to_sql(&self, _: &BindContext) -> Result<Value> {
        Ok(Value::Text(datetime::format_with_offset(&self.fixed_offset())))
    }
}

impl ToSql for Uuid {
    fn to_sql(&self, context: &BindContext) -> Result<Value> {
        if context.binary_guid {
            Ok(Value::Blob(self.to_bytes_le().to_vec()))
        } else {
            Ok(Value::Text(self.hyphenated().to_string()))
        }
    }
}

impl FromSql for Value {
    fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        Ok(value.to_value())
    }
}

impl<T: FromSql> FromSql for Option<T> {
    fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        if value.is_null() {
            Ok(None)
        } else {
            T::from_sql(value).map(Some)
        }
    }
}

impl FromSql for i64 {
    fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        value.require("i64")?;
        Ok(value.as_i64())
    }
}

macro_rules! narrowing_from_sql {
    ($($ty:ty),*) => {
        $(
            impl FromSql for $ty {
                fn from_sql(value: ValueRef<'_>) -> Result<Self> {
                    value.require(stringify!($ty))?;
                    let wide = value.as_i64();
                    <$ty>::try_from(wide).map_err(|_| SqliteError::Overflow {
                        value: wide.to_string(),
                        target: stringify!($ty),
                    })
                }
            }
        )*
    };
}

narrowing_from_sql!(i8, i16, i32, isize, u8, u16, u32, u64, usize);

impl FromSql for bool {
    fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        value.require("bool")?;
        Ok(value.as_i64() != 0)
    }
}

impl FromSql for f64 {
    fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        value.require("f64")?;
        Ok(value.as_f64())
    }
}

impl FromSql for f32 {
    fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        value.require("f32")?;
        Ok(value.as_f64() as f32)
    }
}

impl FromSql for String {
    fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        value.require("String")?;
        Ok(value.as_text())
    }
}

impl FromSql for Vec<u8> {
    fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        value.require("Vec<u8>")?;
        Ok(value.as_blob())
    }
}

impl FromSql for char {
    fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        match value.require("char")? {
            StorageClass::Integer => u32::try_from(value.as_i64())
                .ok()
                .and_then(char::from_u32)
                .ok_or(SqliteError::cast(StorageClass::Integer, "char")),
            class => {
                let text = value.as_text();
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(c),
                    _ => Err(SqliteError::cast(class, "char")),
                }
            }
        }
    }
}

impl FromSql for NaiveDateTime {
    fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        let class = value.require("NaiveDateTime")?;
        let parsed = match class {
            StorageClass::Real => datetime::from_julian_day(value.as_f64()),
            StorageClass::Integer => datetime::from_julian_day(value.as_i64() as f64),
            _ => datetime::parse_naive(&value.as_text()),
        };
        parsed.ok_or(SqliteError::cast(class, "NaiveDateTime"))
    }
}

impl FromSql for DateTime<FixedOffset> {
    fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        let class = value.require("DateTime")?;
        if matches!(class, StorageClass::Text | StorageClass::Blob) {
            if let Some(parsed) = datetime::parse_with_offset(&value.as_text()) {
                return Ok(parsed);
            }
        }
        NaiveDateTime::from_sql(value).map(|naive| naive.and_utc().fixed_offset())
    }
}

impl FromSql for DateTime<Utc> {
    fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        DateTime::<FixedOffset>::from_sql(value).map(|parsed| parsed.with_timezone(&Utc))
    }
}

impl FromSql for NaiveDate {
    fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        NaiveDateTime::from_sql(value).map(|parsed| parsed.date())
    }
}

impl FromSql for NaiveTime {
    fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        let class = value.require("NaiveTime")?;
        match class {
            StorageClass::Text | StorageClass::Blob => datetime::parse_time(&value.as_text())
                .ok_or(SqliteError::cast(class, "NaiveTime")),
            _ => NaiveDateTime::from_sql(value).map(|parsed| parsed.time()),
        }
    }
}

impl FromSql for Uuid {
    fn from_sql(value: ValueRef<'_>) -> Result<Self> {
        let class = value.require("Uuid")?;
        let parsed = match class {
            StorageClass::Blob => {
                let bytes = value.as_blob();
                match <[u8; 16]>::try_from(bytes.as_slice()) {
                    Ok(raw) => Some(Uuid::from_bytes_le(raw)),
                    Err(_) => std::str::from_utf8(&bytes)
                        .ok()
                        .and_then(|text| Uuid::parse_str(text.trim()).ok()),
                }
            }
            StorageClass::Text => Uuid::parse_str(value.as_text().trim()).ok(),
            _ => None,
        };
        parsed.ok_or(SqliteError::cast(class, "Uuid"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn read<T: FromSql>(value: Value) -> Result<T> {
        T::from_sql(ValueRef::from_value(&value))
    }

    #[test]
    fn test_storage_class_names() {
        assert_eq!(StorageClass::Integer.type_name(), "INTEGER");
        assert_eq!(StorageClass::Real.type_name(), "REAL");
        assert_eq!(StorageClass::Text.type_name(), "TEXT");
        assert_eq!(StorageClass::Blob.type_name(), "BLOB");
        assert_eq!(StorageClass::Null.type_name(), "INTEGER");
    }

    #[test]
    fn test_to_sql_integers() {
        let ctx = BindContext::default();
        assert_eq!(42u8.to_sql(&ctx).unwrap(), Value::Integer(42));
        assert_eq!(true.to_sql(&ctx).unwrap(), Value::Integer(1));
        assert_eq!((i64::MAX as u64).to_sql(&ctx).unwrap(), Value::Integer(i64::MAX));
        let err = u64::MAX.to_sql(&ctx).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conversion);
    }

    #[test]
    fn test_empty_blob_is_not_null() {
        let value = Vec::<u8>::new().to_sql(&BindContext::default()).unwrap();
        assert_eq!(value, Value::Blob(Vec::new()));
        assert!(!value.is_null());
    }

    #[test]
    fn test_option_binds_null() {
        let none: Option<i32> = None;
        assert_eq!(none.to_sql(&BindContext::default()).unwrap(), Value::Null);
    }

    #[test]
    fn test_uuid_binding_respects_context() {
        let id = Uuid::parse_str("dc0d7e0e-365d-4948-ab9b-8ca8056bf93a").unwrap();
        let binary = id.to_sql(&BindContext { binary_guid: true }).unwrap();
        assert_eq!(
            binary,
            Value::Blob(vec![
                0x0E, 0x7E, 0x0D, 0xDC, 0x5D, 0x36, 0x48, 0x49, 0xAB, 0x9B, 0x8C, 0xA8, 0x05,
                0x6B, 0xF9, 0x3A
            ])
        );
        let text = id.to_sql(&BindContext { binary_guid: false }).unwrap();
        assert_eq!(text, Value::Text("dc0d7e0e-365d-4948-ab9b-8ca8056bf93a".into()));
        assert_eq!(read::<Uuid>(binary).unwrap(), id);
        assert_eq!(read::<Uuid>(text).unwrap(), id);
    }

    #[test]
    fn test_uuid_from_text_blob() {
        let blob = Value::Blob(b"dc0d7e0e-365d-4948-ab9b-8ca8056bf93a".to_vec());
        assert_eq!(
            read::<Uuid>(blob).unwrap().to_string(),
            "dc0d7e0e-365d-4948-ab9b-8ca8056bf93a"
        );
    }

    #[test]
    fn test_null_requires_option() {
        let err = read::<i64>(Value::Null).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conversion);
        assert!(err.to_string().starts_with("Specified cast is not valid"));
        assert_eq!(read::<Option<i64>>(Value::Null).unwrap(), None);
        assert_eq!(read::<Option<i64>>(Value::Integer(7)).unwrap(), Some(7));
    }

    #[test]
    fn test_narrowing_overflow() {
        assert_eq!(read::<i32>(Value::Integer(12)).unwrap(), 12);
        let err = read::<i8>(Value::Integer(1000)).unwrap_err();
        assert!(matches!(err, SqliteError::Overflow { target: "i8", .. }));
    }

    #[test]
    fn test_text_coercions() {
        assert_eq!(read::<i64>(Value::Text("12abc".into())).unwrap(), 12);
        assert_eq!(read::<f64>(Value::Text("2.5".into())).unwrap(), 2.5);
        assert_eq!(read::<String>(Value::Integer(3)).unwrap(), "3");
        assert_eq!(read::<String>(Value::Real(3.0)).unwrap(), "3.0");
    }

    #[test]
    fn test_datetime_reads() {
        let expected = NaiveDate::from_ymd_opt(2013, 10, 7)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert_eq!(read::<NaiveDateTime>(Value::Integer(2_456_573)).unwrap(), expected);
        assert_eq!(read::<NaiveDateTime>(Value::Real(2_456_573.0)).unwrap(), expected);
        assert_eq!(
            read::<NaiveDateTime>(Value::Text("2013-10-07 12:00:00".into())).unwrap(),
            expected
        );
        assert!(read::<NaiveDateTime>(Value::Text("soon".into())).is_err());
    }

    #[test]
    fn test_time_and_offset_reads() {
        assert_eq!(
            read::<NaiveTime>(Value::Text("12:06:29".into())).unwrap(),
            NaiveTime::from_hms_opt(12, 6, 29).unwrap()
        );
        let stamped = read::<DateTime<FixedOffset>>(Value::Text("2014-04-15 10:47:16+02:00".into()))
            .unwrap();
        assert_eq!(stamped.offset().local_minus_utc(), 7200);
        let utc = read::<DateTime<Utc>>(Value::Text("2014-04-15 10:47:16+02:00".into())).unwrap();
        assert_eq!(utc.to_rfc3339(), "2014-04-15T08:47:16+00:00");
    }

    #[test]
    fn test_char_reads() {
        assert_eq!(read::<char>(Value::Text("A".into())).unwrap(), 'A');
        assert_eq!(read::<char>(Value::Integer(0x41)).unwrap(), 'A');
        assert!(read::<char>(Value::Text("AB".into())).is_err());
    }
}

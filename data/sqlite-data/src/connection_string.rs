///
/// Connection string parsing and rendering.
///
/// Format: `key=value` pairs separated by `;`. Keywords are case-insensitive
/// and surrounding whitespace or quotes around values are dropped.
///
/// Keywords:
/// - `Data Source` (aliases `DataSource`, `Filename`): database path or URI
/// - `Mode`: `ReadWriteCreate` (default), `ReadWrite`, `ReadOnly`, `Memory`
/// - `Cache`: `Private` (default), `Shared`, `Default`
/// - `BinaryGUID` (alias `Binary GUID`): store GUIDs as blobs (default true)
///

use std::fmt;
use std::str::FromStr;

use crate::error::{Result, SqliteError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OpenMode {
    #[default]
    ReadWriteCreate,
    ReadWrite,
    ReadOnly,
    Memory,
}

impl OpenMode {
    fn keyword(&self) -> &'static str {
        match self {
            OpenMode::ReadWriteCreate => "ReadWriteCreate",
            OpenMode::ReadWrite => "ReadWrite",
            OpenMode::ReadOnly => "ReadOnly",
            OpenMode::Memory => "Memory",
        }
    }
}

impl FromStr for OpenMode {
    type Err = SqliteError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "readwritecreate" => Ok(OpenMode::ReadWriteCreate),
            "readwrite" => Ok(OpenMode::ReadWrite),
            "readonly" => Ok(OpenMode::ReadOnly),
            "memory" => Ok(OpenMode::Memory),
            _ => Err(SqliteError::Argument(format!("The value '{s}' is not a valid mode."))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
    /// Leave the choice to the engine's compile-time default.
    Default,
    #[default]
    Private,
    Shared,
}

impl CacheMode {
    fn keyword(&self) -> &'static str {
        match self {
            CacheMode::Default => "Default",
            CacheMode::Private => "Private",
            CacheMode::Shared => "Shared",
        }
    }
}

impl FromStr for CacheMode {
    type Err = SqliteError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(CacheMode::Default),
            "private" => Ok(CacheMode::Private),
            "shared" => Ok(CacheMode::Shared),
            _ => Err(SqliteError::Argument(format!("The value '{s}' is not a valid cache mode."))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStringBuilder {
    pub data_source: String,
    pub mode: OpenMode,
    pub cache: CacheMode,
    pub binary_guid: bool,
}

impl Default for ConnectionStringBuilder {
    fn default() -> Self {
        Self {
            data_source: String::new(),
            mode: OpenMode::default(),
            cache: CacheMode::default(),
            binary_guid: true,
        }
    }
}

impl ConnectionStringBuilder {
    pub fn new(data_source: impl Into<String>) -> Self {
        Self {
            data_source: data_source.into(),
            ..Self::default()
        }
    }

    pub fn mode(mut self, mode: OpenMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn cache(mut self, cache: CacheMode) -> Self {
        self.cache = cache;
        self
    }

    pub fn binary_guid(mut self, binary_guid: bool) -> Self {
        self.binary_guid = binary_guid;
        self
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut builder = Self::default();
        for pair in text.split(';') {
            if pair.trim().is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                SqliteError::Argument(format!(
                    "Format of the connection string is invalid near '{}'.",
                    pair.trim()
                ))
            })?;
            builder.set(key, unquote(value.trim()))?;
        }
        Ok(builder)
    }

    /// Assigns one keyword. Aliases of the same keyword overwrite each other.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let normalized: String = key
            .trim()
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "datasource" | "filename" => self.data_source = value.to_string(),
            "mode" => self.mode = value.parse()?,
            "cache" => self.cache = value.parse()?,
            "binaryguid" => self.binary_guid = parse_bool(value)?,
            _ => return Err(SqliteError::KeywordNotSupported(key.trim().to_string())),
        }
        Ok(())
    }
}

impl FromStr for ConnectionStringBuilder {
    type Err = SqliteError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionStringBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if !self.data_source.is_empty() {
            parts.push(format!("Data Source={}", self.data_source));
        }
        if self.mode != OpenMode::default() {
            parts.push(format!("Mode={}", self.mode.keyword()));
        }
        if self.cache != CacheMode::default() {
            parts.push(format!("Cache={}", self.cache.keyword()));
        }
        if !self.binary_guid {
            parts.push("BinaryGUID=False".to_string());
        }
        f.write_str(&parts.join(";"))
    }
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(SqliteError::Argument(format!("The value '{value}' is not a valid boolean."))),
    }
}

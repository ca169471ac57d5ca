///
/// Process-wide engine bootstrap.
///
/// The native library is initialized exactly once, the first time any
/// connection or error path needs it. Version-dependent behaviour (how error
/// text is produced when no database handle exists, which close entry point
/// to use) is resolved once from the reported library version and cached.
///

use std::ffi::CStr;
use std::fmt;
use std::sync::{Once, OnceLock};

use rusqlite::ffi;

static INIT: Once = Once::new();
static CAPABILITIES: OnceLock<EngineCapabilities> = OnceLock::new();

/// Initializes the native library. Safe to call any number of times.
pub fn initialize() {
    INIT.call_once(|| {
        let rc = unsafe { ffi::sqlite3_initialize() };
        if rc == ffi::SQLITE_OK {
            tracing::debug!(version = %library_version(), "sqlite engine initialized");
        } else {
            tracing::error!(code = rc, "sqlite engine failed to initialize");
        }
    });
}

/// The version string reported by the linked library, e.g. `3.45.1`.
pub fn library_version() -> String {
    let ptr = unsafe { ffi::sqlite3_libversion() };
    if ptr.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

/// Capabilities of the linked library, resolved on first use.
pub fn capabilities() -> &'static EngineCapabilities {
    CAPABILITIES.get_or_init(|| {
        initialize();
        let raw = library_version();
        let version = EngineVersion::parse(&raw).unwrap_or_else(|| {
            tracing::warn!(version = %raw, "unrecognized engine version, assuming oldest behaviour");
            EngineVersion::default()
        });
        EngineCapabilities::for_version(version)
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct EngineVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl EngineVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    /// Parses `major.minor.patch`; a missing patch component reads as zero.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.trim().split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = match parts.next() {
            Some(p) => p.parse().ok()?,
            None => 0,
        };
        Some(Self { major, minor, patch })
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// How an error message is produced when no database handle is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorText {
    /// Only the generic pointer to the result-code documentation.
    Generic,
    /// The engine's static description of the status code, then the pointer.
    StatusDescription,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineCapabilities {
    pub version: EngineVersion,
    pub error_text: ErrorText,
    /// Whether `sqlite3_close_v2` (deferred close) is available.
    pub deferred_close: bool,
}

impl EngineCapabilities {
    const STATUS_DESCRIPTION_SINCE: EngineVersion = EngineVersion::new(3, 7, 15);
    const DEFERRED_CLOSE_SINCE: EngineVersion = EngineVersion::new(3, 7, 14);

    pub fn for_version(version: EngineVersion) -> Self {
        let error_text = if version >= Self::STATUS_DESCRIPTION_SINCE {
            ErrorText::StatusDescription
        } else {
            ErrorText::Generic
        };
        Self {
            version,
            error_text,
            deferred_close: version >= Self::DEFERRED_CLOSE_SINCE,
        }
    }
}

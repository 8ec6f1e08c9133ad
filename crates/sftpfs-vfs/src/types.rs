//! Core VFS types.
//!
//! These mirror what a user-mode filesystem driver exchanges with its
//! backend on every call: attribute records, create dispositions and the
//! per-call context identifying the issuing worker.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

bitflags! {
    /// Driver-level attribute flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct FileAttributes: u32 {
        const READONLY = 0x0001;
        const HIDDEN = 0x0002;
        const DIRECTORY = 0x0010;
        const NORMAL = 0x0080;
        const OFFLINE = 0x1000;
    }
}

impl Default for FileAttributes {
    fn default() -> Self {
        FileAttributes::NORMAL
    }
}

/// Metadata record returned by get-metadata and directory listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInformation {
    /// Final path segment, empty for the root.
    pub file_name: String,
    /// Attribute flags.
    pub attributes: FileAttributes,
    /// Creation time.
    pub creation_time: SystemTime,
    /// Last access time.
    pub last_access_time: SystemTime,
    /// Last modification time.
    pub last_write_time: SystemTime,
    /// Size in bytes.
    pub length: u64,
    /// POSIX permission bits (e.g., 0o644) when the backend knows them.
    pub permissions: Option<u32>,
}

impl FileInformation {
    /// Attributes for a regular file.
    pub fn file(name: impl Into<String>, length: u64) -> Self {
        let now = SystemTime::now();
        Self {
            file_name: name.into(),
            attributes: FileAttributes::NORMAL,
            creation_time: now,
            last_access_time: now,
            last_write_time: now,
            length,
            permissions: Some(0o644),
        }
    }

    /// Attributes for a directory.
    pub fn directory(name: impl Into<String>) -> Self {
        let now = SystemTime::now();
        Self {
            file_name: name.into(),
            attributes: FileAttributes::DIRECTORY,
            creation_time: now,
            last_access_time: now,
            last_write_time: now,
            length: 0,
            permissions: Some(0o755),
        }
    }

    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }
}

/// How an open/create call treats an existing or missing object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreateDisposition {
    /// Fail with not-found if absent.
    Open,
    /// Fail with already-exists if present, else create zero-length.
    CreateNew,
    /// Create zero-length, replacing whatever is there.
    Create,
    /// Create if absent, else open.
    OpenOrCreate,
    /// Fail with not-found if absent, else recreate as zero-length.
    Truncate,
    /// Open if present, else create zero-length.
    Append,
}

impl CreateDisposition {
    /// True for dispositions whose outcome only depends on the current
    /// remote state, which is what the cache may memoize.
    pub fn is_open(&self) -> bool {
        matches!(self, CreateDisposition::Open | CreateDisposition::OpenOrCreate)
    }
}

/// Identifies the logical worker issuing a call.
///
/// Backends that hold per-caller state (remote channels) key it by this
/// token, never by OS thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Per-call context handed to every contract operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileContext {
    /// Worker issuing the call.
    pub worker: WorkerId,
    /// Whether the caller targets a directory.
    pub is_directory: bool,
}

impl FileContext {
    /// Context for a call against a file (or an unknown kind).
    pub fn new(worker: WorkerId) -> Self {
        Self {
            worker,
            is_directory: false,
        }
    }

    /// Context for a call against a directory.
    pub fn directory(worker: WorkerId) -> Self {
        Self {
            worker,
            is_directory: true,
        }
    }
}

/// Successful open/create outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOutcome {
    /// The opened object turned out to be a directory.
    pub is_directory: bool,
}

impl OpenOutcome {
    pub fn file() -> Self {
        Self { is_directory: false }
    }

    pub fn directory() -> Self {
        Self { is_directory: true }
    }
}

/// Timestamps for set-times. `None` keeps the current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileTimes {
    pub creation: Option<SystemTime>,
    pub last_access: Option<SystemTime>,
    pub last_write: Option<SystemTime>,
}

impl FileTimes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the access time.
    pub fn with_access(mut self, t: SystemTime) -> Self {
        self.last_access = Some(t);
        self
    }

    /// Set the modification time.
    pub fn with_write(mut self, t: SystemTime) -> Self {
        self.last_write = Some(t);
        self
    }
}

/// Capacity figures for a free-space query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSpace {
    pub free_bytes_available: u64,
    pub total_bytes: u64,
    pub total_free_bytes: u64,
}

/// Volume description for get-volume-information.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInformation {
    pub volume_name: String,
    pub serial_number: u32,
    pub max_component_length: u32,
    pub file_system_name: String,
}

/// Convert remote seconds-since-epoch to a `SystemTime`.
pub fn from_unix_secs(secs: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs)
}

/// Convert a `SystemTime` to whole seconds since the epoch.
///
/// Times before the epoch clamp to zero.
pub fn to_unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

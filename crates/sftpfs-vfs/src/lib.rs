//! Filesystem operation contract and result cache for sftpfs.
//!
//! Key components:
//!
//! - [`FsOps`] - the callback contract a user-mode filesystem driver invokes
//! - [`CacheLayer`] - memoizing decorator over any `FsOps` backend
//! - [`PathCacheTree`] - the cache's per-path node arena
//! - [`MemoryBackend`] - in-memory backend for tests
//!
//! ## Design Decisions
//!
//! - **Path-based, no inodes**: operations take driver paths. Front ends
//!   that need inode numbers map them locally.
//! - **Event-invalidated cache**: no TTLs or size limits. Results stay until
//!   a mutation through this layer clears them, or the `:SSHFSProperty.Cache`
//!   pseudo-path is opened.
//! - **Explicit worker token**: every call carries a [`WorkerId`] so backends
//!   can keep per-worker state without relying on thread identity.

pub mod backends;
pub mod cache;
mod error;
mod ops;
pub mod path;
mod types;

pub use backends::MemoryBackend;
pub use cache::{CacheLayer, PathCacheTree};
pub use error::{VfsError, VfsResult};
pub use ops::FsOps;
pub use types::{
    CreateDisposition, DiskSpace, FileAttributes, FileContext, FileInformation, FileTimes,
    OpenOutcome, VolumeInformation, WorkerId, from_unix_secs, to_unix_secs,
};

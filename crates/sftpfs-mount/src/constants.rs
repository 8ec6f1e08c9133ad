//! Mount front-end constants.

use std::time::Duration;

/// Default size of the worker-token pool.
pub const DEFAULT_WORKERS: usize = 8;

/// How long the kernel may keep attributes and entries.
///
/// Kept short because the cache layer is the authoritative cache.
pub const ATTR_TTL: Duration = Duration::from_secs(1);

/// Block size reported in attributes and statfs.
pub const BLOCK_SIZE: u32 = 4096;

/// Longest file name accepted by the remote side.
pub const NAME_MAX: u32 = 255;

/// `renameat2` flag refusing to replace an existing target.
pub const RENAME_NOREPLACE: u32 = 1;

/// Filesystem type shown in the mount table.
pub const FS_NAME: &str = "sftpfs";

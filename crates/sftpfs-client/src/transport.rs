//! Seam between the session manager and a concrete remote protocol.
//!
//! A [`Transport`] authenticates and yields a [`Connection`]; a connection
//! multiplexes any number of [`RemoteChannel`]s, each exposing the remote
//! file primitives. The production stack is SSH + SFTP
//! ([`crate::ssh::SshTransport`]); tests use [`crate::MemoryRemote`].

use async_trait::async_trait;

use crate::error::RemoteResult;

/// File type mask and directory bits of a POSIX mode.
pub const S_IFMT: u32 = 0o170000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFREG: u32 = 0o100000;

/// Attributes reported by the remote host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteAttrs {
    pub size: u64,
    /// Full POSIX mode, type bits included.
    pub permissions: u32,
    /// Seconds since the Unix epoch.
    pub atime: u64,
    /// Seconds since the Unix epoch.
    pub mtime: u64,
}

impl RemoteAttrs {
    pub fn is_dir(&self) -> bool {
        self.permissions & S_IFMT == S_IFDIR
    }
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub attrs: RemoteAttrs,
}

/// Attributes to change with a set-attributes call. `None` leaves a field
/// untouched. Times travel together on the wire, so set both or neither.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetAttrs {
    pub size: Option<u64>,
    pub permissions: Option<u32>,
    pub times: Option<(u64, u64)>,
}

impl SetAttrs {
    pub fn size(size: u64) -> Self {
        Self {
            size: Some(size),
            ..Default::default()
        }
    }

    pub fn permissions(mode: u32) -> Self {
        Self {
            permissions: Some(mode),
            ..Default::default()
        }
    }

    /// Access and modification time, seconds since the epoch.
    pub fn times(atime: u64, mtime: u64) -> Self {
        Self {
            times: Some((atime, mtime)),
            ..Default::default()
        }
    }
}

/// Remote file primitives over one protocol channel.
///
/// A channel is owned by exactly one worker at a time.
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    async fn stat(&self, path: &str) -> RemoteResult<RemoteAttrs>;

    async fn list(&self, path: &str) -> RemoteResult<Vec<RemoteEntry>>;

    /// Read up to `len` bytes at `offset`.
    async fn read(&self, path: &str, offset: u64, len: u32) -> RemoteResult<Vec<u8>>;

    /// Write all of `data` at `offset`, extending the file as needed.
    async fn write(&self, path: &str, offset: u64, data: &[u8]) -> RemoteResult<()>;

    /// Create `path` as a zero-length file, truncating any existing one.
    async fn create(&self, path: &str) -> RemoteResult<()>;

    async fn rename(&self, from: &str, to: &str) -> RemoteResult<()>;

    async fn remove(&self, path: &str) -> RemoteResult<()>;

    async fn mkdir(&self, path: &str) -> RemoteResult<()>;

    async fn rmdir(&self, path: &str) -> RemoteResult<()>;

    async fn set_attrs(&self, path: &str, attrs: SetAttrs) -> RemoteResult<()>;

    /// Shut the channel down.
    async fn close(&self) -> RemoteResult<()>;
}

/// An authenticated connection able to open channels.
#[async_trait]
pub trait Connection: Send + Sync {
    type Channel: RemoteChannel + 'static;

    async fn open_channel(&self) -> RemoteResult<Self::Channel>;

    async fn disconnect(&self) -> RemoteResult<()>;
}

/// Establishes authenticated connections.
#[async_trait]
pub trait Transport: Send + Sync {
    type Connection: Connection + 'static;

    /// Connect and authenticate.
    async fn connect(&self) -> RemoteResult<Self::Connection>;
}

/// Channel type produced by a transport's connections.
pub type ChannelOf<T> = <<T as Transport>::Connection as Connection>::Channel;

//! Remote side of sftpfs.
//!
//! [`RemoteSession`] owns one authenticated SSH connection and hands each
//! worker its own SFTP channel. [`RemoteFs`] implements the filesystem
//! contract on top of it. [`MemoryRemote`] stands in for a real host in
//! tests.

pub mod adapter;
pub mod constants;
pub mod error;
pub mod memory;
pub mod session;
pub mod sftp;
pub mod ssh;
pub mod transport;

pub use adapter::{RemoteFs, RemoteOptions};
pub use error::{RemoteError, RemoteResult, StatusKind};
pub use memory::MemoryRemote;
pub use session::RemoteSession;
pub use sftp::SftpChannel;
pub use ssh::{Credential, SshConfig, SshConnection, SshError, SshTransport};
pub use transport::{Connection, RemoteAttrs, RemoteChannel, RemoteEntry, SetAttrs, Transport};

/// Adapter over a real SSH host.
pub type SftpFs = RemoteFs<SshTransport>;

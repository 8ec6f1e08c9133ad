//! SFTP primitives over one SSH channel.

use std::io::{self, SeekFrom};

use async_trait::async_trait;
use russh_sftp::client::SftpSession;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::protocol::{FileAttributes, OpenFlags, StatusCode};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::error::{RemoteError, RemoteResult, StatusKind};
use crate::transport::{RemoteAttrs, RemoteChannel, RemoteEntry, SetAttrs};

/// One SFTP subsystem session.
pub struct SftpChannel {
    sftp: SftpSession,
}

impl SftpChannel {
    pub fn new(sftp: SftpSession) -> Self {
        Self { sftp }
    }
}

fn attrs(meta: &FileAttributes) -> RemoteAttrs {
    RemoteAttrs {
        size: meta.size.unwrap_or(0),
        permissions: meta.permissions.unwrap_or(0),
        atime: meta.atime.map(u64::from).unwrap_or(0),
        mtime: meta.mtime.map(u64::from).unwrap_or(0),
    }
}

/// SFTP carries 32-bit times.
fn wire_time(secs: u64) -> u32 {
    u32::try_from(secs).unwrap_or(u32::MAX)
}

/// Classify an error from an open file handle.
///
/// Handles report through `io::Error`. A wrapped SFTP error is classified
/// like any other; an opaque `Other` means the request never got an answer
/// and counts as a transport fault.
fn handle_error(e: io::Error) -> RemoteError {
    if e.kind() != io::ErrorKind::Other {
        return RemoteError::from(e);
    }
    match e.into_inner().map(|inner| inner.downcast::<SftpError>()) {
        Some(Ok(sftp)) => RemoteError::from(*sftp),
        Some(Err(inner)) => RemoteError::Transport(inner.to_string()),
        None => RemoteError::Transport("file handle failed".to_string()),
    }
}

#[async_trait]
impl RemoteChannel for SftpChannel {
    async fn stat(&self, path: &str) -> RemoteResult<RemoteAttrs> {
        let meta = self.sftp.metadata(path).await?;
        Ok(attrs(&meta))
    }

    async fn list(&self, path: &str) -> RemoteResult<Vec<RemoteEntry>> {
        let entries = self.sftp.read_dir(path).await?;
        Ok(entries
            .map(|entry| RemoteEntry {
                attrs: attrs(&entry.metadata()),
                name: entry.file_name(),
            })
            .collect())
    }

    async fn read(&self, path: &str, offset: u64, len: u32) -> RemoteResult<Vec<u8>> {
        let mut file = self.sftp.open_with_flags(path, OpenFlags::READ).await?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(handle_error)?;

        let mut buf = vec![0u8; len as usize];
        let mut filled = 0;
        while filled < buf.len() {
            let n = file.read(&mut buf[filled..]).await.map_err(handle_error)?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        file.shutdown().await.map_err(handle_error)?;
        Ok(buf)
    }

    async fn write(&self, path: &str, offset: u64, data: &[u8]) -> RemoteResult<()> {
        let mut file = self.sftp.open_with_flags(path, OpenFlags::WRITE).await?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(handle_error)?;
        file.write_all(data).await.map_err(handle_error)?;
        file.shutdown().await.map_err(handle_error)?;
        Ok(())
    }

    async fn create(&self, path: &str) -> RemoteResult<()> {
        let mut file = self.sftp.create(path).await?;
        file.shutdown().await.map_err(handle_error)?;
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> RemoteResult<()> {
        Ok(self.sftp.rename(from, to).await?)
    }

    async fn remove(&self, path: &str) -> RemoteResult<()> {
        Ok(self.sftp.remove_file(path).await?)
    }

    async fn mkdir(&self, path: &str) -> RemoteResult<()> {
        Ok(self.sftp.create_dir(path).await?)
    }

    async fn rmdir(&self, path: &str) -> RemoteResult<()> {
        Ok(self.sftp.remove_dir(path).await?)
    }

    async fn set_attrs(&self, path: &str, changes: SetAttrs) -> RemoteResult<()> {
        let mut meta = FileAttributes::empty();
        meta.size = changes.size;
        meta.permissions = changes.permissions;
        if let Some((atime, mtime)) = changes.times {
            meta.atime = Some(wire_time(atime));
            meta.mtime = Some(wire_time(mtime));
        }
        Ok(self.sftp.set_metadata(path, meta).await?)
    }

    async fn close(&self) -> RemoteResult<()> {
        Ok(self.sftp.close().await?)
    }
}

impl From<SftpError> for RemoteError {
    fn from(e: SftpError) -> Self {
        match e {
            SftpError::Status(status) => {
                let kind = match status.status_code {
                    StatusCode::NoSuchFile => StatusKind::NoSuchFile,
                    StatusCode::PermissionDenied => StatusKind::PermissionDenied,
                    StatusCode::BadMessage => StatusKind::BadMessage,
                    StatusCode::OpUnsupported => StatusKind::OpUnsupported,
                    StatusCode::Eof => StatusKind::Eof,
                    StatusCode::NoConnection | StatusCode::ConnectionLost => {
                        return RemoteError::Transport(status.error_message);
                    }
                    _ => StatusKind::Failure,
                };
                RemoteError::status(kind, status.error_message)
            }
            other => RemoteError::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attrs_default_missing_fields() {
        let mut meta = FileAttributes::empty();
        meta.size = Some(12);
        meta.permissions = Some(0o100644);
        let a = attrs(&meta);
        assert_eq!(a.size, 12);
        assert!(!a.is_dir());
        assert_eq!(a.mtime, 0);
    }

    #[test]
    fn test_handle_errors_classified() {
        let lost = handle_error(io::Error::other("session closed"));
        assert!(lost.is_transport());

        let timeout = handle_error(io::Error::other(SftpError::Timeout));
        assert!(timeout.is_transport());

        let pipe = handle_error(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert!(pipe.is_transport());

        let gone = handle_error(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert!(gone.is_not_found());
    }

    #[test]
    fn test_wire_time_saturates() {
        assert_eq!(wire_time(5), 5);
        assert_eq!(wire_time(u64::MAX), u32::MAX);
    }
}

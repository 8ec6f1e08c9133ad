//! VFS error types.

use std::io;
use thiserror::Error;

/// VFS error type.
///
/// Every variant is cheap to clone: failed outcomes are cached by
/// [`CacheLayer`](crate::CacheLayer) and handed out again on later calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VfsError {
    /// File or directory not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Disposition or mode not valid for the target kind.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation deliberately unsupported.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// Directory not empty.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    /// Invalid path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Well-formed refusal from the remote host.
    #[error("remote refused {path}: {message}")]
    Remote { path: String, message: String },

    /// Connection-level failure talking to the remote host.
    #[error("transport fault: {0}")]
    Transport(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(path: impl Into<String>) -> Self {
        Self::AlreadyExists(path.into())
    }

    /// Create an InvalidArgument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(path: impl Into<String>) -> Self {
        Self::PermissionDenied(path.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    /// Create a DirectoryNotEmpty error.
    pub fn directory_not_empty(path: impl Into<String>) -> Self {
        Self::DirectoryNotEmpty(path.into())
    }

    /// Create an InvalidPath error.
    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath(path.into())
    }

    /// Create a Remote error.
    pub fn remote(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a Transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// POSIX errno for this error, as reported to a kernel driver.
    pub fn to_errno(&self) -> i32 {
        match self {
            VfsError::NotFound(_) => libc::ENOENT,
            VfsError::AlreadyExists(_) => libc::EEXIST,
            VfsError::InvalidArgument(_) | VfsError::InvalidPath(_) => libc::EINVAL,
            VfsError::NotImplemented(_) => libc::ENOSYS,
            VfsError::PermissionDenied(_) => libc::EACCES,
            VfsError::NotADirectory(_) => libc::ENOTDIR,
            VfsError::IsADirectory(_) => libc::EISDIR,
            VfsError::DirectoryNotEmpty(_) => libc::ENOTEMPTY,
            VfsError::Remote { .. } | VfsError::Transport(_) | VfsError::Other(_) => libc::EIO,
        }
    }
}

/// Convert VfsError to std::io::Error for compatibility.
impl From<VfsError> for io::Error {
    fn from(e: VfsError) -> Self {
        match e {
            VfsError::NotFound(msg) => io::Error::new(io::ErrorKind::NotFound, msg),
            VfsError::AlreadyExists(msg) => io::Error::new(io::ErrorKind::AlreadyExists, msg),
            VfsError::InvalidArgument(msg) | VfsError::InvalidPath(msg) => {
                io::Error::new(io::ErrorKind::InvalidInput, msg)
            }
            VfsError::NotImplemented(what) => io::Error::new(io::ErrorKind::Unsupported, what),
            VfsError::PermissionDenied(msg) => {
                io::Error::new(io::ErrorKind::PermissionDenied, msg)
            }
            VfsError::NotADirectory(msg) => io::Error::new(io::ErrorKind::NotADirectory, msg),
            VfsError::IsADirectory(msg) => io::Error::new(io::ErrorKind::IsADirectory, msg),
            VfsError::DirectoryNotEmpty(msg) => {
                io::Error::new(io::ErrorKind::DirectoryNotEmpty, msg)
            }
            e @ VfsError::Remote { .. } => io::Error::other(e.to_string()),
            VfsError::Transport(msg) => io::Error::new(io::ErrorKind::ConnectionAborted, msg),
            VfsError::Other(msg) => io::Error::other(msg),
        }
    }
}

/// VFS result type.
pub type VfsResult<T> = Result<T, VfsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(VfsError::not_found("/a").to_errno(), libc::ENOENT);
        assert_eq!(VfsError::already_exists("/a").to_errno(), libc::EEXIST);
        assert_eq!(VfsError::NotImplemented("streams").to_errno(), libc::ENOSYS);
        assert_eq!(VfsError::transport("reset").to_errno(), libc::EIO);
    }

    #[test]
    fn test_io_conversion() {
        let err: io::Error = VfsError::not_found("/missing").into();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);

        let err: io::Error = VfsError::transport("broken pipe").into();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }
}

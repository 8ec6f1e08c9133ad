//! Remote error classification.
//!
//! A [`RemoteError::Status`] is a well-formed refusal from the server and is
//! handed back to the caller as-is. Anything else is a
//! [`RemoteError::Transport`] fault that poisons the session.

use std::io;

/// Status categories a remote refusal can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    NoSuchFile,
    PermissionDenied,
    Failure,
    BadMessage,
    OpUnsupported,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("remote refused ({kind:?}): {message}")]
    Status { kind: StatusKind, message: String },
    #[error("transport failure: {0}")]
    Transport(String),
}

impl RemoteError {
    pub fn status(kind: StatusKind, message: impl Into<String>) -> Self {
        Self::Status {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(path: &str) -> Self {
        Self::status(StatusKind::NoSuchFile, format!("no such file: {path}"))
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// True for connection-level failures.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::Status {
                kind: StatusKind::NoSuchFile,
                ..
            }
        )
    }
}

/// Classify an I/O error surfaced by a remote file handle.
///
/// Connection-shaped kinds are transport faults; the rest are refusals.
impl From<io::Error> for RemoteError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::TimedOut => Self::Transport(e.to_string()),
            io::ErrorKind::NotFound => Self::status(StatusKind::NoSuchFile, e.to_string()),
            io::ErrorKind::PermissionDenied => {
                Self::status(StatusKind::PermissionDenied, e.to_string())
            }
            _ => Self::status(StatusKind::Failure, e.to_string()),
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_classification() {
        let e: RemoteError = io::Error::new(io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(e.is_transport());

        let e: RemoteError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(e.is_not_found());

        let e: RemoteError = io::Error::other("odd").into();
        assert!(!e.is_transport());
    }
}

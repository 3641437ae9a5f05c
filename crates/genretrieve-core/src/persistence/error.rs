//! Error types for persistence operations.

use std::fmt;

/// Errors that can occur during persistence operations.
#[derive(Debug)]
pub enum PersistenceError {
    /// I/O error (file operations, disk I/O).
    Io(std::io::Error),
    /// Invalid magic bytes, version mismatch, or corruption.
    Format {
        message: String,
        expected: Option<String>,
        actual: Option<String>,
    },
    Serialization(String),
    Deserialization(String),
    /// CRC32 mismatch on a persisted segment or WAL entry.
    ChecksumMismatch { expected: u32, actual: u32 },
    LockFailed { resource: String, reason: String },
    InvalidState(String),
    NotFound(String),
    InvalidConfig(String),
    NotSupported(String),
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Format {
                message,
                expected,
                actual,
            } => {
                write!(f, "format error: {message}")?;
                if let Some(e) = expected {
                    write!(f, " (expected: {e})")?;
                }
                if let Some(a) = actual {
                    write!(f, " (actual: {a})")?;
                }
                Ok(())
            }
            Self::Serialization(msg) => write!(f, "serialization error: {msg}"),
            Self::Deserialization(msg) => write!(f, "deserialization error: {msg}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
            Self::LockFailed { resource, reason } => {
                write!(f, "failed to acquire lock on {resource}: {reason}")
            }
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::NotFound(resource) => write!(f, "resource not found: {resource}"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::NotSupported(msg) => write!(f, "operation not supported: {msg}"),
        }
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PersistenceError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<postcard::Error> for PersistenceError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(format!("postcard error: {e}"))
    }
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;

//! Error types for flashpack

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the codec, the storage pipeline and the transfer machine
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed length prefix: got {0} bytes, expected a non-zero 2-byte length")]
    MalformedLengthPrefix(usize),

    #[error("Declared length {declared} exceeds storage capacity of {capacity} bytes")]
    CapacityExceeded { declared: usize, capacity: usize },

    #[error("Not a container: magic signature missing")]
    NotAContainer,

    #[error("Checksum mismatch: got {actual:08X}, expecting {expected:08X}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("Decompression produced {actual} bytes, header declares {expected}")]
    DecompressionLengthMismatch { expected: u32, actual: usize },

    #[error("Decompression failed: {0}")]
    Decompression(String),

    #[error("Unsupported compression method: {0}")]
    UnsupportedCompression(u16),

    #[error("Storage read failure at block {block}: {reason}")]
    StorageReadFailure { block: usize, reason: String },

    #[error("Storage write failure at block {block}: {reason}")]
    StorageWriteFailure { block: usize, reason: String },

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a storage read failure
    pub fn read_failure(block: usize, reason: impl Into<String>) -> Self {
        Error::StorageReadFailure {
            block,
            reason: reason.into(),
        }
    }

    /// Create a storage write failure
    pub fn write_failure(block: usize, reason: impl Into<String>) -> Self {
        Error::StorageWriteFailure {
            block,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_failure_display() {
        let err = Error::write_failure(3, "busy");
        assert_eq!(err.to_string(), "Storage write failure at block 3: busy");
    }

    #[test]
    fn test_checksum_display() {
        let err = Error::ChecksumMismatch {
            expected: 0xDEADBEEF,
            actual: 0x1,
        };
        assert_eq!(
            err.to_string(),
            "Checksum mismatch: got 00000001, expecting DEADBEEF"
        );
    }
}

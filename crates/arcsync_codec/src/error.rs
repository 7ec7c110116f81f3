//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while decoding, compressing or decompressing an
/// archive.
///
/// Field encoding itself never fails: every field has a fixed width or an
/// explicit `u32` length prefix. Oversized archives are rejected when
/// packed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer bytes remain than the next field requires.
    #[error("truncated data: needed {needed} bytes, {remaining} remaining")]
    TruncatedData {
        /// Bytes required by the field being read.
        needed: usize,
        /// Bytes left in the buffer.
        remaining: usize,
    },

    /// The bytes are not a valid archive (bad compression frame,
    /// out-of-range flag byte, invalid UTF-8, oversized output).
    #[error("corrupt archive: {message}")]
    CorruptArchive {
        /// Description of what was wrong.
        message: String,
    },

    /// The compressor rejected its input.
    #[error("compression failed: {message}")]
    CompressionFailed {
        /// Description of the compressor error.
        message: String,
    },
}

impl CodecError {
    /// Create a truncated data error.
    pub fn truncated(needed: usize, remaining: usize) -> Self {
        Self::TruncatedData { needed, remaining }
    }

    /// Create a corrupt archive error.
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptArchive {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CodecError::truncated(8, 3);
        assert_eq!(err.to_string(), "truncated data: needed 8 bytes, 3 remaining");

        let err = CodecError::corrupt("bad frame");
        assert!(err.to_string().contains("bad frame"));
    }
}

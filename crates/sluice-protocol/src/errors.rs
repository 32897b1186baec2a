//! Decode failures.

use thiserror::Error;

/// The bytes are not a well-formed envelope, or the body does not match the
/// declared packet type.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Input ended before a fixed-width field could be read.
    #[error("truncated input reading {field}: need {needed} bytes, {remaining} left")]
    Truncated {
        /// Field being read.
        field: &'static str,
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        remaining: usize,
    },

    /// A length prefix claims more bytes than remain.
    #[error("{field} declares {declared} bytes but only {remaining} remain")]
    LengthOverflow {
        /// Field being read.
        field: &'static str,
        /// Declared length.
        declared: usize,
        /// Bytes available.
        remaining: usize,
    },

    /// A string field is not valid UTF-8.
    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 {
        /// Field being read.
        field: &'static str,
    },

    /// Bytes remain after the last field.
    #[error("{count} trailing bytes after {context}")]
    TrailingBytes {
        /// What was fully decoded.
        context: &'static str,
        /// Number of unread bytes.
        count: usize,
    },

    /// A response decoder received a packet type it cannot interpret.
    #[error("unexpected packet type {tag} in response")]
    UnexpectedType {
        /// Raw type discriminant.
        tag: i32,
    },
}

//! Format-string encoding errors

use thiserror::Error;

/// Errors raised while encoding records into a format string
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// A relative offset does not fit the 16-bit field that carries it
    #[error("relative offset {offset} at position {at} does not fit in 16 bits")]
    OffsetOverflow { at: u32, offset: i64 },

    /// A value does not fit the field width the runtime expects
    #[error("{what} value {value} exceeds the maximum of {max}")]
    FieldOverflow {
        what: &'static str,
        value: u64,
        max: u64,
    },

    /// A label was bound twice
    #[error("label {0} bound more than once")]
    LabelRebound(u32),

    /// A label was never bound before the writer was finished
    #[error("label {0} used but never bound")]
    UnboundLabel(u32),

    /// Invalid GUID text
    #[error("invalid GUID: {0}")]
    InvalidGuid(String),
}

impl FormatError {
    /// Whether the error reports a value that exceeded an encodable width,
    /// as opposed to misuse of the writer
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::OffsetOverflow { .. } | Self::FieldOverflow { .. })
    }
}

/// Result type for format-string operations
pub type Result<T> = std::result::Result<T, FormatError>;

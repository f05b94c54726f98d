//! Type format compiler errors

use ndr_format::FormatError;
use thiserror::Error;

/// Coarse error classification, so a harness can tell bad input from a
/// compiler bug
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    /// The input uses a construct that cannot be described or encoded
    BadInput,
    /// The compiler broke one of its own invariants
    Internal,
}

/// Type format compilation errors
#[derive(Debug, Error)]
pub enum MidlError {
    /// A type/attribute combination no shape can describe
    #[error("unsupported construct in {name}: {message}")]
    Unsupported { name: String, message: String },

    /// A computed value exceeds the width of the field that encodes it
    #[error("{what} of {name} is {value}, exceeding the maximum of {max}")]
    Capacity {
        name: String,
        what: &'static str,
        value: u64,
        max: u64,
    },

    /// Emission state disagrees with itself
    #[error("internal compiler error: {0}")]
    Internal(String),

    /// Code generation error
    #[error("code generation error: {message}")]
    Codegen { message: String },

    /// Record encoding failed
    #[error("format string error: {0}")]
    Format(#[from] FormatError),
}

/// Result type for type format operations
pub type Result<T> = std::result::Result<T, MidlError>;

impl MidlError {
    pub fn unsupported(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unsupported {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn capacity(name: impl Into<String>, what: &'static str, value: u64, max: u64) -> Self {
        Self::Capacity {
            name: name.into(),
            what,
            value,
            max,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn codegen(message: impl Into<String>) -> Self {
        Self::Codegen {
            message: message.into(),
        }
    }

    pub fn status(&self) -> ErrorStatus {
        match self {
            Self::Unsupported { .. } | Self::Capacity { .. } => ErrorStatus::BadInput,
            Self::Format(e) if e.is_capacity() => ErrorStatus::BadInput,
            Self::Format(_) | Self::Internal(_) | Self::Codegen { .. } => ErrorStatus::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status() {
        assert_eq!(
            MidlError::unsupported("u", "non-integer discriminant").status(),
            ErrorStatus::BadInput
        );
        assert_eq!(
            MidlError::capacity("s", "structure size", 70_000, 0xffff).status(),
            ErrorStatus::BadInput
        );
        assert_eq!(
            MidlError::from(FormatError::OffsetOverflow { at: 0, offset: 40_000 }).status(),
            ErrorStatus::BadInput
        );
        assert_eq!(
            MidlError::from(FormatError::UnboundLabel(3)).status(),
            ErrorStatus::Internal
        );
        assert_eq!(MidlError::internal("x").status(), ErrorStatus::Internal);
    }

    #[test]
    fn test_message_names_offender() {
        let err = MidlError::unsupported("my_union", "switch type is not an integer");
        assert_eq!(
            err.to_string(),
            "unsupported construct in my_union: switch type is not an integer"
        );
    }
}

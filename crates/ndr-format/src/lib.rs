//! NDR format-string vocabulary
//!
//! This crate holds the binary side of the type format string compiler: the
//! frozen format-character table interpreted by the NDR runtime engine, typed
//! records for every shape the compiler emits, and the `FormatWriter` that
//! serializes records at absolute offsets.
//!
//! # Offsets
//!
//! Records reference each other through signed 16-bit offsets relative to the
//! position of the offset field itself. A reference to a record that has not
//! been written yet goes through a [`Label`]; the writer patches every use of
//! the label once it is bound.
//!
//! # Byte order
//!
//! Every multi-byte field is little-endian, matching the runtime.

mod error;
mod fc;
mod guid;
mod writer;
pub mod correlation;
pub mod records;
pub mod procformat;

pub use error::{FormatError, Result};
pub use fc::{ContextHandleFlags, FormatChar, PointerFlags, UserMarshalFlags};
pub use guid::Guid;
pub use writer::{Encode, FormatWriter, Label, Target};

/// Re-export bytes for convenience
pub use bytes::Bytes;

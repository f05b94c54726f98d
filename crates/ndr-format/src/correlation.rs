//! Correlation descriptors
//!
//! A correlation descriptor is the 4-byte field that tells the runtime how to
//! find a conformance (allocated size), variance (transmitted length), union
//! discriminant, or dynamic interface identifier at run time.

use crate::error::{FormatError, Result};
use crate::fc::FormatChar;
use crate::writer::{Encode, FormatWriter};

/// Correlation type bits (high nibble of the first descriptor byte)
pub const NORMAL_CONFORMANCE: u8 = 0x00;
pub const POINTER_CONFORMANCE: u8 = 0x10;
pub const TOP_LEVEL_CONFORMANCE: u8 = 0x20;
pub const CONSTANT_CONFORMANCE: u8 = 0x40;
pub const TOP_LEVEL_MULTID_CONFORMANCE: u8 = 0x80;

/// Largest value a constant descriptor can carry (8 + 16 bits)
pub const MAX_CONSTANT: u32 = 0x00ff_ffff;

/// Operator applied to the correlated field before use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CorrelationOp {
    #[default]
    None,
    Dereference,
    Div2,
    Mult2,
    Add1,
    Sub1,
}

impl CorrelationOp {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Dereference => FormatChar::Dereference.as_u8(),
            Self::Div2 => FormatChar::Div2.as_u8(),
            Self::Mult2 => FormatChar::Mult2.as_u8(),
            Self::Add1 => FormatChar::Add1.as_u8(),
            Self::Sub1 => FormatChar::Sub1.as_u8(),
        }
    }
}

/// Whether the correlated value is reached through the structure in memory
/// or through the pointer being sized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CorrelationKind {
    #[default]
    Normal,
    Pointer,
}

impl CorrelationKind {
    fn bits(self) -> u8 {
        match self {
            Self::Normal => NORMAL_CONFORMANCE,
            Self::Pointer => POINTER_CONFORMANCE,
        }
    }
}

/// A 4-byte correlation descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationDesc {
    /// No correlation: `FF FF FF FF`
    Absent,
    /// Computed by the stub from the parameter list at call time
    TopLevel,
    /// A literal value
    Constant(u32),
    /// A sibling field at `offset` bytes from the base the runtime uses
    Field {
        kind: CorrelationKind,
        field_type: FormatChar,
        op: CorrelationOp,
        offset: i16,
    },
    /// An expression-evaluation routine
    Callback { kind: CorrelationKind, index: u16 },
}

impl CorrelationDesc {
    /// Encoded size in bytes
    pub const SIZE: u32 = 4;
}

impl Encode for CorrelationDesc {
    fn encode(&self, w: &mut FormatWriter) -> Result<()> {
        match *self {
            Self::Absent => w.put_u32(0xffff_ffff),
            Self::TopLevel => {
                w.put_u8(TOP_LEVEL_CONFORMANCE);
                w.put_u8(0);
                w.put_u16(0);
            }
            Self::Constant(value) => {
                if value > MAX_CONSTANT {
                    return Err(FormatError::FieldOverflow {
                        what: "constant conformance",
                        value: value as u64,
                        max: MAX_CONSTANT as u64,
                    });
                }
                w.put_u8(CONSTANT_CONFORMANCE);
                w.put_u8((value >> 16) as u8);
                w.put_u16(value as u16);
            }
            Self::Field {
                kind,
                field_type,
                op,
                offset,
            } => {
                w.put_u8(kind.bits() | field_type.as_u8());
                w.put_u8(op.as_u8());
                w.put_i16(offset);
            }
            Self::Callback { kind, index } => {
                w.put_u8(kind.bits());
                w.put_fc(FormatChar::Callback);
                w.put_u16(index);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(desc: CorrelationDesc) -> Vec<u8> {
        let mut w = FormatWriter::new();
        w.emit(&desc).unwrap();
        w.as_bytes().to_vec()
    }

    #[test]
    fn test_sentinels() {
        assert_eq!(bytes(CorrelationDesc::Absent), vec![0xff; 4]);
        assert_eq!(bytes(CorrelationDesc::TopLevel), vec![0x20, 0, 0, 0]);
    }

    #[test]
    fn test_constant() {
        assert_eq!(
            bytes(CorrelationDesc::Constant(0x012345)),
            vec![0x40, 0x01, 0x45, 0x23]
        );
        let mut w = FormatWriter::new();
        assert!(w.emit(&CorrelationDesc::Constant(0x0100_0000)).is_err());
    }

    #[test]
    fn test_field_and_callback() {
        let field = CorrelationDesc::Field {
            kind: CorrelationKind::Pointer,
            field_type: FormatChar::Long,
            op: CorrelationOp::Mult2,
            offset: -4,
        };
        assert_eq!(bytes(field), vec![0x18, 0x56, 0xfc, 0xff]);

        let callback = CorrelationDesc::Callback {
            kind: CorrelationKind::Normal,
            index: 3,
        };
        assert_eq!(bytes(callback), vec![0x00, 0x59, 3, 0]);
    }
}

//! Procedure format string directives
//!
//! Every parameter of a compiled function contributes one directive; a
//! function's directives are terminated by `FC_END, FC_PAD`.

use crate::error::Result;
use crate::fc::FormatChar;
use crate::writer::{Encode, FormatWriter};

/// Direction of a complex parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamDirection {
    In,
    Out,
    InOut,
    Return,
}

impl ParamDirection {
    /// Directive character for a parameter described in the type format string
    pub fn complex_fc(self) -> FormatChar {
        match self {
            Self::In => FormatChar::InParam,
            Self::Out => FormatChar::OutParam,
            Self::InOut => FormatChar::InOutParam,
            Self::Return => FormatChar::ReturnParam,
        }
    }

    /// Directive character for a scalar parameter
    pub fn base_type_fc(self) -> FormatChar {
        match self {
            Self::Return => FormatChar::ReturnParamBaseType,
            _ => FormatChar::InParamBaseType,
        }
    }
}

/// One parameter directive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDirective {
    /// `FC_IN_PARAM_BASETYPE | FC_RETURN_PARAM_BASETYPE, fc`
    BaseType {
        direction: ParamDirection,
        fc: FormatChar,
    },
    /// `direction_fc, stack_slots, tfs_offset16`
    Complex {
        direction: ParamDirection,
        stack_slots: u8,
        type_offset: u16,
    },
}

impl ParamDirective {
    /// Encoded size in bytes
    pub fn size(&self) -> u32 {
        match self {
            Self::BaseType { .. } => 2,
            Self::Complex { .. } => 4,
        }
    }
}

impl Encode for ParamDirective {
    fn encode(&self, w: &mut FormatWriter) -> Result<()> {
        match *self {
            Self::BaseType { direction, fc } => {
                w.put_fc(direction.base_type_fc());
                w.put_fc(fc);
            }
            Self::Complex {
                direction,
                stack_slots,
                type_offset,
            } => {
                w.put_fc(direction.complex_fc());
                w.put_u8(stack_slots);
                w.put_u16(type_offset);
            }
        }
        Ok(())
    }
}

/// `FC_END, FC_PAD` closing a function's directives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EndOfProcedure;

impl Encode for EndOfProcedure {
    fn encode(&self, w: &mut FormatWriter) -> Result<()> {
        w.put_fc(FormatChar::End);
        w.put_fc(FormatChar::Pad);
        Ok(())
    }
}

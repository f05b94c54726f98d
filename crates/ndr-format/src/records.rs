//! Typed type-format-string records
//!
//! One type per record shape. Records hold typed fields and absolute
//! [`Target`]s; they are turned into bytes only by [`Encode`], which is the
//! single place that computes relative offsets.

use crate::correlation::CorrelationDesc;
use crate::error::{FormatError, Result};
use crate::fc::{ContextHandleFlags, FormatChar, PointerFlags, UserMarshalFlags};
use crate::guid::Guid;
use crate::writer::{Encode, FormatWriter, Target};

/// Encode `alignment - 1` into the single alignment byte records carry
fn alignment_byte(alignment: u32) -> Result<u8> {
    if alignment == 0 || alignment > 16 {
        return Err(FormatError::FieldOverflow {
            what: "alignment",
            value: alignment as u64,
            max: 16,
        });
    }
    Ok((alignment - 1) as u8)
}

/// A 4-byte pointer description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerRecord {
    /// Pointer to a scalar, folded into the record
    Simple {
        pointer: FormatChar,
        flags: PointerFlags,
        base: FormatChar,
    },
    /// Pointer to a record elsewhere in the format string
    Referent {
        pointer: FormatChar,
        flags: PointerFlags,
        target: Target,
    },
    /// A string pointer: `ptr, FC_SIMPLE_POINTER, string_fc, FC_PAD`
    String {
        pointer: FormatChar,
        flags: PointerFlags,
        string: FormatChar,
    },
}

impl PointerRecord {
    pub const SIZE: u32 = 4;
}

impl Encode for PointerRecord {
    fn encode(&self, w: &mut FormatWriter) -> Result<()> {
        match *self {
            Self::Simple {
                pointer,
                flags,
                base,
            } => {
                w.put_fc(pointer);
                w.put_u8((flags | PointerFlags::SIMPLE_POINTER).bits());
                w.put_fc(base);
                w.put_fc(FormatChar::Pad);
            }
            Self::Referent {
                pointer,
                flags,
                target,
            } => {
                w.put_fc(pointer);
                w.put_u8(flags.bits());
                w.put_offset(target)?;
            }
            Self::String {
                pointer,
                flags,
                string,
            } => {
                w.put_fc(pointer);
                w.put_u8((flags | PointerFlags::SIMPLE_POINTER).bits());
                w.put_fc(string);
                w.put_fc(FormatChar::Pad);
            }
        }
        Ok(())
    }
}

/// A scalar written as a standalone record: `fc, FC_PAD`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseTypeRecord(pub FormatChar);

impl Encode for BaseTypeRecord {
    fn encode(&self, w: &mut FormatWriter) -> Result<()> {
        w.put_fc(self.0);
        w.put_fc(FormatChar::Pad);
        Ok(())
    }
}

/// String descriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringRecord {
    /// `FC_CSTRING`/`FC_WSTRING` with a fixed dimension
    Fixed { fc: FormatChar, dim: u32 },
    /// `FC_C_CSTRING`/`FC_C_WSTRING` sized by a correlation descriptor
    Sized {
        fc: FormatChar,
        size_is: CorrelationDesc,
    },
    /// `FC_C_CSTRING`/`FC_C_WSTRING` sized by its terminator
    Unsized { fc: FormatChar },
}

impl Encode for StringRecord {
    fn encode(&self, w: &mut FormatWriter) -> Result<()> {
        match *self {
            Self::Fixed { fc, dim } => {
                w.put_fc(fc);
                w.put_fc(FormatChar::Pad);
                w.put_u16_checked("string dimension", dim as u64)?;
            }
            Self::Sized { fc, size_is } => {
                w.put_fc(fc);
                w.put_fc(FormatChar::StringSized);
                size_is.encode(w)?;
            }
            Self::Unsized { fc } => {
                w.put_fc(fc);
                w.put_fc(FormatChar::Pad);
            }
        }
        Ok(())
    }
}

/// Interface pointer descriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfacePointerRecord {
    /// `FC_IP, FC_CONSTANT_IID, guid`
    Constant(Guid),
    /// `FC_IP, FC_PAD, corr(iid_is)`
    IidIs(CorrelationDesc),
}

impl Encode for InterfacePointerRecord {
    fn encode(&self, w: &mut FormatWriter) -> Result<()> {
        w.put_fc(FormatChar::InterfacePointer);
        match self {
            Self::Constant(guid) => {
                w.put_fc(FormatChar::ConstantIid);
                w.put_slice(&guid.to_bytes_le());
            }
            Self::IidIs(desc) => {
                w.put_fc(FormatChar::Pad);
                desc.encode(w)?;
            }
        }
        Ok(())
    }
}

/// `FC_BIND_CONTEXT, flags, rundown, param` (the last two filled by the runtime)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextHandleRecord {
    pub flags: ContextHandleFlags,
}

impl Encode for ContextHandleRecord {
    fn encode(&self, w: &mut FormatWriter) -> Result<()> {
        w.put_fc(FormatChar::BindContext);
        w.put_u8(self.flags.bits());
        w.put_u8(0);
        w.put_u8(0);
        Ok(())
    }
}

/// `FC_USER_MARSHAL` record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserMarshalRecord {
    pub flags: UserMarshalFlags,
    pub alignment: u32,
    pub routine: u32,
    pub memory_size: u32,
    pub wire_size: u32,
    pub wire: Target,
}

impl Encode for UserMarshalRecord {
    fn encode(&self, w: &mut FormatWriter) -> Result<()> {
        w.put_fc(FormatChar::UserMarshal);
        w.put_u8(self.flags.bits() | alignment_byte(self.alignment)?);
        w.put_u16_checked("user marshal routine index", self.routine as u64)?;
        w.put_u16_checked("user type memory size", self.memory_size as u64)?;
        w.put_u16_checked("user type wire size", self.wire_size as u64)?;
        w.put_offset(self.wire)
    }
}

/// One entry of a structure member layout or array element description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Member {
    /// A one-byte code: scalar tag, `FC_LONG`/`FC_POINTER` placeholder,
    /// `FC_ALIGNMn` or `FC_STRUCTPADn`
    Code(FormatChar),
    /// `FC_EMBEDDED_COMPLEX, pad, rel16`
    EmbeddedComplex { memory_pad: u8, target: Target },
    /// A full pointer description written inline
    Pointer(PointerRecord),
}

impl Encode for Member {
    fn encode(&self, w: &mut FormatWriter) -> Result<()> {
        match *self {
            Self::Code(fc) => w.put_fc(fc),
            Self::EmbeddedComplex { memory_pad, target } => {
                w.put_fc(FormatChar::EmbeddedComplex);
                w.put_u8(memory_pad);
                w.put_offset(target)?;
            }
            Self::Pointer(record) => record.encode(w)?,
        }
        Ok(())
    }
}

/// A pointer inside a structure or array element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerInstance {
    pub memory_offset: u32,
    pub buffer_offset: u32,
    pub pointer: PointerRecord,
}

impl Encode for PointerInstance {
    fn encode(&self, w: &mut FormatWriter) -> Result<()> {
        w.put_u16_checked("pointer memory offset", self.memory_offset as u64)?;
        w.put_u16_checked("pointer buffer offset", self.buffer_offset as u64)?;
        self.pointer.encode(w)
    }
}

/// One pass of a pointer layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerLayoutEntry {
    /// A single pointer
    NoRepeat(PointerInstance),
    /// Pointers repeated over a fixed array
    FixedRepeat {
        iterations: u32,
        increment: u32,
        offset_to_array: u32,
        pointers: Vec<PointerInstance>,
    },
    /// Pointers repeated over a conformant or varying array
    VariableRepeat {
        variable_offset: bool,
        increment: u32,
        offset_to_array: u32,
        pointers: Vec<PointerInstance>,
    },
}

impl Encode for PointerLayoutEntry {
    fn encode(&self, w: &mut FormatWriter) -> Result<()> {
        match self {
            Self::NoRepeat(instance) => {
                w.put_fc(FormatChar::NoRepeat);
                w.put_fc(FormatChar::Pad);
                instance.encode(w)?;
            }
            Self::FixedRepeat {
                iterations,
                increment,
                offset_to_array,
                pointers,
            } => {
                w.put_fc(FormatChar::FixedRepeat);
                w.put_fc(FormatChar::Pad);
                w.put_u16_checked("repeat count", *iterations as u64)?;
                w.put_u16_checked("repeat increment", *increment as u64)?;
                w.put_u16_checked("offset to array", *offset_to_array as u64)?;
                w.put_u16_checked("pointer count", pointers.len() as u64)?;
                for p in pointers {
                    p.encode(w)?;
                }
            }
            Self::VariableRepeat {
                variable_offset,
                increment,
                offset_to_array,
                pointers,
            } => {
                w.put_fc(FormatChar::VariableRepeat);
                w.put_fc(if *variable_offset {
                    FormatChar::VariableOffset
                } else {
                    FormatChar::FixedOffset
                });
                w.put_u16_checked("repeat increment", *increment as u64)?;
                w.put_u16_checked("offset to array", *offset_to_array as u64)?;
                w.put_u16_checked("pointer count", pointers.len() as u64)?;
                for p in pointers {
                    p.encode(w)?;
                }
            }
        }
        Ok(())
    }
}

/// `FC_PP, FC_PAD, entries..., FC_END`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PointerLayout {
    pub entries: Vec<PointerLayoutEntry>,
}

impl PointerLayout {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Encode for PointerLayout {
    fn encode(&self, w: &mut FormatWriter) -> Result<()> {
        w.put_fc(FormatChar::PointerLayout);
        w.put_fc(FormatChar::Pad);
        for entry in &self.entries {
            entry.encode(w)?;
        }
        w.put_fc(FormatChar::End);
        Ok(())
    }
}

/// Structure record (all six structure format characters)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructRecord {
    pub fc: FormatChar,
    pub alignment: u32,
    pub memory_size: u32,
    /// Trailing conformant array (or string) description
    pub conformant_array: Option<Target>,
    /// Bogus structures only: where the pointer table starts
    pub pointer_table: Option<Target>,
    pub pointer_layout: Option<PointerLayout>,
    pub members: Vec<Member>,
}

impl Encode for StructRecord {
    fn encode(&self, w: &mut FormatWriter) -> Result<()> {
        let bogus = self.fc == FormatChar::BogusStruct;
        w.put_fc(self.fc);
        w.put_u8(alignment_byte(self.alignment)?);
        w.put_u16_checked("structure size", self.memory_size as u64)?;
        match self.conformant_array {
            Some(target) => w.put_offset(target)?,
            None if bogus => w.put_u16(0),
            None => {}
        }
        if bogus {
            match self.pointer_table {
                Some(target) => w.put_offset(target)?,
                None => w.put_u16(0),
            }
        }
        if let Some(layout) = &self.pointer_layout {
            layout.encode(w)?;
        }
        for member in &self.members {
            member.encode(w)?;
        }
        w.put_end();
        Ok(())
    }
}

/// Fixed, varying, conformant and conformant-varying array record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayRecord {
    pub fc: FormatChar,
    pub alignment: u32,
    /// Total size for fixed/varying arrays, element size for conformant ones
    pub size: u32,
    pub conformance: Option<CorrelationDesc>,
    /// Varying arrays: element count and element size
    pub varying: Option<(u32, u32)>,
    pub variance: Option<CorrelationDesc>,
    pub pointer_layout: Option<PointerLayout>,
    pub element: Member,
}

impl Encode for ArrayRecord {
    fn encode(&self, w: &mut FormatWriter) -> Result<()> {
        let large = matches!(self.fc, FormatChar::LgFArray | FormatChar::LgVArray);
        w.put_fc(self.fc);
        w.put_u8(alignment_byte(self.alignment)?);
        if large {
            w.put_u32_checked("array size", self.size as u64)?;
        } else {
            w.put_u16_checked("array size", self.size as u64)?;
        }
        if let Some(desc) = &self.conformance {
            desc.encode(w)?;
        }
        if let Some((elements, element_size)) = self.varying {
            if large {
                w.put_u32(elements);
            } else {
                w.put_u16_checked("array elements", elements as u64)?;
            }
            w.put_u16_checked("array element size", element_size as u64)?;
        }
        if let Some(desc) = &self.variance {
            desc.encode(w)?;
        }
        if let Some(layout) = &self.pointer_layout {
            layout.encode(w)?;
        }
        self.element.encode(w)?;
        w.put_end();
        Ok(())
    }
}

/// `FC_BOGUS_ARRAY` record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BogusArrayRecord {
    pub alignment: u32,
    /// Zero for conformant arrays
    pub dim: u32,
    pub conformance: CorrelationDesc,
    pub variance: CorrelationDesc,
    pub element: Member,
}

impl Encode for BogusArrayRecord {
    fn encode(&self, w: &mut FormatWriter) -> Result<()> {
        w.put_fc(FormatChar::BogusArray);
        w.put_u8(alignment_byte(self.alignment)?);
        w.put_u16_checked("array dimension", self.dim as u64)?;
        self.conformance.encode(w)?;
        self.variance.encode(w)?;
        self.element.encode(w)?;
        w.put_end();
        Ok(())
    }
}

/// The 2-byte arm descriptor of a union case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmDesc {
    /// Scalar arm folded into the descriptor: `0x8000 | fc`
    Scalar(FormatChar),
    /// Arm without data
    Empty,
    /// Offset to the arm's record
    Complex(Target),
}

impl Encode for ArmDesc {
    fn encode(&self, w: &mut FormatWriter) -> Result<()> {
        match *self {
            Self::Scalar(fc) => w.put_u16(0x8000 | fc.as_u8() as u16),
            Self::Empty => w.put_u16(0),
            Self::Complex(target) => w.put_offset(target)?,
        }
        Ok(())
    }
}

/// Union arm table: `memsize16, count16, {label32, arm16}*, default16`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnionArms {
    pub memory_size: u32,
    pub arms: Vec<(u32, ArmDesc)>,
    pub default: Option<ArmDesc>,
}

impl Encode for UnionArms {
    fn encode(&self, w: &mut FormatWriter) -> Result<()> {
        w.put_u16_checked("union size", self.memory_size as u64)?;
        w.put_u16_checked("union arm count", self.arms.len() as u64)?;
        for (label, arm) in &self.arms {
            w.put_u32(*label);
            arm.encode(w)?;
        }
        match &self.default {
            Some(arm) => arm.encode(w)?,
            None => w.put_u16(0xffff),
        }
        Ok(())
    }
}

/// `FC_ENCAPSULATED_UNION, (increment << 4) | switch_fc, arms`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncapsulatedUnionRecord {
    pub switch_type: FormatChar,
    pub memory_increment: u32,
    pub arms: UnionArms,
}

impl Encode for EncapsulatedUnionRecord {
    fn encode(&self, w: &mut FormatWriter) -> Result<()> {
        if self.memory_increment > 0x0f {
            return Err(FormatError::FieldOverflow {
                what: "union memory increment",
                value: self.memory_increment as u64,
                max: 0x0f,
            });
        }
        w.put_fc(FormatChar::EncapsulatedUnion);
        w.put_u8(((self.memory_increment as u8) << 4) | self.switch_type.as_u8());
        self.arms.encode(w)
    }
}

/// `FC_NON_ENCAPSULATED_UNION, switch_fc, corr(switch_is), rel16 -> arms`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonEncapsulatedUnionRecord {
    pub switch_type: FormatChar,
    pub switch_is: CorrelationDesc,
    pub arms: Target,
}

impl Encode for NonEncapsulatedUnionRecord {
    fn encode(&self, w: &mut FormatWriter) -> Result<()> {
        w.put_fc(FormatChar::NonEncapsulatedUnion);
        w.put_fc(self.switch_type);
        self.switch_is.encode(w)?;
        w.put_offset(self.arms)
    }
}

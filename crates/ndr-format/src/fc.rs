//! Format characters
//!
//! The values below are fixed by the NDR runtime engine. They are not a
//! design choice of this crate and must never be renumbered.

use bitflags::bitflags;

/// A single format character (`FC_*`) understood by the NDR engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum FormatChar {
    Zero = 0x00,
    Byte = 0x01,
    Char = 0x02,
    Small = 0x03,
    USmall = 0x04,
    WChar = 0x05,
    Short = 0x06,
    UShort = 0x07,
    Long = 0x08,
    ULong = 0x09,
    Float = 0x0a,
    Hyper = 0x0b,
    Double = 0x0c,
    Enum16 = 0x0d,
    Enum32 = 0x0e,
    Ignore = 0x0f,
    ErrorStatusT = 0x10,

    // Pointers
    RefPointer = 0x11,
    UniquePointer = 0x12,
    ObjectPointer = 0x13,
    FullPointer = 0x14,

    // Structures
    Struct = 0x15,
    PStruct = 0x16,
    CStruct = 0x17,
    CPStruct = 0x18,
    CVStruct = 0x19,
    BogusStruct = 0x1a,

    // Arrays
    CArray = 0x1b,
    CVArray = 0x1c,
    SmFArray = 0x1d,
    LgFArray = 0x1e,
    SmVArray = 0x1f,
    LgVArray = 0x20,
    BogusArray = 0x21,

    // Strings
    CCString = 0x22,
    CSString = 0x24,
    CWString = 0x25,
    CString = 0x26,
    SString = 0x28,
    WString = 0x29,

    // Unions
    EncapsulatedUnion = 0x2a,
    NonEncapsulatedUnion = 0x2b,

    ByteCountPointer = 0x2c,
    TransmitAs = 0x2d,
    RepresentAs = 0x2e,

    InterfacePointer = 0x2f,

    // Handles
    BindContext = 0x30,
    BindGeneric = 0x31,
    BindPrimitive = 0x32,
    AutoHandle = 0x33,
    CallbackHandle = 0x34,

    Pointer = 0x36,

    // Member alignment and padding
    AlignM2 = 0x37,
    AlignM4 = 0x38,
    AlignM8 = 0x39,
    StructPad1 = 0x3d,
    StructPad2 = 0x3e,
    StructPad3 = 0x3f,
    StructPad4 = 0x40,
    StructPad5 = 0x41,
    StructPad6 = 0x42,
    StructPad7 = 0x43,

    StringSized = 0x44,

    // Pointer layout
    NoRepeat = 0x46,
    FixedRepeat = 0x47,
    VariableRepeat = 0x48,
    FixedOffset = 0x49,
    VariableOffset = 0x4a,
    PointerLayout = 0x4b,

    EmbeddedComplex = 0x4c,

    // Procedure format string directives
    InParam = 0x4d,
    InParamBaseType = 0x4e,
    InParamNoFreeInst = 0x4f,
    InOutParam = 0x50,
    OutParam = 0x51,
    ReturnParam = 0x52,
    ReturnParamBaseType = 0x53,

    // Correlation operators
    Dereference = 0x54,
    Div2 = 0x55,
    Mult2 = 0x56,
    Add1 = 0x57,
    Sub1 = 0x58,
    Callback = 0x59,

    ConstantIid = 0x5a,
    End = 0x5b,
    Pad = 0x5c,

    UserMarshal = 0xb4,
    Pipe = 0xb5,
    Range = 0xb7,
    Int3264 = 0xb8,
    UInt3264 = 0xb9,
}

impl FormatChar {
    /// Raw byte value
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Runtime name of the format character
    pub fn name(self) -> &'static str {
        match self {
            Self::Zero => "FC_ZERO",
            Self::Byte => "FC_BYTE",
            Self::Char => "FC_CHAR",
            Self::Small => "FC_SMALL",
            Self::USmall => "FC_USMALL",
            Self::WChar => "FC_WCHAR",
            Self::Short => "FC_SHORT",
            Self::UShort => "FC_USHORT",
            Self::Long => "FC_LONG",
            Self::ULong => "FC_ULONG",
            Self::Float => "FC_FLOAT",
            Self::Hyper => "FC_HYPER",
            Self::Double => "FC_DOUBLE",
            Self::Enum16 => "FC_ENUM16",
            Self::Enum32 => "FC_ENUM32",
            Self::Ignore => "FC_IGNORE",
            Self::ErrorStatusT => "FC_ERROR_STATUS_T",
            Self::RefPointer => "FC_RP",
            Self::UniquePointer => "FC_UP",
            Self::ObjectPointer => "FC_OP",
            Self::FullPointer => "FC_FP",
            Self::Struct => "FC_STRUCT",
            Self::PStruct => "FC_PSTRUCT",
            Self::CStruct => "FC_CSTRUCT",
            Self::CPStruct => "FC_CPSTRUCT",
            Self::CVStruct => "FC_CVSTRUCT",
            Self::BogusStruct => "FC_BOGUS_STRUCT",
            Self::CArray => "FC_CARRAY",
            Self::CVArray => "FC_CVARRAY",
            Self::SmFArray => "FC_SMFARRAY",
            Self::LgFArray => "FC_LGFARRAY",
            Self::SmVArray => "FC_SMVARRAY",
            Self::LgVArray => "FC_LGVARRAY",
            Self::BogusArray => "FC_BOGUS_ARRAY",
            Self::CCString => "FC_C_CSTRING",
            Self::CSString => "FC_C_SSTRING",
            Self::CWString => "FC_C_WSTRING",
            Self::CString => "FC_CSTRING",
            Self::SString => "FC_SSTRING",
            Self::WString => "FC_WSTRING",
            Self::EncapsulatedUnion => "FC_ENCAPSULATED_UNION",
            Self::NonEncapsulatedUnion => "FC_NON_ENCAPSULATED_UNION",
            Self::ByteCountPointer => "FC_BYTE_COUNT_POINTER",
            Self::TransmitAs => "FC_TRANSMIT_AS",
            Self::RepresentAs => "FC_REPRESENT_AS",
            Self::InterfacePointer => "FC_IP",
            Self::BindContext => "FC_BIND_CONTEXT",
            Self::BindGeneric => "FC_BIND_GENERIC",
            Self::BindPrimitive => "FC_BIND_PRIMITIVE",
            Self::AutoHandle => "FC_AUTO_HANDLE",
            Self::CallbackHandle => "FC_CALLBACK_HANDLE",
            Self::Pointer => "FC_POINTER",
            Self::AlignM2 => "FC_ALIGNM2",
            Self::AlignM4 => "FC_ALIGNM4",
            Self::AlignM8 => "FC_ALIGNM8",
            Self::StructPad1 => "FC_STRUCTPAD1",
            Self::StructPad2 => "FC_STRUCTPAD2",
            Self::StructPad3 => "FC_STRUCTPAD3",
            Self::StructPad4 => "FC_STRUCTPAD4",
            Self::StructPad5 => "FC_STRUCTPAD5",
            Self::StructPad6 => "FC_STRUCTPAD6",
            Self::StructPad7 => "FC_STRUCTPAD7",
            Self::StringSized => "FC_STRING_SIZED",
            Self::NoRepeat => "FC_NO_REPEAT",
            Self::FixedRepeat => "FC_FIXED_REPEAT",
            Self::VariableRepeat => "FC_VARIABLE_REPEAT",
            Self::FixedOffset => "FC_FIXED_OFFSET",
            Self::VariableOffset => "FC_VARIABLE_OFFSET",
            Self::PointerLayout => "FC_PP",
            Self::EmbeddedComplex => "FC_EMBEDDED_COMPLEX",
            Self::InParam => "FC_IN_PARAM",
            Self::InParamBaseType => "FC_IN_PARAM_BASETYPE",
            Self::InParamNoFreeInst => "FC_IN_PARAM_NO_FREE_INST",
            Self::InOutParam => "FC_IN_OUT_PARAM",
            Self::OutParam => "FC_OUT_PARAM",
            Self::ReturnParam => "FC_RETURN_PARAM",
            Self::ReturnParamBaseType => "FC_RETURN_PARAM_BASETYPE",
            Self::Dereference => "FC_DEREFERENCE",
            Self::Div2 => "FC_DIV_2",
            Self::Mult2 => "FC_MULT_2",
            Self::Add1 => "FC_ADD_1",
            Self::Sub1 => "FC_SUB_1",
            Self::Callback => "FC_CALLBACK",
            Self::ConstantIid => "FC_CONSTANT_IID",
            Self::End => "FC_END",
            Self::Pad => "FC_PAD",
            Self::UserMarshal => "FC_USER_MARSHAL",
            Self::Pipe => "FC_PIPE",
            Self::Range => "FC_RANGE",
            Self::Int3264 => "FC_INT3264",
            Self::UInt3264 => "FC_UINT3264",
        }
    }

    /// `FC_ALIGNMn` for an interior member alignment
    pub fn align_marker(alignment: u32) -> Option<Self> {
        match alignment {
            2 => Some(Self::AlignM2),
            4 => Some(Self::AlignM4),
            8 => Some(Self::AlignM8),
            _ => None,
        }
    }

    /// `FC_STRUCTPADn` for a trailing pad of `count` bytes
    pub fn struct_pad(count: u32) -> Option<Self> {
        match count {
            1 => Some(Self::StructPad1),
            2 => Some(Self::StructPad2),
            3 => Some(Self::StructPad3),
            4 => Some(Self::StructPad4),
            5 => Some(Self::StructPad5),
            6 => Some(Self::StructPad6),
            7 => Some(Self::StructPad7),
            _ => None,
        }
    }

    /// Whether this is one of the four pointer format characters
    pub fn is_pointer(self) -> bool {
        matches!(
            self,
            Self::RefPointer | Self::UniquePointer | Self::ObjectPointer | Self::FullPointer
        )
    }
}

impl std::fmt::Display for FormatChar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Flag byte following a pointer format character
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PointerFlags: u8 {
        const ALLOCATE_ALL_NODES = 0x01;
        const DONT_FREE = 0x02;
        const ALLOCED_ON_STACK = 0x04;
        const SIMPLE_POINTER = 0x08;
        const POINTER_DEREF = 0x10;
    }
}

bitflags! {
    /// Flag byte of an `FC_BIND_CONTEXT` record
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ContextHandleFlags: u8 {
        const CANNOT_BE_NULL = 0x01;
        const SERIALIZE = 0x02;
        const NO_SERIALIZE = 0x04;
        const STRICT = 0x08;
        const IS_RETURN = 0x10;
        const IS_OUT = 0x20;
        const IS_IN = 0x40;
        const VIA_POINTER = 0x80;
    }
}

bitflags! {
    /// High bits of the `FC_USER_MARSHAL` flags/alignment byte
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UserMarshalFlags: u8 {
        const IID = 0x20;
        const REF = 0x40;
        const UNIQUE = 0x80;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_values() {
        assert_eq!(FormatChar::Long.as_u8(), 0x08);
        assert_eq!(FormatChar::CStruct.as_u8(), 0x17);
        assert_eq!(FormatChar::BogusStruct.as_u8(), 0x1a);
        assert_eq!(FormatChar::EmbeddedComplex.as_u8(), 0x4c);
        assert_eq!(FormatChar::UserMarshal.as_u8(), 0xb4);
        assert_eq!(FormatChar::End.as_u8(), 0x5b);
    }

    #[test]
    fn test_padding_markers() {
        assert_eq!(FormatChar::align_marker(4), Some(FormatChar::AlignM4));
        assert_eq!(FormatChar::align_marker(1), None);
        assert_eq!(FormatChar::struct_pad(3), Some(FormatChar::StructPad3));
        assert_eq!(FormatChar::struct_pad(8), None);
    }
}

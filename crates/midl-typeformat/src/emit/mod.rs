//! Type Format String emission
//!
//! Emitters write referenced records before the record that references them,
//! so most offsets are backward. Annotated types (structures, unions, arrays,
//! user types and constant-IID interface pointers) are written once; a
//! reference made while a type is still being written goes through a label
//! that is patched when the type's record lands.

mod array;
mod iface;
mod pointer;
mod pointer_layout;
mod string;
mod structure;
mod union;
mod user;

use crate::classify::{ClassifyFlags, Shape, UnionKind};
use crate::context::Compilation;
use crate::error::{MidlError, Result};
use crate::types::{Attribute, ParamDirection, TypeId};
use ndr_format::records::BaseTypeRecord;
use ndr_format::{FormatChar, Target};

/// Where a type is being used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Use {
    /// Member, element, arm or referent of another type
    Embedded,
    Param(ParamDirection),
    Return,
}

impl Use {
    pub fn flags(self) -> ClassifyFlags {
        match self {
            Self::Embedded => ClassifyFlags::empty(),
            Self::Param(_) | Self::Return => ClassifyFlags::TOP_LEVEL,
        }
    }

    pub fn is_top_level(self) -> bool {
        self != Self::Embedded
    }
}

impl<'a> Compilation<'a> {
    /// Emit whatever describes a use of `ty` and return where it is
    pub(crate) fn emit_type(&mut self, ty: TypeId, attrs: &[Attribute], site: Use) -> Result<Target> {
        let shape = self.env().classify(ty, attrs, site.flags())?;
        self.emit_shape(ty, attrs, shape, site)
    }

    /// Emit a use of `ty` already classified as `shape`
    pub(crate) fn emit_shape(
        &mut self,
        ty: TypeId,
        attrs: &[Attribute],
        shape: Shape,
        site: Use,
    ) -> Result<Target> {
        let resolved = self.arena.resolve(ty);
        match shape {
            Shape::UserType => self.emit_user_type(ty),
            Shape::ContextHandle => self.emit_context_handle(ty, attrs, site),
            Shape::String => self.emit_string(ty, attrs, site),
            Shape::Basic(_) | Shape::Enum(_) => {
                let fc = self.scalar_fc(shape)?;
                Ok(Target::At(self.tfs.emit(&BaseTypeRecord(fc))?))
            }
            Shape::Pointer(kind) => {
                let record = self.pointer_record(ty, attrs, kind, site)?;
                Ok(Target::At(self.tfs.emit(&record)?))
            }
            Shape::InterfacePointer => self.emit_interface_pointer(ty, attrs),
            Shape::Struct(kind) => self.emit_struct(resolved, kind),
            Shape::Union(UnionKind::Encapsulated) => self.emit_encapsulated_union(resolved),
            Shape::Union(UnionKind::NonEncapsulated) => self.emit_union_header(ty, attrs, None),
            Shape::Array(kind) => self.emit_array(resolved, kind),
            Shape::Void | Shape::Invalid => Err(MidlError::unsupported(
                self.arena.name_of(ty),
                "type has no wire representation",
            )),
        }
    }

    pub(crate) fn scalar_fc(&self, shape: Shape) -> Result<FormatChar> {
        self.env()
            .scalar_format_char(shape)
            .ok_or_else(|| MidlError::internal(format!("{:?} is not a scalar", shape)))
    }
}

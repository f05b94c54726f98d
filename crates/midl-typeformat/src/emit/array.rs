//! Array records

use super::Use;
use crate::classify::{ArrayKind, ClassifyFlags, Shape, StructKind};
use crate::context::Compilation;
use crate::error::{MidlError, Result};
use crate::types::{TypeId, TypeKind};
use ndr_format::correlation::CorrelationDesc;
use ndr_format::records::{ArrayRecord, BogusArrayRecord, Member};
use ndr_format::{FormatChar, Target};
use tracing::debug;

impl<'a> Compilation<'a> {
    /// Emit the array node `ty` (already resolved) once
    pub(crate) fn emit_array(&mut self, ty: TypeId, kind: ArrayKind) -> Result<Target> {
        if let Some(target) = self.annotated(ty) {
            return Ok(target);
        }
        let arena = self.arena;
        let TypeKind::Array(array) = &arena.get(ty).kind else {
            return Err(MidlError::internal(format!(
                "{} is not an array",
                arena.name_of(ty)
            )));
        };
        let name = arena.name_of(ty);
        let label = self.begin(ty);
        let env = self.env();
        let elem = env.memsize(array.element);

        // Declared arrays sit at the field offset; pointer-form ones are
        // reached through a pointer from the structure start
        let (structure, base) = match self.scope {
            Some(scope) if array.is_declared() => (Some(scope.structure), scope.field_offset),
            Some(scope) => (Some(scope.structure), 0),
            None => (None, 0),
        };
        let conformance = if array.is_conformant() {
            if array.size_is.is_none() {
                return Err(MidlError::unsupported(name, "conformant array without size_is"));
            }
            Some(self.write_conf(structure, base, ty, array.size_is.as_ref())?)
        } else {
            None
        };
        let variance = match &array.length_is {
            Some(expr) => Some(self.write_conf(structure, base, ty, Some(expr))?),
            None => None,
        };

        // Pointer structures list the pointers of their declared arrays in
        // their own layout; bogus structures leave them to the array
        let embedded_in_struct = match self.scope {
            Some(scope) if array.is_declared() => !matches!(
                env.classify(scope.structure, &[], ClassifyFlags::empty())?,
                Shape::Struct(StructKind::Bogus)
            ),
            _ => false,
        };
        let saved = self.scope.take();
        let element_shape = env.classify(array.element, &[], ClassifyFlags::empty())?;
        let element = match element_shape {
            shape if shape.is_scalar() => Member::Code(self.scalar_fc(shape)?),
            Shape::Pointer(pointer) if kind == ArrayKind::Bogus => Member::Pointer(
                self.pointer_record(array.element, &[], pointer, Use::Embedded)?,
            ),
            Shape::String if kind == ArrayKind::Bogus && !self.is_declared_array(array.element) => {
                Member::Pointer(self.string_pointer_record(array.element, &[], Use::Embedded)?)
            }
            // Described by the pointer layout
            Shape::Pointer(_) => Member::Code(FormatChar::Long),
            Shape::ContextHandle => {
                return Err(MidlError::unsupported(
                    name,
                    "arrays of context handles cannot be marshaled",
                ))
            }
            _ => Member::EmbeddedComplex {
                memory_pad: 0,
                target: self.emit_type(array.element, &[], Use::Embedded)?,
            },
        };

        let offset = if kind == ArrayKind::Bogus {
            self.scope = saved;
            self.tfs.emit(&BogusArrayRecord {
                alignment: elem.align,
                dim: if array.is_conformant() { 0 } else { array.dim.unwrap_or(0) },
                conformance: conformance.unwrap_or(CorrelationDesc::Absent),
                variance: variance.unwrap_or(CorrelationDesc::Absent),
                element,
            })?
        } else {
            let pointer_layout = if embedded_in_struct {
                None
            } else {
                self.array_pointer_layout(ty)?
            };
            self.scope = saved;

            let dim = array.dim.unwrap_or(0);
            let total = elem.size as u64 * dim as u64;
            let large = total > 0xffff;
            let (fc, size, varying) = match kind {
                ArrayKind::Fixed => (
                    if large { FormatChar::LgFArray } else { FormatChar::SmFArray },
                    total,
                    None,
                ),
                ArrayKind::Varying => (
                    if large { FormatChar::LgVArray } else { FormatChar::SmVArray },
                    total,
                    Some((dim, elem.size)),
                ),
                ArrayKind::Conformant => (FormatChar::CArray, elem.size as u64, None),
                ArrayKind::ConformantVarying => (FormatChar::CVArray, elem.size as u64, None),
                ArrayKind::Bogus => {
                    return Err(MidlError::internal("bogus array reached the fast array path"))
                }
            };
            let size = u32::try_from(size)
                .map_err(|_| MidlError::capacity(name, "array size", size, u32::MAX as u64))?;
            self.tfs.emit(&ArrayRecord {
                fc,
                alignment: elem.align,
                size,
                conformance,
                varying,
                variance,
                pointer_layout,
                element,
            })?
        };

        self.finish(ty, label, offset)?;
        debug!(array = name, ?kind, offset, "emitted array");
        Ok(Target::At(offset))
    }
}

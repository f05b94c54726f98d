//! Structure records
//!
//! Everything a structure references is emitted before its header, so the
//! header's offsets point backward. The one exception is the bogus pointer
//! table, which follows the header and is reached through a label.

use super::Use;
use crate::classify::{ClassifyFlags, Shape, StructKind};
use crate::context::{Compilation, Scope};
use crate::error::{MidlError, Result};
use crate::types::{TypeId, TypeKind};
use ndr_format::records::{InterfacePointerRecord, Member, PointerRecord, StructRecord};
use ndr_format::{Encode, FormatChar, FormatWriter, Target};
use tracing::{debug, trace};

/// How one member appears in the member layout
#[derive(Debug, Clone, Copy)]
enum Plan {
    Code(FormatChar),
    Complex(Target),
    /// Described by the pointer layout or the pointer table
    Pointer,
    /// Trailing conformant array, described by the header
    Trailing,
}

/// Entry of a bogus structure's pointer table
#[derive(Debug, Clone, Copy)]
enum TableEntry {
    Pointer(PointerRecord),
    Interface(InterfacePointerRecord),
}

impl Encode for TableEntry {
    fn encode(&self, w: &mut FormatWriter) -> ndr_format::Result<()> {
        match self {
            Self::Pointer(record) => record.encode(w),
            Self::Interface(record) => record.encode(w),
        }
    }
}

impl<'a> Compilation<'a> {
    /// Emit the structure node `ty` (already resolved) once
    pub(crate) fn emit_struct(&mut self, ty: TypeId, kind: StructKind) -> Result<Target> {
        if let Some(target) = self.annotated(ty) {
            return Ok(target);
        }
        let arena = self.arena;
        let name = arena.name_of(ty);
        let fields = self
            .struct_fields(ty)
            .ok_or_else(|| MidlError::internal(format!("{} is not a structure", name)))?;
        let env = self.env();
        let layout = env.memsize(ty);
        if layout.size > 0xffff {
            return Err(MidlError::capacity(name, "structure size", layout.size as u64, 0xffff));
        }
        let offsets = env.field_offsets(fields);
        let bogus = kind == StructKind::Bogus;

        let label = self.begin(ty);
        let saved = self.scope;
        debug!(structure = name, ?kind, "emitting structure");

        let mut plans = Vec::with_capacity(fields.len());
        let mut table = Vec::new();
        let mut conformant_array = None;
        for (i, (field, &offset)) in fields.iter().zip(&offsets).enumerate() {
            let last = i + 1 == fields.len();
            self.scope = Some(Scope {
                structure: ty,
                field_offset: offset,
            });
            let shape = env.classify(field.ty, &field.attrs, ClassifyFlags::empty())?;
            let declared = self.is_declared_array(field.ty);
            let plan = match shape {
                shape if shape.is_scalar() => Plan::Code(self.scalar_fc(shape)?),
                Shape::ContextHandle => {
                    return Err(MidlError::unsupported(
                        &field.name,
                        "context handles cannot be structure members",
                    ))
                }
                Shape::Void | Shape::Invalid => {
                    return Err(MidlError::unsupported(
                        &field.name,
                        "member type cannot be described",
                    ))
                }
                Shape::Pointer(pointer) => {
                    if bogus {
                        let record =
                            self.pointer_record(field.ty, &field.attrs, pointer, Use::Embedded)?;
                        table.push(TableEntry::Pointer(record));
                    }
                    Plan::Pointer
                }
                Shape::String if !declared => {
                    if bogus {
                        let record =
                            self.string_pointer_record(field.ty, &field.attrs, Use::Embedded)?;
                        table.push(TableEntry::Pointer(record));
                    }
                    Plan::Pointer
                }
                Shape::InterfacePointer => {
                    let record = self.interface_pointer_record(field.ty, &field.attrs)?;
                    table.push(TableEntry::Interface(record));
                    Plan::Pointer
                }
                Shape::String | Shape::Array(_) if declared && self.is_conformant_array(field.ty) => {
                    // Conformance is measured from the end of the structure
                    self.scope = Some(Scope {
                        structure: ty,
                        field_offset: layout.size,
                    });
                    conformant_array =
                        Some(self.emit_shape(field.ty, &field.attrs, shape, Use::Embedded)?);
                    Plan::Trailing
                }
                Shape::Struct(_) => {
                    let target = self.emit_shape(field.ty, &field.attrs, shape, Use::Embedded)?;
                    if last {
                        conformant_array = self.conformant_arrays.get(&arena.resolve(field.ty)).copied();
                    }
                    Plan::Complex(target)
                }
                _ => Plan::Complex(self.emit_shape(field.ty, &field.attrs, shape, Use::Embedded)?),
            };
            plans.push(plan);
        }
        self.scope = saved;

        let pointer_layout = match kind {
            StructKind::Pointer | StructKind::ConformantPointer | StructKind::ConformantVarying => {
                let layout = self.struct_pointer_layout(ty)?;
                (!layout.is_empty()).then_some(layout)
            }
            _ => None,
        };

        let mut members = Vec::with_capacity(plans.len());
        let mut position = 0;
        for ((plan, field), &offset) in plans.iter().zip(fields).zip(&offsets) {
            let member = match *plan {
                Plan::Trailing => continue,
                Plan::Code(fc) => Member::Code(fc),
                Plan::Complex(target) => Member::EmbeddedComplex {
                    memory_pad: 0,
                    target,
                },
                Plan::Pointer if bogus => Member::Code(FormatChar::Pointer),
                Plan::Pointer => Member::Code(FormatChar::Long),
            };
            let field_layout = env.memsize(field.ty);
            if offset > position {
                match FormatChar::align_marker(field_layout.align) {
                    Some(marker) => members.push(Member::Code(marker)),
                    None => members.push(Member::Code(struct_pad(name, offset - position)?)),
                }
            }
            members.push(member);
            position = offset + field_layout.size;
        }
        if layout.size > position && !plans.iter().any(|p| matches!(p, Plan::Trailing)) {
            members.push(Member::Code(struct_pad(name, layout.size - position)?));
        }

        let table_label = bogus.then(|| self.tfs.new_label());
        let record = StructRecord {
            fc: kind.format_char(),
            alignment: layout.align,
            memory_size: layout.size,
            conformant_array,
            pointer_table: table_label.map(Target::Label),
            pointer_layout,
            members,
        };
        let offset = self.tfs.emit(&record)?;

        if let Some(table_label) = table_label {
            if table.is_empty() {
                self.tfs.bind_null(table_label)?;
            } else {
                let start = self.tfs.offset();
                self.tfs.bind(table_label, start)?;
                for entry in &table {
                    self.tfs.emit(entry)?;
                }
                trace!(structure = name, start, entries = table.len(), "pointer table");
            }
        }

        self.finish(ty, label, offset)?;
        if let Some(target) = conformant_array {
            self.conformant_arrays.insert(ty, target);
        }
        debug!(structure = name, offset, "emitted structure");
        Ok(Target::At(offset))
    }

    pub(crate) fn is_conformant_array(&self, ty: TypeId) -> bool {
        matches!(
            &self.arena.get(self.arena.resolve(ty)).kind,
            TypeKind::Array(array) if array.is_conformant()
        )
    }
}

fn struct_pad(name: &str, count: u32) -> Result<FormatChar> {
    FormatChar::struct_pad(count)
        .ok_or_else(|| MidlError::internal(format!("{} needs {} bytes of padding", name, count)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::types::{Attribute, BasicType, Field, TypeArena};
    use crate::CompileOptions;
    use pretty_assertions::assert_eq;

    fn emit(arena: &TypeArena, ty: TypeId) -> Vec<u8> {
        let mut c = Compilation::new(arena, CompileOptions::x86());
        c.emit_type(ty, &[], Use::Embedded).unwrap();
        c.tfs.as_bytes()[1..].to_vec()
    }

    #[test]
    fn test_conformant_struct() {
        let mut arena = TypeArena::new();
        let long = arena.basic(BasicType::Long);
        let ch = arena.basic(BasicType::Char);
        let data = arena.conformant_array(ch, Expr::ident("count"));
        let s = arena.structure(
            "s",
            vec![Field::new("count", long), Field::new("data", data)],
        );
        assert_eq!(
            emit(&arena, s),
            vec![
                0x1b, 0x00, 0x01, 0x00, 0x08, 0x00, 0xfc, 0xff, 0x02, 0x5b, // FC_CARRAY
                0x17, 0x03, 0x04, 0x00, 0xf2, 0xff, 0x08, 0x5b, // FC_CSTRUCT
            ]
        );
    }

    #[test]
    fn test_self_referential_pointer_struct() {
        let mut arena = TypeArena::new();
        let long = arena.basic(BasicType::Long);
        let node = arena.declare_struct("node");
        let next = arena.pointer(node, vec![]);
        arena.define_struct(node, vec![Field::new("v", long), Field::new("next", next)]);
        assert_eq!(
            emit(&arena, node),
            vec![
                0x16, 0x03, 0x08, 0x00, // FC_PSTRUCT
                0x4b, 0x5c, 0x46, 0x5c, 0x04, 0x00, 0x04, 0x00, // no repeat at 4
                0x12, 0x00, 0xf2, 0xff, // unique pointer back to the struct
                0x5b, 0x08, 0x08, 0x5b,
            ]
        );
    }

    #[test]
    fn test_bogus_pointer_table() {
        let mut arena = TypeArena::new();
        let long = arena.basic(BasicType::Long);
        let p = arena.pointer(long, vec![Attribute::Ref]);
        let s = arena.structure("s", vec![Field::new("a", long), Field::new("p", p)]);
        assert_eq!(
            emit(&arena, s),
            vec![
                0x1a, 0x03, 0x08, 0x00, 0x00, 0x00, 0x05, 0x00, // header, table at +5
                0x08, 0x36, 0x5b, // members
                0x11, 0x08, 0x08, 0x5c, // pointer table
            ]
        );
    }

    #[test]
    fn test_bogus_struct_with_pointer_array() {
        let mut arena = TypeArena::new();
        let long = arena.basic(BasicType::Long);
        let e = arena.enumeration("color", vec![("red", 0), ("green", 1)], vec![]);
        let p = arena.pointer(long, vec![Attribute::Unique]);
        let arr = arena.fixed_array(p, 2);
        let s = arena.structure("s", vec![Field::new("e", e), Field::new("arr", arr)]);
        assert_eq!(
            emit(&arena, s),
            vec![
                0x1d, 0x03, 0x08, 0x00, // FC_SMFARRAY, 8 bytes
                0x4b, 0x5c, 0x47, 0x5c, 0x02, 0x00, 0x04, 0x00, 0x00, 0x00, 0x01, 0x00,
                0x00, 0x00, 0x00, 0x00, 0x12, 0x08, 0x08, 0x5c, 0x5b, // pointer layout
                0x08, 0x5b,
                0x1a, 0x03, 0x0c, 0x00, 0x00, 0x00, 0x00, 0x00, // FC_BOGUS_STRUCT, no table
                0x0d, 0x4c, 0x00, 0xda, 0xff, 0x5b,
            ]
        );
    }

    #[test]
    fn test_bogus_struct_with_pointer_struct() {
        let mut arena = TypeArena::new();
        let long = arena.basic(BasicType::Long);
        let e = arena.enumeration("color", vec![("red", 0), ("green", 1)], vec![]);
        let p = arena.pointer(long, vec![Attribute::Unique]);
        let inner = arena.structure("inner", vec![Field::new("p", p)]);
        let outer = arena.structure("outer", vec![Field::new("e", e), Field::new("i", inner)]);
        assert_eq!(
            emit(&arena, outer),
            vec![
                0x16, 0x03, 0x04, 0x00, // FC_PSTRUCT
                0x4b, 0x5c, 0x46, 0x5c, 0x00, 0x00, 0x00, 0x00, 0x12, 0x08, 0x08, 0x5c, 0x5b,
                0x08, 0x5b,
                0x1a, 0x03, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00, // FC_BOGUS_STRUCT, no table
                0x0d, 0x4c, 0x00, 0xe2, 0xff, 0x5b,
            ]
        );
    }

    #[test]
    fn test_alignment_and_trailing_padding() {
        let mut arena = TypeArena::new();
        let ch = arena.basic(BasicType::Char);
        let long = arena.basic(BasicType::Long);
        let lead = arena.structure("lead", vec![Field::new("c", ch), Field::new("l", long)]);
        let tail = arena.structure("tail", vec![Field::new("l", long), Field::new("c", ch)]);
        assert_eq!(
            emit(&arena, lead),
            vec![0x15, 0x03, 0x08, 0x00, 0x02, 0x38, 0x08, 0x5b]
        );
        assert_eq!(
            emit(&arena, tail),
            vec![0x15, 0x03, 0x08, 0x00, 0x08, 0x02, 0x3f, 0x5b]
        );
    }

    #[test]
    fn test_nested_struct_is_referenced() {
        let mut arena = TypeArena::new();
        let short = arena.basic(BasicType::Short);
        let inner = arena.structure("inner", vec![Field::new("a", short)]);
        let outer = arena.structure("outer", vec![Field::new("x", inner), Field::new("y", inner)]);
        let mut c = Compilation::new(&arena, CompileOptions::x86());
        c.emit_type(outer, &[], Use::Embedded).unwrap();
        assert_eq!(c.type_offset(inner), Some(1));
        assert_eq!(
            &c.tfs.as_bytes()[1..],
            &[
                0x15, 0x01, 0x02, 0x00, 0x06, 0x5b, // inner
                0x15, 0x01, 0x04, 0x00, 0x4c, 0x00, 0xf4, 0xff, 0x4c, 0x00, 0xf0, 0xff, 0x5b,
            ]
        );
    }

    #[test]
    fn test_context_handle_member_rejected() {
        let mut arena = TypeArena::new();
        let void = arena.void();
        let vp = arena.pointer(void, vec![]);
        let ctx = arena.alias("ctx_t", vp, vec![Attribute::ContextHandle]);
        let s = arena.structure("s", vec![Field::new("h", ctx)]);
        let mut c = Compilation::new(&arena, CompileOptions::x86());
        let err = c.emit_type(s, &[], Use::Embedded).unwrap_err();
        assert!(err.to_string().contains("h"));
    }
}

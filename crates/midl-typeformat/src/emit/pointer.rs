//! Pointer and context handle records

use super::Use;
use crate::classify::{ClassifyFlags, Shape, UnionKind};
use crate::context::Compilation;
use crate::error::{MidlError, Result};
use crate::types::{ArrayForm, Attribute, ParamDirection, PointerKind, TypeId, TypeKind};
use ndr_format::records::{ContextHandleRecord, PointerRecord};
use ndr_format::{ContextHandleFlags, PointerFlags, Target};

impl<'a> Compilation<'a> {
    /// Describe a pointer use, emitting its referent first
    pub(crate) fn pointer_record(
        &mut self,
        ty: TypeId,
        attrs: &[Attribute],
        kind: PointerKind,
        site: Use,
    ) -> Result<PointerRecord> {
        let arena = self.arena;
        let resolved = arena.resolve(ty);
        let pointer = kind.format_char();
        let mut flags = self.pointer_flags(kind, site);

        match &arena.get(resolved).kind {
            TypeKind::Pointer(referent) => {
                let referent = *referent;
                // Attributes that describe the pointee rather than the pointer
                let referent_attrs: Vec<Attribute> = attrs
                    .iter()
                    .filter(|a| {
                        matches!(
                            a,
                            Attribute::IidIs(_) | Attribute::SwitchIs(_) | Attribute::SwitchType(_)
                        )
                    })
                    .cloned()
                    .collect();
                let shape = self
                    .env()
                    .classify(referent, &referent_attrs, ClassifyFlags::empty())?;
                if shape.is_scalar() {
                    return Ok(PointerRecord::Simple {
                        pointer,
                        flags,
                        base: self.scalar_fc(shape)?,
                    });
                }
                if points_to_pointer(arena, referent) || shape == Shape::InterfacePointer {
                    flags |= PointerFlags::POINTER_DEREF;
                }
                let target = match shape {
                    Shape::Union(UnionKind::NonEncapsulated) => {
                        self.emit_union_header(referent, &referent_attrs, Some(ty))?
                    }
                    _ => self.emit_shape(referent, &referent_attrs, shape, Use::Embedded)?,
                };
                Ok(PointerRecord::Referent {
                    pointer,
                    flags,
                    target,
                })
            }
            TypeKind::Array(array) if array.form == ArrayForm::Pointer => {
                let array_kind = self.env().array_kind(array)?;
                let target = self.emit_array(resolved, array_kind)?;
                Ok(PointerRecord::Referent {
                    pointer,
                    flags,
                    target,
                })
            }
            _ => Err(MidlError::internal(format!(
                "{} is not a pointer",
                arena.name_of(ty)
            ))),
        }
    }

    /// Flags every pointer-shaped record at `site` carries
    pub(crate) fn pointer_flags(&self, kind: PointerKind, site: Use) -> PointerFlags {
        if kind == PointerKind::Ref && site == Use::Param(ParamDirection::Out) {
            PointerFlags::ALLOCED_ON_STACK
        } else {
            PointerFlags::empty()
        }
    }

    pub(crate) fn emit_context_handle(
        &mut self,
        ty: TypeId,
        attrs: &[Attribute],
        site: Use,
    ) -> Result<Target> {
        let env = self.env();
        let mut flags = ContextHandleFlags::empty();
        if env.is_context_handle_via_pointer(ty) {
            flags |= ContextHandleFlags::VIA_POINTER;
        }
        if env.is_strict_context_handle(ty, attrs) {
            flags |= ContextHandleFlags::STRICT;
        }
        match site {
            Use::Param(direction) => {
                if direction.is_in() {
                    flags |= ContextHandleFlags::IS_IN;
                }
                if direction.is_out() {
                    flags |= ContextHandleFlags::IS_OUT;
                }
                if direction == ParamDirection::In {
                    flags |= ContextHandleFlags::CANNOT_BE_NULL;
                }
            }
            Use::Return => flags |= ContextHandleFlags::IS_RETURN,
            Use::Embedded => {
                return Err(MidlError::unsupported(
                    self.arena.name_of(ty),
                    "context handles can only be parameters or return values",
                ))
            }
        }
        Ok(Target::At(self.tfs.emit(&ContextHandleRecord { flags })?))
    }
}

fn points_to_pointer(arena: &crate::types::TypeArena, referent: TypeId) -> bool {
    match &arena.get(arena.resolve(referent)).kind {
        TypeKind::Pointer(_) => true,
        TypeKind::Array(array) => array.form == ArrayForm::Pointer,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BasicType, TypeArena};
    use crate::CompileOptions;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_out_pointer_to_scalar() {
        let mut arena = TypeArena::new();
        let long = arena.basic(BasicType::Long);
        let p = arena.pointer(long, vec![]);
        let mut c = Compilation::new(&arena, CompileOptions::x86());
        let record = c
            .pointer_record(p, &[], PointerKind::Ref, Use::Param(ParamDirection::Out))
            .unwrap();
        c.tfs.emit(&record).unwrap();
        assert_eq!(&c.tfs.as_bytes()[1..], &[0x11, 0x0c, 0x08, 0x5c]);
    }

    #[test]
    fn test_pointer_to_pointer_dereferences() {
        let mut arena = TypeArena::new();
        let long = arena.basic(BasicType::Long);
        let inner = arena.pointer(long, vec![Attribute::Unique]);
        let outer = arena.pointer(inner, vec![]);
        let mut c = Compilation::new(&arena, CompileOptions::x86());
        let target = c
            .emit_type(outer, &[], Use::Param(ParamDirection::In))
            .unwrap();
        // Referent first, then the outer pointer pointing back at it
        assert_eq!(target, Target::At(5));
        assert_eq!(
            &c.tfs.as_bytes()[1..],
            &[0x12, 0x08, 0x08, 0x5c, 0x11, 0x10, 0xfa, 0xff]
        );
    }

    #[test]
    fn test_context_handle_flags() {
        let mut arena = TypeArena::new();
        let void = arena.void();
        let vp = arena.pointer(void, vec![]);
        let ctx = arena.alias("ctx_t", vp, vec![Attribute::ContextHandle]);
        let out = arena.pointer(ctx, vec![]);
        let mut c = Compilation::new(&arena, CompileOptions::x86());

        c.emit_type(ctx, &[], Use::Param(ParamDirection::In)).unwrap();
        c.emit_type(out, &[], Use::Param(ParamDirection::Out)).unwrap();
        c.emit_type(ctx, &[], Use::Return).unwrap();
        assert_eq!(
            &c.tfs.as_bytes()[1..],
            &[
                0x30, 0x41, 0, 0, // in: IS_IN | CANNOT_BE_NULL
                0x30, 0xa0, 0, 0, // out via pointer
                0x30, 0x10, 0, 0, // return
            ]
        );

        let err = c.emit_type(ctx, &[], Use::Embedded).unwrap_err();
        assert!(matches!(err, MidlError::Unsupported { .. }));
    }
}

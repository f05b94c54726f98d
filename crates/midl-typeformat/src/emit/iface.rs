//! Interface pointer records

use crate::context::Compilation;
use crate::error::{MidlError, Result};
use crate::types::{Attribute, TypeId, TypeKind};
use ndr_format::records::InterfacePointerRecord;
use ndr_format::Target;

impl<'a> Compilation<'a> {
    /// Interface the pointer `ty` points at, if it points at one
    fn pointee_interface(&self, ty: TypeId) -> Option<TypeId> {
        let arena = self.arena;
        match arena.get(arena.resolve(ty)).kind {
            TypeKind::Pointer(referent) => {
                let referent = arena.resolve(referent);
                matches!(arena.get(referent).kind, TypeKind::Interface { .. }).then_some(referent)
            }
            _ => None,
        }
    }

    pub(crate) fn interface_pointer_record(
        &mut self,
        ty: TypeId,
        attrs: &[Attribute],
    ) -> Result<InterfacePointerRecord> {
        let arena = self.arena;
        let iid_is = Attribute::get_iid_is(attrs).or_else(|| {
            arena
                .alias_chain(ty)
                .find_map(|(_, node)| Attribute::get_iid_is(&node.attrs))
        });
        if let Some(expr) = iid_is {
            let structure = self.scope.map(|scope| scope.structure);
            return Ok(InterfacePointerRecord::IidIs(
                self.write_conf(structure, 0, ty, Some(expr))?,
            ));
        }
        self.pointee_interface(ty)
            .and_then(|iface| Attribute::get_uuid(&arena.get(iface).attrs))
            .map(InterfacePointerRecord::Constant)
            .ok_or_else(|| {
                MidlError::unsupported(
                    arena.name_of(ty),
                    "interface pointer needs iid_is or an interface with a uuid",
                )
            })
    }

    /// Emit an interface pointer; constant-IID records are shared per
    /// interface
    pub(crate) fn emit_interface_pointer(&mut self, ty: TypeId, attrs: &[Attribute]) -> Result<Target> {
        let record = self.interface_pointer_record(ty, attrs)?;
        match (record, self.pointee_interface(ty)) {
            (InterfacePointerRecord::Constant(_), Some(iface)) => {
                if let Some(target) = self.annotated(iface) {
                    return Ok(target);
                }
                let offset = self.tfs.emit(&record)?;
                self.done(iface, offset);
                Ok(Target::At(offset))
            }
            _ => Ok(Target::At(self.tfs.emit(&record)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::Use;
    use crate::expr::Expr;
    use crate::types::{BasicType, Field, ParamDirection, TypeArena};
    use crate::CompileOptions;
    use ndr_format::Guid;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_constant_iid_is_shared() {
        let mut arena = TypeArena::new();
        let guid = Guid::parse("00000000-0000-0000-c000-000000000046").unwrap();
        let unknown = arena.interface("IUnknown", None, vec![Attribute::Uuid(guid)]);
        let p = arena.pointer(unknown, vec![]);
        let mut c = Compilation::new(&arena, CompileOptions::x86());
        let first = c.emit_type(p, &[], Use::Param(ParamDirection::In)).unwrap();
        let second = c.emit_type(p, &[], Use::Param(ParamDirection::Out)).unwrap();
        assert_eq!(first, Target::At(1));
        assert_eq!(second, first);
        assert_eq!(
            &c.tfs.as_bytes()[1..],
            &[
                0x2f, 0x5a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xc0, 0x00, 0x00,
                0x00, 0x00, 0x00, 0x00, 0x46,
            ]
        );
    }

    #[test]
    fn test_iid_is_in_structure() {
        let mut arena = TypeArena::new();
        let long = arena.basic(BasicType::Long);
        let void = arena.void();
        let riid = arena.pointer(long, vec![]);
        let obj = arena.pointer(void, vec![]);
        let s = arena.structure(
            "s",
            vec![
                Field::new("riid", riid),
                Field::new("obj", obj).with_attrs(vec![Attribute::IidIs(Expr::ident("riid"))]),
            ],
        );
        let mut c = Compilation::new(&arena, CompileOptions::x86());
        c.emit_type(s, &[], Use::Embedded).unwrap();
        assert_eq!(
            &c.tfs.as_bytes()[1..],
            &[
                0x1a, 0x03, 0x08, 0x00, 0x00, 0x00, 0x05, 0x00, 0x36, 0x36, 0x5b,
                0x12, 0x08, 0x08, 0x5c, // riid
                0x2f, 0x5c, 0x18, 0x00, 0x00, 0x00, // obj, inline
            ]
        );
    }

    #[test]
    fn test_missing_iid() {
        let mut arena = TypeArena::new();
        let iface = arena.interface("INoUuid", None, vec![]);
        let p = arena.pointer(iface, vec![]);
        let mut c = Compilation::new(&arena, CompileOptions::x86());
        let err = c.emit_type(p, &[], Use::Param(ParamDirection::In)).unwrap_err();
        assert!(matches!(err, MidlError::Unsupported { .. }));
    }
}

//! User-marshaled (`[wire_marshal]`) type records

use super::Use;
use crate::classify::{ClassifyFlags, Shape};
use crate::context::Compilation;
use crate::error::{MidlError, Result};
use crate::types::{PointerKind, TypeId, TypeKind};
use ndr_format::records::{BaseTypeRecord, PointerRecord, UserMarshalRecord};
use ndr_format::{Target, UserMarshalFlags};
use tracing::debug;

impl<'a> Compilation<'a> {
    /// Emit the user type `ty` once per `[wire_marshal]` alias
    pub(crate) fn emit_user_type(&mut self, ty: TypeId) -> Result<Target> {
        let arena = self.arena;
        let env = self.env();
        let (alias, wire) = env.user_type(ty).ok_or_else(|| {
            MidlError::internal(format!("{} is not a user type", arena.name_of(ty)))
        })?;
        if let Some(target) = self.annotated(alias) {
            return Ok(target);
        }
        let name = arena.name_of(alias);
        let label = self.begin(alias);
        let routine = self.user_types.register(name);

        let wire_shape = env.classify(wire, &[], ClassifyFlags::empty())?;
        let (flags, target) = match wire_shape {
            shape if shape.is_scalar() => (
                UserMarshalFlags::empty(),
                self.emit_shape(wire, &[], shape, Use::Embedded)?,
            ),
            Shape::Pointer(kind) => {
                let flags = match kind {
                    PointerKind::Ref => UserMarshalFlags::REF,
                    PointerKind::Unique => UserMarshalFlags::UNIQUE,
                    PointerKind::Full => UserMarshalFlags::empty(),
                };
                (flags, self.emit_wire_pointee(wire, kind)?)
            }
            shape => (
                UserMarshalFlags::empty(),
                self.emit_shape(wire, &[], shape, Use::Embedded)?,
            ),
        };

        let memory = env.memsize(alias);
        let record = UserMarshalRecord {
            flags,
            alignment: memory.align,
            routine,
            memory_size: memory.size,
            wire_size: env.memsize(wire).size,
            wire: target,
        };
        let offset = self.tfs.emit(&record)?;
        self.finish(alias, label, offset)?;
        debug!(user_type = name, routine, offset, "emitted user type");
        Ok(Target::At(offset))
    }

    /// What a pointer wire type points at; the pointer itself is folded
    /// into the user marshal flags
    fn emit_wire_pointee(&mut self, wire: TypeId, kind: PointerKind) -> Result<Target> {
        let arena = self.arena;
        match arena.get(arena.resolve(wire)).kind {
            TypeKind::Pointer(referent) => {
                let shape = self.env().classify(referent, &[], ClassifyFlags::empty())?;
                if shape.is_scalar() {
                    let fc = self.scalar_fc(shape)?;
                    Ok(Target::At(self.tfs.emit(&BaseTypeRecord(fc))?))
                } else {
                    self.emit_shape(referent, &[], shape, Use::Embedded)
                }
            }
            // Pointer-form array: the array record is the pointee
            _ => {
                let record = self.pointer_record(wire, &[], kind, Use::Embedded)?;
                match record {
                    PointerRecord::Referent { target, .. } => Ok(target),
                    _ => Err(MidlError::internal(format!(
                        "wire type of {} has no pointee record",
                        arena.name_of(wire)
                    ))),
                }
            }
        }
    }
}

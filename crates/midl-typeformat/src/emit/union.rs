//! Union records

use super::Use;
use crate::classify::{ClassifyFlags, Shape};
use crate::context::Compilation;
use crate::error::{MidlError, Result};
use crate::expr::Expr;
use crate::layout::align_up;
use crate::types::{Attribute, TypeId, TypeKind, UnionArm};
use ndr_format::records::{
    ArmDesc, EncapsulatedUnionRecord, NonEncapsulatedUnionRecord, UnionArms,
};
use ndr_format::{FormatChar, Target};
use tracing::debug;

fn is_integer_switch(fc: FormatChar) -> bool {
    matches!(
        fc,
        FormatChar::Byte
            | FormatChar::Char
            | FormatChar::Small
            | FormatChar::USmall
            | FormatChar::WChar
            | FormatChar::Short
            | FormatChar::UShort
            | FormatChar::Long
            | FormatChar::ULong
            | FormatChar::Enum16
            | FormatChar::Enum32
    )
}

impl<'a> Compilation<'a> {
    /// Arm table of a union. Arms are described without a correlation
    /// scope: their members cannot name the union's siblings.
    fn union_arms(&mut self, name: &str, arms: &[UnionArm], memory_size: u32) -> Result<UnionArms> {
        let saved = self.scope.take();
        let mut table = UnionArms {
            memory_size,
            arms: Vec::new(),
            default: None,
        };
        for arm in arms {
            let desc = match &arm.field {
                None => ArmDesc::Empty,
                Some(field) => {
                    let shape = self
                        .env()
                        .classify(field.ty, &field.attrs, ClassifyFlags::empty())?;
                    if shape.is_scalar() {
                        ArmDesc::Scalar(self.scalar_fc(shape)?)
                    } else {
                        ArmDesc::Complex(self.emit_shape(field.ty, &field.attrs, shape, Use::Embedded)?)
                    }
                }
            };
            for case in &arm.cases {
                let value = case.const_value().ok_or_else(|| {
                    MidlError::unsupported(name, format!("case label {} is not constant", case))
                })?;
                let label = u32::try_from(value)
                    .or_else(|_| i32::try_from(value).map(|v| v as u32))
                    .map_err(|_| {
                        MidlError::capacity(name, "case label", value.unsigned_abs(), u32::MAX as u64)
                    })?;
                table.arms.push((label, desc));
            }
            if arm.is_default {
                table.default = Some(desc);
            }
        }
        self.scope = saved;
        Ok(table)
    }

    fn switch_fc(&self, name: &str, ty: TypeId) -> Result<FormatChar> {
        let shape = self.env().classify(ty, &[], ClassifyFlags::empty())?;
        match self.env().scalar_format_char(shape) {
            Some(fc) if is_integer_switch(fc) => Ok(fc),
            _ => Err(MidlError::unsupported(name, "switch type is not an integer")),
        }
    }

    /// Emit the encapsulated union node `ty` (already resolved) once
    pub(crate) fn emit_encapsulated_union(&mut self, ty: TypeId) -> Result<Target> {
        if let Some(target) = self.annotated(ty) {
            return Ok(target);
        }
        let arena = self.arena;
        let name = arena.name_of(ty);
        let TypeKind::EncapsulatedUnion { switch, arms } = &arena.get(ty).kind else {
            return Err(MidlError::internal(format!(
                "{} is not an encapsulated union",
                name
            )));
        };
        let label = self.begin(ty);
        let env = self.env();
        let switch_type = self.switch_fc(name, switch.ty)?;
        let arms_layout = env.arms_layout(arms, &mut Vec::new());
        let memory_increment = align_up(env.memsize(switch.ty).size, arms_layout.align);

        let arms = self.union_arms(name, arms, arms_layout.size)?;
        let offset = self.tfs.emit(&EncapsulatedUnionRecord {
            switch_type,
            memory_increment,
            arms,
        })?;
        self.finish(ty, label, offset)?;
        debug!(union = name, offset, "emitted encapsulated union");
        Ok(Target::At(offset))
    }

    /// Arm table of a non-encapsulated union, shared by every use
    fn emit_union_arms(&mut self, ty: TypeId) -> Result<Target> {
        if let Some(target) = self.annotated(ty) {
            return Ok(target);
        }
        let arena = self.arena;
        let name = arena.name_of(ty);
        let TypeKind::Union(arms) = &arena.get(ty).kind else {
            return Err(MidlError::internal(format!("{} is not a union", name)));
        };
        let label = self.begin(ty);
        let size = self.env().memsize(ty).size;
        let table = self.union_arms(name, arms, size)?;
        let offset = self.tfs.emit(&table)?;
        self.finish(ty, label, offset)?;
        debug!(union = name, offset, "emitted union arms");
        Ok(Target::At(offset))
    }

    /// Per-use header of a non-encapsulated union; `pointer` is the pointer
    /// the union is reached through, if any
    pub(crate) fn emit_union_header(
        &mut self,
        ty: TypeId,
        attrs: &[Attribute],
        pointer: Option<TypeId>,
    ) -> Result<Target> {
        let arena = self.arena;
        let name = arena.name_of(ty);
        let switch_is = Attribute::get_switch_is(attrs)
            .ok_or_else(|| MidlError::unsupported(name, "union use without switch_is"))?;
        let switch_ty = match Attribute::get_switch_type(attrs).or_else(|| {
            arena
                .alias_chain(ty)
                .find_map(|(_, node)| Attribute::get_switch_type(&node.attrs))
        }) {
            Some(switch_ty) => switch_ty,
            None => self.switch_is_type(name, switch_is)?,
        };
        let switch_type = self.switch_fc(name, switch_ty)?;

        let resolved = arena.resolve(ty);
        let switch_is = match (self.scope, pointer) {
            (Some(scope), Some(pointer)) => {
                self.write_conf(Some(scope.structure), 0, pointer, Some(switch_is))?
            }
            (Some(scope), None) => {
                self.write_conf(Some(scope.structure), scope.field_offset, ty, Some(switch_is))?
            }
            (None, _) => self.write_conf(None, 0, ty, Some(switch_is))?,
        };
        let arms = self.emit_union_arms(resolved)?;
        let offset = self.tfs.emit(&NonEncapsulatedUnionRecord {
            switch_type,
            switch_is,
            arms,
        })?;
        Ok(Target::At(offset))
    }

    /// Type of the identifier a `switch_is` names: a sibling field inside a
    /// structure, a parameter at top level
    fn switch_is_type(&self, name: &str, switch_is: &Expr) -> Result<TypeId> {
        let arena = self.arena;
        let ident = match switch_is.simple_form() {
            Some((ident, _)) => ident,
            None => {
                return Err(MidlError::unsupported(
                    name,
                    format!("cannot infer the switch type of {}", switch_is),
                ))
            }
        };
        let found = match (self.scope, self.function) {
            (Some(scope), _) => self
                .struct_fields(scope.structure)
                .and_then(|fields| fields.iter().find(|f| f.name == ident))
                .map(|f| f.ty),
            (None, Some(function)) => match &arena.get(function).kind {
                TypeKind::Function(func) => func
                    .params
                    .iter()
                    .find(|p| p.name == ident)
                    .map(|p| p.ty),
                _ => None,
            },
            (None, None) => None,
        };
        found.ok_or_else(|| {
            MidlError::unsupported(name, format!("switch_is names unknown identifier {}", ident))
        })
    }
}

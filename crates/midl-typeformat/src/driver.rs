//! Interface and procedure drivers

use crate::classify::{ClassifyFlags, Shape};
use crate::context::{Compilation, CompiledFunction, ParamRecord, ParamSlot};
use crate::emit::Use;
use crate::error::{MidlError, Result};
use crate::types::{Attribute, ParamDirection, TypeId, TypeKind, TypeNode};
use ndr_format::procformat::{EndOfProcedure, ParamDirection as ProcDirection, ParamDirective};
use ndr_format::{FormatWriter, Target};
use tracing::{debug, info};

impl From<ParamDirection> for ProcDirection {
    fn from(direction: ParamDirection) -> Self {
        match direction {
            ParamDirection::In => Self::In,
            ParamDirection::Out => Self::Out,
            ParamDirection::InOut => Self::InOut,
        }
    }
}

impl<'a> Compilation<'a> {
    /// Compile every non-local function of the interfaces in `statements`
    /// that `predicate` selects, in declaration order
    pub fn compile<P>(&mut self, statements: &[TypeId], predicate: P) -> Result<()>
    where
        P: Fn(&TypeNode) -> bool,
    {
        self.reset();
        let arena = self.arena;
        for &statement in statements {
            let node = arena.get(statement);
            match &node.kind {
                TypeKind::Interface { functions, .. } => {
                    if !predicate(node) {
                        continue;
                    }
                    if Attribute::has(&node.attrs, &Attribute::Local) {
                        debug!(interface = node.display_name(), "skipping local interface");
                        continue;
                    }
                    self.compile_interface(statement, functions)?;
                }
                TypeKind::Module(_) | TypeKind::Coclass(_) => {
                    debug!(statement = node.display_name(), "no procedures to describe");
                }
                _ => {}
            }
        }

        let tfs = std::mem::replace(&mut self.tfs, FormatWriter::new());
        let pending = tfs.pending_fixups();
        if pending != 0 {
            return Err(MidlError::internal(format!(
                "{} type references were never resolved",
                pending
            )));
        }
        self.type_format_string = tfs.finish()?;
        self.proc_format_string = std::mem::replace(&mut self.pfs, FormatWriter::new()).finish()?;
        info!(
            functions = self.functions.len(),
            tfs = self.type_format_string.len(),
            pfs = self.proc_format_string.len(),
            "compilation finished"
        );
        Ok(())
    }

    fn compile_interface(&mut self, iface: TypeId, functions: &[TypeId]) -> Result<()> {
        let arena = self.arena;
        let node = arena.get(iface);
        self.pointer_default =
            Attribute::get_pointer_default(&node.attrs).unwrap_or(self.options.pointer_default);
        debug!(
            interface = node.display_name(),
            pointer_default = ?self.pointer_default,
            "compiling interface"
        );
        for &function in functions {
            if Attribute::has(&arena.get(function).attrs, &Attribute::Local) {
                continue;
            }
            self.compile_function(iface, function)?;
        }
        Ok(())
    }

    fn compile_function(&mut self, iface: TypeId, function: TypeId) -> Result<()> {
        let arena = self.arena;
        let node = arena.get(function);
        let name = node.display_name();
        let TypeKind::Function(func) = &node.kind else {
            return Err(MidlError::internal(format!("{} is not a function", name)));
        };
        self.function = Some(function);
        let env = self.env();

        let mut records = Vec::with_capacity(func.params.len() + 1);
        let ret_shape = env.classify(func.ret, &node.attrs, ClassifyFlags::TOP_LEVEL)?;
        if ret_shape != Shape::Void {
            let type_offset = self.emit_top_level(func.ret, &node.attrs, ret_shape, Use::Return)?;
            records.push(ParamRecord {
                function,
                slot: ParamSlot::Return,
                shape: ret_shape,
                type_offset,
            });
        }
        for (i, param) in func.params.iter().enumerate() {
            let direction = param.direction();
            if Attribute::has(&param.attrs, &Attribute::Retval) && !direction.is_out() {
                return Err(MidlError::unsupported(
                    &param.name,
                    "[retval] parameter must be [out]",
                ));
            }
            let shape = env.classify(param.ty, &param.attrs, ClassifyFlags::TOP_LEVEL)?;
            let type_offset =
                self.emit_top_level(param.ty, &param.attrs, shape, Use::Param(direction))?;
            records.push(ParamRecord {
                function,
                slot: ParamSlot::Param(i),
                shape,
                type_offset,
            });
        }

        let proc_offset = self.pfs.offset();
        for (i, param) in func.params.iter().enumerate() {
            let record = records
                .iter()
                .find(|r| r.slot == ParamSlot::Param(i))
                .copied()
                .ok_or_else(|| MidlError::internal(format!("{} lost a parameter", name)))?;
            let directive =
                self.directive(&param.name, param.ty, record, param.direction().into())?;
            self.pfs.emit(&directive)?;
        }
        if let Some(record) = records.iter().find(|r| r.slot == ParamSlot::Return).copied() {
            let directive = self.directive(name, func.ret, record, ProcDirection::Return)?;
            self.pfs.emit(&directive)?;
        }
        self.pfs.emit(&EndOfProcedure)?;

        debug!(function = name, proc_offset, params = records.len(), "compiled function");
        self.params.extend(records);
        self.functions.push(CompiledFunction {
            function,
            interface: iface,
            proc_offset,
        });
        self.function = None;
        Ok(())
    }

    /// Emit a parameter or return type; scalars need no record
    fn emit_top_level(
        &mut self,
        ty: TypeId,
        attrs: &[Attribute],
        shape: Shape,
        site: Use,
    ) -> Result<Option<u32>> {
        if shape.is_scalar() {
            return Ok(None);
        }
        match self.emit_shape(ty, attrs, shape, site)? {
            Target::At(offset) => Ok(Some(offset)),
            Target::Label(label) => Err(MidlError::internal(format!(
                "{} is still being emitted (label {})",
                self.arena.name_of(ty),
                label.index()
            ))),
        }
    }

    fn directive(
        &self,
        name: &str,
        ty: TypeId,
        record: ParamRecord,
        direction: ProcDirection,
    ) -> Result<ParamDirective> {
        let Some(offset) = record.type_offset else {
            let fc = self.scalar_fc(record.shape)?;
            return Ok(ParamDirective::BaseType { direction, fc });
        };
        let env = self.env();
        let bytes = match record.shape {
            Shape::Pointer(_)
            | Shape::String
            | Shape::InterfacePointer
            | Shape::Array(_)
            | Shape::ContextHandle => env.pointer_size(),
            _ => env.memsize(ty).size,
        };
        let slots = bytes.div_ceil(4);
        let stack_slots = u8::try_from(slots)
            .map_err(|_| MidlError::capacity(name, "parameter stack size", slots as u64, 0xff))?;
        let type_offset = u16::try_from(offset)
            .map_err(|_| MidlError::capacity(name, "type offset", offset as u64, 0xffff))?;
        Ok(ParamDirective::Complex {
            direction,
            stack_slots,
            type_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::types::{BasicType, Field, TypeArena};
    use crate::CompileOptions;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pointer_param_and_return() {
        let mut arena = TypeArena::new();
        let long = arena.basic(BasicType::Long);
        let out_long = arena.pointer(long, vec![]);
        let iface = arena.interface("IThing", None, vec![]);
        let get = arena.function(
            "Get",
            long,
            vec![Field::new("value", out_long).with_attrs(vec![Attribute::Out])],
            vec![],
        );
        arena.add_function(iface, get);

        let mut c = Compilation::new(&arena, Default::default());
        c.compile(&[iface], |_| true).unwrap();
        assert_eq!(&c.type_format_string()[..], &[0x00, 0x11, 0x0c, 0x08, 0x5c]);
        assert_eq!(
            &c.proc_format_string()[..],
            &[0x51, 0x01, 0x01, 0x00, 0x53, 0x08, 0x5b, 0x5c]
        );
        let record = c.param_record(get, ParamSlot::Param(0)).unwrap();
        assert_eq!(record.type_offset, Some(1));
        assert_eq!(c.functions()[0].proc_offset, 0);
    }

    #[test]
    fn test_skips_local_and_unselected() {
        let mut arena = TypeArena::new();
        let void = arena.void();
        let long = arena.basic(BasicType::Long);
        let skipped = arena.interface("ISkipped", None, vec![Attribute::Local]);
        let other = arena.interface("IOther", None, vec![]);
        let kept = arena.interface("IKept", None, vec![]);
        let local = arena.function("Local", void, vec![], vec![Attribute::Local]);
        let f = arena.function("F", void, vec![Field::new("a", long)], vec![]);
        let g = arena.function("G", void, vec![], vec![]);
        arena.add_function(skipped, g);
        arena.add_function(other, g);
        arena.add_function(kept, local);
        arena.add_function(kept, f);
        let module = arena.module("M", vec![f]);

        let mut c = Compilation::new(&arena, Default::default());
        c.compile(&[skipped, other, kept, module], |node| {
            node.display_name() != "IOther"
        })
        .unwrap();
        assert_eq!(c.functions().len(), 1);
        assert_eq!(c.functions()[0].function, f);
        assert_eq!(&c.proc_format_string()[..], &[0x4e, 0x08, 0x5b, 0x5c]);
    }

    #[test]
    fn test_struct_by_value_stack_slots() {
        let mut arena = TypeArena::new();
        let void = arena.void();
        let hyper = arena.basic(BasicType::Hyper);
        let ch = arena.basic(BasicType::Char);
        let s = arena.structure("s", vec![Field::new("h", hyper), Field::new("c", ch)]);
        let iface = arena.interface("I", None, vec![]);
        let f = arena.function("F", void, vec![Field::new("s", s)], vec![]);
        arena.add_function(iface, f);

        let mut c = Compilation::new(&arena, CompileOptions::x86());
        c.compile(&[iface], |_| true).unwrap();
        // 16 bytes by value: four stack slots
        assert_eq!(&c.proc_format_string()[..4], &[0x4d, 0x04, 0x01, 0x00]);
    }

    #[test]
    fn test_handle_param_is_ignored() {
        let mut arena = TypeArena::new();
        let void = arena.void();
        let handle = arena.basic(BasicType::HandleT);
        let iface = arena.interface("I", None, vec![]);
        let f = arena.function("F", void, vec![Field::new("h", handle)], vec![]);
        arena.add_function(iface, f);

        let mut c = Compilation::new(&arena, Default::default());
        c.compile(&[iface], |_| true).unwrap();
        assert_eq!(&c.proc_format_string()[..], &[0x4e, 0x0f, 0x5b, 0x5c]);
    }

    #[test]
    fn test_retval_must_be_out() {
        let mut arena = TypeArena::new();
        let void = arena.void();
        let long = arena.basic(BasicType::Long);
        let p = arena.pointer(long, vec![]);
        let iface = arena.interface("I", None, vec![]);
        let f = arena.function(
            "F",
            void,
            vec![Field::new("r", p).with_attrs(vec![Attribute::In, Attribute::Retval])],
            vec![],
        );
        arena.add_function(iface, f);

        let mut c = Compilation::new(&arena, Default::default());
        let err = c.compile(&[iface], |_| true).unwrap_err();
        assert!(matches!(err, MidlError::Unsupported { .. }));
    }

    #[test]
    fn test_recompile_is_identical() {
        let mut arena = TypeArena::new();
        let void = arena.void();
        let long = arena.basic(BasicType::Long);
        let ch = arena.basic(BasicType::Char);
        let data = arena.conformant_array(ch, Expr::ident("count"));
        let s = arena.structure("s", vec![Field::new("count", long), Field::new("data", data)]);
        let ps = arena.pointer(s, vec![]);
        let iface = arena.interface("I", None, vec![]);
        let f = arena.function("F", void, vec![Field::new("p", ps)], vec![]);
        arena.add_function(iface, f);

        let mut c = Compilation::new(&arena, Default::default());
        c.compile(&[iface], |_| true).unwrap();
        let first = (c.type_format_string().clone(), c.proc_format_string().clone());
        c.compile(&[iface], |_| true).unwrap();
        assert_eq!(first.0, c.type_format_string().clone());
        assert_eq!(first.1, c.proc_format_string().clone());
        assert_eq!(c.functions().len(), 1);
    }
}

//! Correlation descriptor resolution
//!
//! Turns a `size_is`/`length_is`/`switch_is`/`iid_is` expression into the
//! 4-byte descriptor the runtime evaluates. Anything beyond a sibling field
//! with at most one runtime-applied operator becomes a callback into an
//! expression-evaluation routine.

use crate::context::Compilation;
use crate::error::{MidlError, Result};
use crate::expr::Expr;
use crate::types::{ArrayForm, BasicType, TypeId, TypeKind};
use ndr_format::correlation::{CorrelationDesc, CorrelationKind, CorrelationOp, MAX_CONSTANT};
use ndr_format::FormatChar;
use std::collections::HashMap;
use tracing::debug;

/// An expression-evaluation routine the generated code must provide
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExprEvalEntry {
    /// Structure whose fields the expression names
    pub structure: TypeId,
    pub expr: Expr,
    /// Distance from the structure start back from the runtime's base
    pub base_offset: u32,
}

/// Expression-evaluation routines, deduplicated per structure
#[derive(Debug, Clone, Default)]
pub(crate) struct ExprEvalTable {
    entries: Vec<ExprEvalEntry>,
    index: HashMap<(TypeId, Expr), u16>,
}

impl ExprEvalTable {
    pub fn entries(&self) -> &[ExprEvalEntry] {
        &self.entries
    }

    /// Index of the routine for `expr` in `structure`, adding it if new
    fn intern(&mut self, structure: TypeId, expr: &Expr, base_offset: u32, name: &str) -> Result<u16> {
        if let Some(&index) = self.index.get(&(structure, expr.clone())) {
            return Ok(index);
        }
        let index = u16::try_from(self.entries.len()).map_err(|_| {
            MidlError::capacity(name, "expression routine index", self.entries.len() as u64, 0xffff)
        })?;
        self.entries.push(ExprEvalEntry {
            structure,
            expr: expr.clone(),
            base_offset,
        });
        self.index.insert((structure, expr.clone()), index);
        Ok(index)
    }
}

impl<'a> Compilation<'a> {
    /// Correlation descriptor for the item `sized`, described by `expr`
    /// inside `structure` (None at top level), where the runtime's base is
    /// `base_offset` bytes into the structure
    pub(crate) fn write_conf(
        &mut self,
        structure: Option<TypeId>,
        base_offset: u32,
        sized: TypeId,
        expr: Option<&Expr>,
    ) -> Result<CorrelationDesc> {
        let Some(expr) = expr else {
            return Ok(CorrelationDesc::Absent);
        };
        let Some(structure) = structure else {
            return Ok(CorrelationDesc::TopLevel);
        };
        let arena = self.arena;
        let struct_name = arena.name_of(structure);

        if let Some(value) = expr.const_value() {
            if value < 0 {
                return Err(MidlError::unsupported(
                    struct_name,
                    format!("negative constant correlation {}", value),
                ));
            }
            if value > MAX_CONSTANT as i64 {
                return Err(MidlError::capacity(
                    struct_name,
                    "constant correlation",
                    value as u64,
                    MAX_CONSTANT as u64,
                ));
            }
            return Ok(CorrelationDesc::Constant(value as u32));
        }
        if expr.is_constant() {
            return Err(MidlError::unsupported(
                struct_name,
                format!("constant correlation {} does not evaluate", expr),
            ));
        }

        let kind = self.correlation_kind(sized);

        if let Some((name, op)) = expr.simple_form() {
            let fields = self
                .struct_fields(structure)
                .ok_or_else(|| MidlError::internal(format!("{} is not a structure", struct_name)))?;
            let offsets = self.env().field_offsets(fields);
            let Some(index) = fields.iter().position(|f| f.name == name) else {
                return Err(MidlError::unsupported(
                    struct_name,
                    format!("correlation identifier {} is not a member", name),
                ));
            };
            let offset = offsets[index] as i64 - base_offset as i64;
            let offset = i16::try_from(offset).map_err(|_| {
                MidlError::capacity(struct_name, "correlation offset", offset.unsigned_abs(), 0x7fff)
            })?;

            let mut field_ty = fields[index].ty;
            if op == CorrelationOp::Dereference {
                match arena.get(arena.resolve(field_ty)).kind {
                    TypeKind::Pointer(referent) => field_ty = referent,
                    _ => {
                        return Err(MidlError::unsupported(
                            &fields[index].name,
                            "dereferenced correlation member is not a pointer",
                        ))
                    }
                }
            }
            let field_type = self.correlation_type(field_ty, &fields[index].name)?;
            return Ok(CorrelationDesc::Field {
                kind,
                field_type,
                op,
                offset,
            });
        }

        let index = self
            .expr_table
            .intern(structure, expr, base_offset, struct_name)?;
        debug!(structure = struct_name, expr = %expr, index, "expression routine");
        Ok(CorrelationDesc::Callback { kind, index })
    }

    /// Pointer conformance when the described item is reached through a
    /// pointer stored in the structure
    fn correlation_kind(&self, sized: TypeId) -> CorrelationKind {
        let arena = self.arena;
        match &arena.get(arena.resolve(sized)).kind {
            TypeKind::Pointer(_) => CorrelationKind::Pointer,
            TypeKind::Array(array) if array.form == ArrayForm::Pointer => CorrelationKind::Pointer,
            _ => CorrelationKind::Normal,
        }
    }

    /// Wire type byte of a correlation member
    fn correlation_type(&self, ty: TypeId, name: &str) -> Result<FormatChar> {
        let env = self.env();
        let ps = env.pointer_size();
        let resolved = self.arena.get(self.arena.resolve(ty));
        Ok(match &resolved.kind {
            TypeKind::Basic(basic) => match basic {
                BasicType::Char | BasicType::Small => FormatChar::Small,
                BasicType::Byte | BasicType::USmall | BasicType::Boolean => FormatChar::USmall,
                BasicType::WChar | BasicType::Short => FormatChar::Short,
                BasicType::UShort => FormatChar::UShort,
                BasicType::Long | BasicType::ErrorStatusT => FormatChar::Long,
                BasicType::ULong => FormatChar::ULong,
                BasicType::Int3264 if ps == 4 => FormatChar::Long,
                BasicType::UInt3264 if ps == 4 => FormatChar::ULong,
                BasicType::Int3264 | BasicType::Hyper => FormatChar::Hyper,
                _ => {
                    return Err(MidlError::unsupported(
                        name,
                        format!("{} cannot carry a correlation value", basic.as_str()),
                    ))
                }
            },
            TypeKind::Enum(_) => match env.enum_width(ty) {
                crate::EnumWidth::Enum16 => FormatChar::Short,
                crate::EnumWidth::Enum32 => FormatChar::Long,
            },
            TypeKind::Pointer(_) if ps == 4 => FormatChar::Long,
            TypeKind::Pointer(_) => FormatChar::Hyper,
            _ => {
                return Err(MidlError::unsupported(
                    name,
                    "correlation member is not an integer",
                ))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinaryOp;
    use crate::types::{Field, TypeArena};
    use crate::CompileOptions;

    fn sized_struct(arena: &mut TypeArena) -> (TypeId, TypeId) {
        let long = arena.basic(BasicType::Long);
        let short = arena.basic(BasicType::Short);
        let p = arena.pointer(long, vec![]);
        let data = arena.sized_pointer(long, Some(Expr::ident("n")), None);
        let s = arena.structure(
            "s",
            vec![
                Field::new("n", long),
                Field::new("w", short),
                Field::new("p", p),
                Field::new("data", data),
            ],
        );
        (s, data)
    }

    #[test]
    fn test_absent_and_top_level() {
        let mut arena = TypeArena::new();
        let (s, data) = sized_struct(&mut arena);
        let mut c = Compilation::new(&arena, CompileOptions::x86());
        assert_eq!(c.write_conf(Some(s), 0, data, None).unwrap(), CorrelationDesc::Absent);
        assert_eq!(
            c.write_conf(None, 0, data, Some(&Expr::ident("n"))).unwrap(),
            CorrelationDesc::TopLevel
        );
    }

    #[test]
    fn test_constant() {
        let mut arena = TypeArena::new();
        let (s, data) = sized_struct(&mut arena);
        let mut c = Compilation::new(&arena, CompileOptions::x86());
        let expr = Expr::binary(BinaryOp::Mul, Expr::Const(4), Expr::Const(5));
        assert_eq!(
            c.write_conf(Some(s), 0, data, Some(&expr)).unwrap(),
            CorrelationDesc::Constant(20)
        );
        let err = c
            .write_conf(Some(s), 0, data, Some(&Expr::Const(0x0100_0000)))
            .unwrap_err();
        assert!(matches!(err, MidlError::Capacity { .. }));
    }

    #[test]
    fn test_unfoldable_constant_rejected() {
        let mut arena = TypeArena::new();
        let (s, data) = sized_struct(&mut arena);
        let mut c = Compilation::new(&arena, CompileOptions::x86());
        let expr = Expr::binary(BinaryOp::Div, Expr::Const(4), Expr::Const(0));
        let err = c.write_conf(Some(s), 0, data, Some(&expr)).unwrap_err();
        assert!(matches!(err, MidlError::Unsupported { .. }));
        assert!(err.to_string().contains("(4 / 0)"));
        assert!(c.expr_eval_routines().is_empty());
    }

    #[test]
    fn test_field_forms() {
        let mut arena = TypeArena::new();
        let (s, data) = sized_struct(&mut arena);
        let mut c = Compilation::new(&arena, CompileOptions::x86());

        let times_two = Expr::binary(BinaryOp::Mul, Expr::ident("w"), Expr::Const(2));
        assert_eq!(
            c.write_conf(Some(s), 0, data, Some(&times_two)).unwrap(),
            CorrelationDesc::Field {
                kind: CorrelationKind::Pointer,
                field_type: FormatChar::Short,
                op: CorrelationOp::Mult2,
                offset: 4,
            }
        );

        let deref = Expr::unary(crate::expr::UnaryOp::Deref, Expr::ident("p"));
        assert_eq!(
            c.write_conf(Some(s), 16, data, Some(&deref)).unwrap(),
            CorrelationDesc::Field {
                kind: CorrelationKind::Pointer,
                field_type: FormatChar::Long,
                op: CorrelationOp::Dereference,
                offset: -8,
            }
        );
        assert!(c.expr_eval_routines().is_empty());
    }

    #[test]
    fn test_unknown_identifier() {
        let mut arena = TypeArena::new();
        let (s, data) = sized_struct(&mut arena);
        let mut c = Compilation::new(&arena, CompileOptions::x86());
        let err = c
            .write_conf(Some(s), 0, data, Some(&Expr::ident("missing")))
            .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_callbacks_are_shared() {
        let mut arena = TypeArena::new();
        let (s, data) = sized_struct(&mut arena);
        let mut c = Compilation::new(&arena, CompileOptions::x86());
        let complex = Expr::binary(BinaryOp::Add, Expr::ident("n"), Expr::ident("w"));
        let first = c.write_conf(Some(s), 0, data, Some(&complex)).unwrap();
        let second = c.write_conf(Some(s), 0, data, Some(&complex.clone())).unwrap();
        assert_eq!(
            first,
            CorrelationDesc::Callback {
                kind: CorrelationKind::Pointer,
                index: 0
            }
        );
        assert_eq!(first, second);
        assert_eq!(c.expr_eval_routines().len(), 1);
        assert_eq!(c.expr_eval_routines()[0].structure, s);
    }
}

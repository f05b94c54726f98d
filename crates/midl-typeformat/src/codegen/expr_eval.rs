//! Expression-evaluation routines
//!
//! A callback correlation descriptor names one of these by index. The runtime
//! calls it with its stack top `base_offset` bytes into the structure being
//! processed; the routine stores the evaluated count in `max_count`.

use super::ident;
use crate::context::{Compilation, ExprEvalEntry};
use crate::error::{MidlError, Result};
use crate::expr::{BinaryOp, Expr, UnaryOp};
use proc_macro2::{Ident, Literal, TokenStream};
use quote::{format_ident, quote};

pub(crate) fn routine_name(index: usize) -> Ident {
    format_ident!("expr_eval_{:04}", index)
}

/// Place expression for a structure field, a member of one, or what one
/// points at
fn place(expr: &Expr) -> Result<TokenStream> {
    Ok(match expr {
        Expr::Ident(name) => {
            let field = ident(name)?;
            quote!((*s).#field)
        }
        Expr::Member(base, name) => {
            let base = place(base)?;
            let field = ident(name)?;
            quote!(#base.#field)
        }
        Expr::PtrMember(base, name) => {
            let base = place(base)?;
            let field = ident(name)?;
            quote!((*#base).#field)
        }
        Expr::Unary(UnaryOp::Deref, operand) => {
            let operand = place(operand)?;
            quote!((*#operand))
        }
        other => {
            return Err(MidlError::codegen(format!(
                "{} does not name a value in memory",
                other
            )))
        }
    })
}

fn operator(op: BinaryOp) -> Result<syn::BinOp> {
    syn::parse_str(op.as_str())
        .map_err(|e| MidlError::codegen(format!("operator {}: {}", op.as_str(), e)))
}

/// Value of an expression, evaluated as `i64` with C truth values
fn value(expr: &Expr) -> Result<TokenStream> {
    Ok(match expr {
        Expr::Const(v) => {
            let v = Literal::i64_suffixed(*v);
            quote!(#v)
        }
        Expr::Ident(_) | Expr::Member(..) | Expr::PtrMember(..) | Expr::Unary(UnaryOp::Deref, _) => {
            let place = place(expr)?;
            quote!((#place as i64))
        }
        Expr::Unary(UnaryOp::Neg, operand) => {
            let operand = value(operand)?;
            quote!((-#operand))
        }
        Expr::Unary(UnaryOp::BitNot, operand) => {
            let operand = value(operand)?;
            quote!((!#operand))
        }
        Expr::Unary(UnaryOp::Not, operand) => {
            let operand = value(operand)?;
            quote!(((#operand == 0) as i64))
        }
        Expr::Binary(op, lhs, rhs) => {
            let (lhs, rhs) = (value(lhs)?, value(rhs)?);
            let token = operator(*op)?;
            match op {
                BinaryOp::And | BinaryOp::Or => quote!((((#lhs != 0) #token (#rhs != 0)) as i64)),
                BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Le
                | BinaryOp::Gt
                | BinaryOp::Ge => quote!(((#lhs #token #rhs) as i64)),
                _ => quote!((#lhs #token #rhs)),
            }
        }
        Expr::Conditional(cond, then, otherwise) => {
            let (cond, then, otherwise) = (value(cond)?, value(then)?, value(otherwise)?);
            quote!((if #cond != 0 { #then } else { #otherwise }))
        }
    })
}

impl<'a> Compilation<'a> {
    /// Routine for entry `index` of the expression-evaluation table
    pub(crate) fn expr_eval_routine(&self, index: usize, entry: &ExprEvalEntry) -> Result<TokenStream> {
        let structure = ident(self.arena.name_of(entry.structure))?;
        let name = routine_name(index);
        let base = Literal::usize_unsuffixed(entry.base_offset as usize);
        let value = value(&entry.expr)?;
        Ok(quote! {
            unsafe extern "C" fn #name(stub_msg: *mut ::ndr_runtime::StubMessage) {
                let s = (*stub_msg).stack_top.sub(#base).cast::<#structure>();
                (*stub_msg).max_count = #value as _;
            }
        })
    }
}

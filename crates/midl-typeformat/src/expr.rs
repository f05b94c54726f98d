//! Attribute expressions
//!
//! Expressions size arrays (`size_is`, `length_is`), select union arms
//! (`switch_is`) and name interface identifiers (`iid_is`). Identifiers refer
//! to sibling fields of the enclosing structure, or to other parameters at
//! top level.

use ndr_format::correlation::CorrelationOp;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    /// Logical not
    Not,
    BitNot,
    Deref,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::And => "&&",
            Self::Or => "||",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    fn fold(self, l: i64, r: i64) -> Option<i64> {
        Some(match self {
            Self::Add => l.checked_add(r)?,
            Self::Sub => l.checked_sub(r)?,
            Self::Mul => l.checked_mul(r)?,
            Self::Div => l.checked_div(r)?,
            Self::Mod => l.checked_rem(r)?,
            Self::Shl => l.checked_shl(u32::try_from(r).ok()?)?,
            Self::Shr => l.checked_shr(u32::try_from(r).ok()?)?,
            Self::BitAnd => l & r,
            Self::BitOr => l | r,
            Self::BitXor => l ^ r,
            Self::And => (l != 0 && r != 0) as i64,
            Self::Or => (l != 0 || r != 0) as i64,
            Self::Eq => (l == r) as i64,
            Self::Ne => (l != r) as i64,
            Self::Lt => (l < r) as i64,
            Self::Le => (l <= r) as i64,
            Self::Gt => (l > r) as i64,
            Self::Ge => (l >= r) as i64,
        })
    }
}

/// Expression tree; equality is structural
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    Const(i64),
    Ident(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `a.b`
    Member(Box<Expr>, String),
    /// `a->b`
    PtrMember(Box<Expr>, String),
    /// `c ? a : b`
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn ident(name: impl Into<String>) -> Self {
        Self::Ident(name.into())
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Self::Unary(op, Box::new(operand))
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Self::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    pub fn member(base: Expr, name: impl Into<String>) -> Self {
        Self::Member(Box::new(base), name.into())
    }

    pub fn ptr_member(base: Expr, name: impl Into<String>) -> Self {
        Self::PtrMember(Box::new(base), name.into())
    }

    pub fn conditional(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        Self::Conditional(Box::new(cond), Box::new(then), Box::new(otherwise))
    }

    /// Value of a constant expression, if it is one and folds without
    /// overflow
    pub fn const_value(&self) -> Option<i64> {
        match self {
            Self::Const(v) => Some(*v),
            Self::Unary(op, operand) => {
                let v = operand.const_value()?;
                match op {
                    UnaryOp::Neg => v.checked_neg(),
                    UnaryOp::Not => Some((v == 0) as i64),
                    UnaryOp::BitNot => Some(!v),
                    UnaryOp::Deref => None,
                }
            }
            Self::Binary(op, l, r) => op.fold(l.const_value()?, r.const_value()?),
            Self::Conditional(c, a, b) => {
                if c.const_value()? != 0 {
                    a.const_value()
                } else {
                    b.const_value()
                }
            }
            Self::Ident(_) | Self::Member(..) | Self::PtrMember(..) => None,
        }
    }

    /// True when the expression names no runtime value
    pub fn is_constant(&self) -> bool {
        match self {
            Self::Const(_) => true,
            Self::Unary(UnaryOp::Deref, _) => false,
            Self::Unary(_, operand) => operand.is_constant(),
            Self::Binary(_, l, r) => l.is_constant() && r.is_constant(),
            Self::Conditional(c, a, b) => c.is_constant() && a.is_constant() && b.is_constant(),
            Self::Ident(_) | Self::Member(..) | Self::PtrMember(..) => false,
        }
    }

    /// A sibling identifier with at most one operator the runtime applies
    /// itself: `n`, `*n`, `n * 2`, `n / 2`, `n + 1`, `n - 1`
    pub fn simple_form(&self) -> Option<(&str, CorrelationOp)> {
        match self {
            Self::Ident(name) => Some((name, CorrelationOp::None)),
            Self::Unary(UnaryOp::Deref, operand) => match operand.as_ref() {
                Self::Ident(name) => Some((name, CorrelationOp::Dereference)),
                _ => None,
            },
            Self::Binary(op, l, r) => {
                let (name, constant, ident_first) = match (l.as_ref(), r.as_ref()) {
                    (Self::Ident(name), Self::Const(c)) => (name, *c, true),
                    (Self::Const(c), Self::Ident(name)) => (name, *c, false),
                    _ => return None,
                };
                let op = match (op, constant) {
                    (BinaryOp::Mul, 2) => CorrelationOp::Mult2,
                    (BinaryOp::Add, 1) => CorrelationOp::Add1,
                    (BinaryOp::Div, 2) if ident_first => CorrelationOp::Div2,
                    (BinaryOp::Sub, 1) if ident_first => CorrelationOp::Sub1,
                    _ => return None,
                };
                Some((name, op))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Const(v) => write!(f, "{}", v),
            Self::Ident(name) => write!(f, "{}", name),
            Self::Unary(op, e) => {
                let op = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Not => "!",
                    UnaryOp::BitNot => "~",
                    UnaryOp::Deref => "*",
                };
                write!(f, "{}{}", op, e)
            }
            Self::Binary(op, l, r) => write!(f, "({} {} {})", l, op.as_str(), r),
            Self::Member(e, m) => write!(f, "{}.{}", e, m),
            Self::PtrMember(e, m) => write!(f, "{}->{}", e, m),
            Self::Conditional(c, a, b) => write!(f, "({} ? {} : {})", c, a, b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_const_folding() {
        let e = Expr::binary(
            BinaryOp::Mul,
            Expr::Const(4),
            Expr::binary(BinaryOp::Add, Expr::Const(1), Expr::Const(2)),
        );
        assert_eq!(e.const_value(), Some(12));
        assert_eq!(Expr::unary(UnaryOp::Neg, Expr::Const(3)).const_value(), Some(-3));
        assert_eq!(
            Expr::binary(BinaryOp::Div, Expr::Const(1), Expr::Const(0)).const_value(),
            None
        );
        assert_eq!(Expr::ident("n").const_value(), None);
    }

    #[test]
    fn test_is_constant() {
        assert!(Expr::binary(BinaryOp::Div, Expr::Const(4), Expr::Const(0)).is_constant());
        assert!(!Expr::binary(BinaryOp::Add, Expr::ident("n"), Expr::Const(1)).is_constant());
        assert!(!Expr::unary(UnaryOp::Deref, Expr::Const(4)).is_constant());
        assert!(!Expr::conditional(Expr::Const(0), Expr::Const(1), Expr::ident("n")).is_constant());
    }

    #[test]
    fn test_simple_forms() {
        let n = || Expr::ident("n");
        assert_eq!(n().simple_form(), Some(("n", CorrelationOp::None)));
        assert_eq!(
            Expr::binary(BinaryOp::Mul, n(), Expr::Const(2)).simple_form(),
            Some(("n", CorrelationOp::Mult2))
        );
        assert_eq!(
            Expr::binary(BinaryOp::Mul, Expr::Const(2), n()).simple_form(),
            Some(("n", CorrelationOp::Mult2))
        );
        assert_eq!(
            Expr::unary(UnaryOp::Deref, n()).simple_form(),
            Some(("n", CorrelationOp::Dereference))
        );
        // 2 / n is not n / 2
        assert_eq!(
            Expr::binary(BinaryOp::Div, Expr::Const(2), n()).simple_form(),
            None
        );
        assert_eq!(Expr::ptr_member(n(), "m").simple_form(), None);
        assert_eq!(
            Expr::binary(BinaryOp::Mul, n(), Expr::Const(3)).simple_form(),
            None
        );
    }

    #[test]
    fn test_structural_equality() {
        let a = Expr::binary(BinaryOp::Add, Expr::ident("a"), Expr::ident("b"));
        let b = Expr::binary(BinaryOp::Add, Expr::ident("a"), Expr::ident("b"));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "(a + b)");
    }
}

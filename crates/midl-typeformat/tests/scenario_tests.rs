//! Scenario Tests - Conformance Descriptors End to End
//!
//! These tests compile small interfaces through the public API and check the
//! correlation descriptors the runtime will read:
//! - A conformant structure sized by a sibling field
//! - Operators folded into the descriptor versus callback routines
//! - Callback routines shared within a structure

mod common;

use common::*;
use midl_typeformat::expr::{BinaryOp, Expr};
use midl_typeformat::types::{Attribute, BasicType, Field, TypeArena};
use midl_typeformat::{ClassifyFlags, Compilation, CompileOptions, Shape, StructKind};
use pretty_assertions::assert_eq;

#[test]
fn test_conformant_struct_sized_by_sibling() {
    init_tracing();
    let mut arena = TypeArena::new();
    let void = arena.void();
    let long = arena.basic(BasicType::Long);
    let ch = arena.basic(BasicType::Char);
    let data = arena.conformant_array(ch, Expr::ident("count"));
    let s = arena.structure(
        "counted",
        vec![Field::new("count", long), Field::new("data", data)],
    );
    let ps = arena.pointer(s, vec![]);
    let (iface, _) = interface_with(&mut arena, "ICounted", void, vec![Field::new("p", ps)]);

    let mut c = Compilation::new(&arena, CompileOptions::x86());
    assert_eq!(
        c.env().classify(s, &[], ClassifyFlags::empty()).unwrap(),
        Shape::Struct(StructKind::Conformant)
    );
    c.compile(&[iface], |_| true).unwrap();

    let tfs = c.type_format_string();
    let at = c.type_offset(s).unwrap() as usize;
    // FC_CSTRUCT, alignment 3, fixed size 4
    assert_eq!(&tfs[at..at + 4], &[0x17, 0x03, 0x04, 0x00]);
    let array = follow(tfs, at + 4);
    // FC_LONG count, no operator, 4 bytes before the end of the structure
    assert_eq!(
        &tfs[array..array + 8],
        &[0x1b, 0x00, 0x01, 0x00, 0x08, 0x00, 0xfc, 0xff]
    );
    assert!(c.expr_eval_routines().is_empty());
}

#[test]
fn test_operator_folded_and_callback() {
    init_tracing();
    let mut arena = TypeArena::new();
    let void = arena.void();
    let long = arena.basic(BasicType::Long);
    let ch = arena.basic(BasicType::Char);

    let doubled = arena.conformant_array(
        ch,
        Expr::binary(BinaryOp::Mul, Expr::ident("n"), Expr::Const(2)),
    );
    let twice = arena.structure("twice", vec![Field::new("n", long), Field::new("data", doubled)]);

    let inner = arena.structure("inner", vec![Field::new("m", long)]);
    let pinner = arena.pointer(inner, vec![Attribute::Unique]);
    let through = arena.conformant_array(ch, Expr::ptr_member(Expr::ident("n"), "m"));
    let outer = arena.structure("outer", vec![Field::new("n", pinner), Field::new("data", through)]);

    let ptwice = arena.pointer(twice, vec![]);
    let pouter = arena.pointer(outer, vec![]);
    let (iface, _) = interface_with(
        &mut arena,
        "IExprs",
        void,
        vec![Field::new("a", ptwice), Field::new("b", pouter)],
    );

    let mut c = Compilation::new(&arena, CompileOptions::x86());
    c.compile(&[iface], |_| true).unwrap();
    let tfs = c.type_format_string();

    let at = c.type_offset(twice).unwrap() as usize;
    let array = follow(tfs, at + 4);
    // FC_LONG n, FC_MULT_2
    assert_eq!(&tfs[array + 4..array + 8], &[0x08, 0x56, 0xfc, 0xff]);

    assert_eq!(c.expr_eval_routines().len(), 1);
    assert_eq!(c.expr_eval_routines()[0].structure, outer);
    assert_eq!(
        c.expr_eval_routines()[0].expr,
        Expr::ptr_member(Expr::ident("n"), "m")
    );
    let at = c.type_offset(outer).unwrap() as usize;
    let array = follow(tfs, at + 4);
    // callback routine 0
    assert_eq!(&tfs[array + 4..array + 8], &[0x00, 0x59, 0x00, 0x00]);
}

#[test]
fn test_callbacks_shared_within_structure() {
    init_tracing();
    let mut arena = TypeArena::new();
    let void = arena.void();
    let long = arena.basic(BasicType::Long);
    let ch = arena.basic(BasicType::Char);
    let sum = || Expr::binary(BinaryOp::Add, Expr::ident("a"), Expr::ident("b"));

    let first = arena.sized_pointer(long, Some(sum()), None);
    let second = arena.sized_pointer(ch, Some(sum()), None);
    let pair = arena.structure(
        "pair",
        vec![
            Field::new("a", long),
            Field::new("b", long),
            Field::new("p", first),
            Field::new("q", second),
        ],
    );
    let third = arena.sized_pointer(ch, Some(sum()), None);
    let other = arena.structure(
        "other",
        vec![Field::new("a", long), Field::new("b", long), Field::new("r", third)],
    );
    let ppair = arena.pointer(pair, vec![]);
    let pother = arena.pointer(other, vec![]);
    let (iface, _) = interface_with(
        &mut arena,
        "IShared",
        void,
        vec![Field::new("x", ppair), Field::new("y", pother)],
    );

    let mut c = Compilation::new(&arena, CompileOptions::x86());
    c.compile(&[iface], |_| true).unwrap();
    let routines = c.expr_eval_routines();
    // One routine per structure, however many members use the expression
    assert_eq!(routines.len(), 2);
    assert_eq!(routines[0].structure, pair);
    assert_eq!(routines[1].structure, other);
}

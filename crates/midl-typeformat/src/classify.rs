//! Type classification
//!
//! Decides the structural shape of a type use without emitting anything.
//! Classification never follows pointers, so it terminates on cyclic graphs;
//! a structure that contains itself by value is rejected.

use crate::error::{MidlError, Result};
use crate::layout::align_up;
use crate::types::{ArrayForm, ArrayType, Attribute, BasicType, Field, PointerKind, TypeId, TypeKind};
use crate::TypeEnv;
use crate::EnumPolicy;
use bitflags::bitflags;
use ndr_format::FormatChar;

bitflags! {
    /// Where and how a type is being classified
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClassifyFlags: u8 {
        /// A parameter or return value rather than an embedded member
        const TOP_LEVEL = 0x01;
        /// Treat `[string]` arrays and pointers as plain arrays and pointers
        const IGNORE_STRINGS = 0x02;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumWidth {
    Enum16,
    Enum32,
}

impl EnumWidth {
    pub fn format_char(self) -> FormatChar {
        match self {
            Self::Enum16 => FormatChar::Enum16,
            Self::Enum32 => FormatChar::Enum32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StructKind {
    Simple,
    Pointer,
    Conformant,
    ConformantPointer,
    ConformantVarying,
    Bogus,
}

impl StructKind {
    pub fn format_char(self) -> FormatChar {
        match self {
            Self::Simple => FormatChar::Struct,
            Self::Pointer => FormatChar::PStruct,
            Self::Conformant => FormatChar::CStruct,
            Self::ConformantPointer => FormatChar::CPStruct,
            Self::ConformantVarying => FormatChar::CVStruct,
            Self::Bogus => FormatChar::BogusStruct,
        }
    }

    pub fn has_conformance(self) -> bool {
        matches!(
            self,
            Self::Conformant | Self::ConformantPointer | Self::ConformantVarying
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnionKind {
    Encapsulated,
    NonEncapsulated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    Fixed,
    Varying,
    Conformant,
    ConformantVarying,
    Bogus,
}

/// Structural shape of a type use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    UserType,
    ContextHandle,
    String,
    Basic(BasicType),
    Enum(EnumWidth),
    Pointer(PointerKind),
    InterfacePointer,
    Struct(StructKind),
    Union(UnionKind),
    Array(ArrayKind),
    Void,
    /// Not a data type: function, module, coclass or a bare interface
    Invalid,
}

impl Shape {
    /// Shapes passed by value as a fixed-width scalar
    pub fn is_scalar(self) -> bool {
        matches!(self, Self::Basic(_) | Self::Enum(_))
    }

    pub fn is_bogus(self) -> bool {
        matches!(
            self,
            Self::Struct(StructKind::Bogus) | Self::Array(ArrayKind::Bogus)
        )
    }
}

impl<'a> TypeEnv<'a> {
    /// Classify a use of `ty` carrying the use-site attributes `attrs`
    pub fn classify(&self, ty: TypeId, attrs: &[Attribute], flags: ClassifyFlags) -> Result<Shape> {
        self.classify_guarded(ty, attrs, flags, &mut Vec::new())
    }

    /// Kind of a structure type
    pub fn struct_kind(&self, ty: TypeId) -> Result<StructKind> {
        self.struct_kind_guarded(self.arena.resolve(ty), &mut Vec::new())
    }

    /// Kind of an array type
    pub fn array_kind(&self, array: &ArrayType) -> Result<ArrayKind> {
        self.array_kind_guarded(array, &mut Vec::new())
    }

    /// Alias carrying `[wire_marshal]` and its wire type
    pub fn user_type(&self, ty: TypeId) -> Option<(TypeId, TypeId)> {
        self.arena
            .alias_chain(ty)
            .find_map(|(id, node)| Attribute::get_wire_marshal(&node.attrs).map(|wire| (id, wire)))
    }

    /// Whether a use is a context handle, directly or through one pointer
    pub fn is_context_handle(&self, ty: TypeId, attrs: &[Attribute]) -> bool {
        let tagged = |attrs: &[Attribute]| {
            Attribute::has(attrs, &Attribute::ContextHandle)
                || Attribute::has(attrs, &Attribute::StrictContextHandle)
        };
        let chain_tagged =
            |id: TypeId| self.arena.alias_chain(id).any(|(_, node)| tagged(&node.attrs));
        if tagged(attrs) || chain_tagged(ty) {
            return true;
        }
        match self.arena.get(self.arena.resolve(ty)).kind {
            TypeKind::Pointer(referent) => chain_tagged(referent),
            _ => false,
        }
    }

    /// Whether a context handle is passed by pointer (`[out] ctx_t *p`)
    pub fn is_context_handle_via_pointer(&self, ty: TypeId) -> bool {
        match self.arena.get(self.arena.resolve(ty)).kind {
            TypeKind::Pointer(referent) => self.is_context_handle(referent, &[]),
            _ => false,
        }
    }

    pub fn is_strict_context_handle(&self, ty: TypeId, attrs: &[Attribute]) -> bool {
        let strict = Attribute::StrictContextHandle;
        Attribute::has(attrs, &strict)
            || self.arena.chain_has(ty, &strict)
            || match self.arena.get(self.arena.resolve(ty)).kind {
                TypeKind::Pointer(referent) => self.arena.chain_has(referent, &strict),
                _ => false,
            }
    }

    /// Pointer sub-kind: use-site attribute, else the alias chain (ending
    /// with the pointer node itself), else Ref at top level and the
    /// interface default when embedded
    pub fn pointer_kind(&self, ty: TypeId, attrs: &[Attribute], top_level: bool) -> PointerKind {
        if let Some(kind) = self.explicit_pointer_kind(ty, attrs) {
            return kind;
        }
        if top_level {
            PointerKind::Ref
        } else {
            self.pointer_default
        }
    }

    fn explicit_pointer_kind(&self, ty: TypeId, attrs: &[Attribute]) -> Option<PointerKind> {
        Attribute::get_pointer_kind(attrs).or_else(|| {
            self.arena
                .alias_chain(ty)
                .find_map(|(_, node)| Attribute::get_pointer_kind(&node.attrs))
        })
    }

    pub fn enum_width(&self, ty: TypeId) -> EnumWidth {
        if self.options.enum_policy == EnumPolicy::Always32
            || self.arena.chain_has(ty, &Attribute::V1Enum)
        {
            EnumWidth::Enum32
        } else {
            EnumWidth::Enum16
        }
    }

    /// Wire format character of a scalar shape
    pub fn scalar_format_char(&self, shape: Shape) -> Option<FormatChar> {
        match shape {
            Shape::Basic(basic) => Some(basic.format_char(&self.options)),
            Shape::Enum(width) => Some(width.format_char()),
            _ => None,
        }
    }

    pub(crate) fn classify_guarded(
        &self,
        ty: TypeId,
        attrs: &[Attribute],
        flags: ClassifyFlags,
        stack: &mut Vec<TypeId>,
    ) -> Result<Shape> {
        let top_level = flags.contains(ClassifyFlags::TOP_LEVEL);
        if self.user_type(ty).is_some() {
            return Ok(Shape::UserType);
        }
        if self.is_context_handle(ty, attrs) {
            return Ok(Shape::ContextHandle);
        }

        let resolved = self.arena.resolve(ty);
        let node = self.arena.get(resolved);
        if !flags.contains(ClassifyFlags::IGNORE_STRINGS)
            && matches!(node.kind, TypeKind::Pointer(_) | TypeKind::Array(_))
            && (Attribute::has(attrs, &Attribute::String)
                || self.arena.chain_has(ty, &Attribute::String))
        {
            return Ok(Shape::String);
        }

        Ok(match &node.kind {
            TypeKind::Void => Shape::Void,
            TypeKind::Basic(basic) => Shape::Basic(*basic),
            TypeKind::Enum(_) => Shape::Enum(self.enum_width(ty)),
            TypeKind::Pointer(referent) => {
                let target = self.arena.get(self.arena.resolve(*referent));
                let dynamic_iid = Attribute::get_iid_is(attrs).is_some()
                    && matches!(target.kind, TypeKind::Void);
                if matches!(target.kind, TypeKind::Interface { .. }) || dynamic_iid {
                    Shape::InterfacePointer
                } else {
                    Shape::Pointer(self.pointer_kind(ty, attrs, top_level))
                }
            }
            TypeKind::Array(array) => {
                let explicit = self.explicit_pointer_kind(ty, attrs);
                let as_pointer = array.form == ArrayForm::Pointer
                    && (!top_level || matches!(explicit, Some(k) if k != PointerKind::Ref));
                if as_pointer {
                    Shape::Pointer(self.pointer_kind(ty, attrs, top_level))
                } else {
                    Shape::Array(self.array_kind_guarded(array, stack)?)
                }
            }
            TypeKind::Struct(_) => Shape::Struct(self.struct_kind_guarded(resolved, stack)?),
            TypeKind::EncapsulatedUnion { .. } => Shape::Union(UnionKind::Encapsulated),
            TypeKind::Union(_) => Shape::Union(UnionKind::NonEncapsulated),
            TypeKind::Interface { .. }
            | TypeKind::Function(_)
            | TypeKind::Module(_)
            | TypeKind::Coclass(_) => Shape::Invalid,
            TypeKind::Alias(_) => {
                return Err(MidlError::internal("alias survived resolution"));
            }
        })
    }

    fn struct_kind_guarded(&self, ty: TypeId, stack: &mut Vec<TypeId>) -> Result<StructKind> {
        let node = self.arena.get(ty);
        let TypeKind::Struct(fields) = &node.kind else {
            return Err(MidlError::internal(format!(
                "{} is not a structure",
                node.display_name()
            )));
        };
        if stack.contains(&ty) {
            return Err(MidlError::unsupported(
                node.display_name(),
                "structure contains itself by value",
            ));
        }
        stack.push(ty);

        let ps = self.pointer_size();
        let mut bogus = false;
        let mut has_pointer = false;
        let mut has_conformance = false;
        let mut has_variance = false;

        for (i, field) in fields.iter().enumerate() {
            let last = i + 1 == fields.len();
            let shape = self.classify_guarded(field.ty, &field.attrs, ClassifyFlags::empty(), stack)?;
            let mut conformant = false;
            match shape {
                Shape::UserType
                | Shape::InterfacePointer
                | Shape::Union(_)
                | Shape::Enum(EnumWidth::Enum16)
                | Shape::ContextHandle => bogus = true,
                Shape::Basic(basic) if basic.is_int3264() && ps != 4 => bogus = true,
                Shape::Basic(_) | Shape::Enum(_) | Shape::Void => {}
                Shape::Pointer(kind) => {
                    if kind == PointerKind::Ref || ps != 4 {
                        bogus = true;
                    } else {
                        has_pointer = true;
                    }
                }
                Shape::String => match &self.arena.get(self.arena.resolve(field.ty)).kind {
                    TypeKind::Array(array) if array.is_declared() => {
                        if array.is_conformant() {
                            conformant = true;
                            has_conformance = true;
                            has_variance = true;
                        } else {
                            bogus = true;
                        }
                    }
                    _ => {
                        let kind = self.pointer_kind(field.ty, &field.attrs, false);
                        if kind == PointerKind::Ref || ps != 4 {
                            bogus = true;
                        } else {
                            has_pointer = true;
                        }
                    }
                },
                Shape::Array(kind) => {
                    if let TypeKind::Array(array) = &self.arena.get(self.arena.resolve(field.ty)).kind {
                        conformant = array.is_conformant();
                        if self.element_has_pointers(array.element, stack)? {
                            has_pointer = true;
                        }
                    }
                    match kind {
                        ArrayKind::Fixed => {}
                        ArrayKind::Conformant => has_conformance = true,
                        ArrayKind::ConformantVarying => {
                            has_conformance = true;
                            has_variance = true;
                        }
                        ArrayKind::Varying | ArrayKind::Bogus => bogus = true,
                    }
                }
                Shape::Struct(kind) => {
                    conformant = kind.has_conformance();
                    match kind {
                        StructKind::Simple => {}
                        StructKind::Pointer => has_pointer = true,
                        StructKind::Conformant => has_conformance = true,
                        StructKind::ConformantPointer => {
                            has_conformance = true;
                            has_pointer = true;
                        }
                        StructKind::ConformantVarying => {
                            has_conformance = true;
                            has_variance = true;
                        }
                        StructKind::Bogus => bogus = true,
                    }
                }
                Shape::Invalid => {
                    stack.pop();
                    return Err(MidlError::unsupported(
                        &field.name,
                        "member type cannot be described",
                    ));
                }
            }
            if conformant && !last {
                stack.pop();
                return Err(MidlError::unsupported(
                    &field.name,
                    "conformant array is not the last member of its structure",
                ));
            }
        }

        if has_conformance && !bogus && self.conformant_padding(fields, stack) {
            bogus = true;
        }
        stack.pop();

        Ok(if bogus {
            StructKind::Bogus
        } else if has_variance {
            StructKind::ConformantVarying
        } else if has_conformance && has_pointer {
            StructKind::ConformantPointer
        } else if has_conformance {
            StructKind::Conformant
        } else if has_pointer {
            StructKind::Pointer
        } else {
            StructKind::Simple
        })
    }

    /// Whether padding separates the fixed part of a structure from its
    /// trailing conformant member
    fn conformant_padding(&self, fields: &[Field], stack: &mut Vec<TypeId>) -> bool {
        let Some((_, fixed)) = fields.split_last() else {
            return false;
        };
        let (_, fixed_end, _) = self.fold_fields(fixed, stack);
        let (_, end, align) = self.fold_fields(fields, stack);
        align_up(end, align) != fixed_end
    }

    fn element_has_pointers(&self, element: TypeId, stack: &mut Vec<TypeId>) -> Result<bool> {
        Ok(
            match self.classify_guarded(element, &[], ClassifyFlags::empty(), stack)? {
                Shape::Pointer(_) | Shape::InterfacePointer => true,
                Shape::Struct(kind) => matches!(
                    kind,
                    StructKind::Pointer | StructKind::ConformantPointer
                ),
                Shape::Array(_) => match &self.arena.get(self.arena.resolve(element)).kind {
                    TypeKind::Array(inner) => self.element_has_pointers(inner.element, stack)?,
                    _ => false,
                },
                _ => false,
            },
        )
    }

    fn array_kind_guarded(&self, array: &ArrayType, stack: &mut Vec<TypeId>) -> Result<ArrayKind> {
        let ps = self.pointer_size();
        let element = self.classify_guarded(array.element, &[], ClassifyFlags::empty(), stack)?;
        let bogus = match element {
            Shape::UserType
            | Shape::InterfacePointer
            | Shape::Union(_)
            | Shape::Enum(EnumWidth::Enum16)
            | Shape::ContextHandle
            | Shape::String => true,
            Shape::Pointer(kind) => kind == PointerKind::Ref || ps != 4,
            Shape::Basic(basic) => basic.is_int3264() && ps != 4,
            Shape::Enum(EnumWidth::Enum32) | Shape::Void => false,
            Shape::Struct(kind) => !matches!(kind, StructKind::Simple | StructKind::Pointer),
            Shape::Array(kind) => !matches!(kind, ArrayKind::Fixed),
            Shape::Invalid => {
                return Err(MidlError::unsupported(
                    self.arena.name_of(array.element),
                    "array element type cannot be described",
                ));
            }
        };
        Ok(if bogus {
            ArrayKind::Bogus
        } else {
            match (array.is_conformant(), array.is_varying()) {
                (true, true) => ArrayKind::ConformantVarying,
                (true, false) => ArrayKind::Conformant,
                (false, true) => ArrayKind::Varying,
                (false, false) => ArrayKind::Fixed,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Expr;
    use crate::types::{TypeArena, UnionArm};
    use crate::CompileOptions;

    fn struct_shape(arena: &TypeArena, ty: TypeId, options: CompileOptions) -> Shape {
        TypeEnv::new(arena, options)
            .classify(ty, &[], ClassifyFlags::empty())
            .unwrap()
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
            struct_shape(&arena, s, CompileOptions::x86()),
            Shape::Struct(StructKind::Conformant)
        );
    }

    #[test]
    fn test_escalation_to_bogus() {
        let mut arena = TypeArena::new();
        let long = arena.basic(BasicType::Long);
        let short = arena.basic(BasicType::Short);
        let wire = arena.basic(BasicType::Long);
        let user = arena.alias("USER", long, vec![Attribute::WireMarshal(wire)]);
        let u = arena.union("u", vec![UnionArm::case(vec![1], Some(Field::new("a", long)))], vec![]);
        let e16 = arena.enumeration("e", vec![("a", 0)], vec![]);

        let simple = arena.structure("simple", vec![Field::new("a", long), Field::new("b", short)]);
        assert_eq!(
            struct_shape(&arena, simple, CompileOptions::x86()),
            Shape::Struct(StructKind::Simple)
        );

        for extra in [user, u, e16] {
            let s = arena.structure(
                "escalated",
                vec![
                    Field::new("a", long),
                    Field::new("b", short),
                    Field::new("x", extra).with_attrs(vec![Attribute::SwitchIs(Expr::ident("a"))]),
                ],
            );
            assert_eq!(
                struct_shape(&arena, s, CompileOptions::x86()),
                Shape::Struct(StructKind::Bogus)
            );
        }
    }

    #[test]
    fn test_pointer_structs_by_architecture() {
        let mut arena = TypeArena::new();
        let long = arena.basic(BasicType::Long);
        let p = arena.pointer(long, vec![]);
        let s = arena.structure("s", vec![Field::new("a", long), Field::new("p", p)]);
        assert_eq!(
            struct_shape(&arena, s, CompileOptions::x86()),
            Shape::Struct(StructKind::Pointer)
        );
        assert_eq!(
            struct_shape(&arena, s, CompileOptions::x64()),
            Shape::Struct(StructKind::Bogus)
        );

        let r = arena.pointer(long, vec![Attribute::Ref]);
        let s = arena.structure("s", vec![Field::new("r", r)]);
        assert_eq!(
            struct_shape(&arena, s, CompileOptions::x86()),
            Shape::Struct(StructKind::Bogus)
        );
    }

    #[test]
    fn test_padding_before_conformant_array() {
        let mut arena = TypeArena::new();
        let ch = arena.basic(BasicType::Char);
        let long = arena.basic(BasicType::Long);
        let data = arena.conformant_array(long, Expr::ident("n"));
        let s = arena.structure("s", vec![Field::new("n", ch), Field::new("data", data)]);
        assert_eq!(
            struct_shape(&arena, s, CompileOptions::x86()),
            Shape::Struct(StructKind::Bogus)
        );
    }

    #[test]
    fn test_conformant_array_must_be_last() {
        let mut arena = TypeArena::new();
        let long = arena.basic(BasicType::Long);
        let data = arena.conformant_array(long, Expr::ident("n"));
        let s = arena.structure(
            "s",
            vec![
                Field::new("n", long),
                Field::new("data", data),
                Field::new("tail", long),
            ],
        );
        let err = TypeEnv::new(&arena, CompileOptions::x86())
            .classify(s, &[], ClassifyFlags::empty())
            .unwrap_err();
        assert!(matches!(err, MidlError::Unsupported { ref name, .. } if name == "data"));
    }

    #[test]
    fn test_pointer_kind_resolution() {
        let mut arena = TypeArena::new();
        let long = arena.basic(BasicType::Long);
        let p = arena.pointer(long, vec![]);
        let full = arena.alias("PLONG", p, vec![Attribute::Ptr]);
        let env = TypeEnv::new(&arena, CompileOptions::x86());

        assert_eq!(env.pointer_kind(p, &[], true), PointerKind::Ref);
        assert_eq!(env.pointer_kind(p, &[], false), PointerKind::Unique);
        assert_eq!(env.pointer_kind(full, &[], true), PointerKind::Full);
        assert_eq!(
            env.pointer_kind(full, &[Attribute::Unique], true),
            PointerKind::Unique
        );
    }

    #[test]
    fn test_priority_order() {
        let mut arena = TypeArena::new();
        let void = arena.void();
        let vp = arena.pointer(void, vec![]);
        let ctx = arena.alias("ctx_t", vp, vec![Attribute::ContextHandle]);
        let ctx_ptr = arena.pointer(ctx, vec![]);
        let ch = arena.basic(BasicType::Char);
        let str_ptr = arena.pointer(ch, vec![]);
        let env = TypeEnv::new(&arena, CompileOptions::x86());

        assert_eq!(
            env.classify(ctx, &[], ClassifyFlags::TOP_LEVEL).unwrap(),
            Shape::ContextHandle
        );
        assert_eq!(
            env.classify(ctx_ptr, &[Attribute::Out], ClassifyFlags::TOP_LEVEL).unwrap(),
            Shape::ContextHandle
        );
        assert_eq!(
            env.classify(str_ptr, &[Attribute::String], ClassifyFlags::TOP_LEVEL).unwrap(),
            Shape::String
        );
        assert_eq!(
            env.classify(
                str_ptr,
                &[Attribute::String],
                ClassifyFlags::TOP_LEVEL | ClassifyFlags::IGNORE_STRINGS
            )
            .unwrap(),
            Shape::Pointer(PointerKind::Ref)
        );
        assert_eq!(
            env.classify(vp, &[Attribute::IidIs(Expr::ident("riid"))], ClassifyFlags::empty())
                .unwrap(),
            Shape::InterfacePointer
        );
    }

    #[test]
    fn test_pointer_form_arrays() {
        let mut arena = TypeArena::new();
        let long = arena.basic(BasicType::Long);
        let sized = arena.sized_pointer(long, Some(Expr::ident("n")), None);
        let env = TypeEnv::new(&arena, CompileOptions::x86());
        assert_eq!(
            env.classify(sized, &[], ClassifyFlags::TOP_LEVEL).unwrap(),
            Shape::Array(ArrayKind::Conformant)
        );
        assert_eq!(
            env.classify(sized, &[Attribute::Unique], ClassifyFlags::TOP_LEVEL).unwrap(),
            Shape::Pointer(PointerKind::Unique)
        );
        assert_eq!(
            env.classify(sized, &[], ClassifyFlags::empty()).unwrap(),
            Shape::Pointer(PointerKind::Unique)
        );
    }

    #[test]
    fn test_by_value_recursion_rejected() {
        let mut arena = TypeArena::new();
        let a = arena.declare_struct("a");
        let b = arena.structure("b", vec![Field::new("a", a)]);
        arena.define_struct(a, vec![Field::new("b", b)]);
        let err = TypeEnv::new(&arena, CompileOptions::x86())
            .classify(a, &[], ClassifyFlags::empty())
            .unwrap_err();
        assert!(matches!(err, MidlError::Unsupported { .. }));
    }

    #[test]
    fn test_classification_is_idempotent() {
        let mut arena = TypeArena::new();
        let long = arena.basic(BasicType::Long);
        let e = arena.enumeration("e", vec![("a", 0)], vec![Attribute::V1Enum]);
        let s = arena.structure("s", vec![Field::new("a", long), Field::new("e", e)]);
        let env = TypeEnv::new(&arena, CompileOptions::x86());
        let first = env.classify(s, &[], ClassifyFlags::empty()).unwrap();
        let second = env.classify(s, &[], ClassifyFlags::empty()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, Shape::Struct(StructKind::Simple));
    }
}

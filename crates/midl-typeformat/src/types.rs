//! Resolved type graph
//!
//! Types live in a [`TypeArena`] and refer to each other through [`TypeId`]
//! handles, so self-referential and mutually-referential declarations are
//! plain data. The arena is read-only once built; everything the compiler
//! learns about a type is kept in the compilation context instead.

use crate::expr::Expr;
use crate::CompileOptions;
use ndr_format::{FormatChar, Guid};

/// Handle of a node in a [`TypeArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Pointer kind (determines wire representation)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PointerKind {
    /// [ref] - non-null reference
    Ref,
    /// [unique] - nullable, no aliasing
    #[default]
    Unique,
    /// [ptr] - nullable, aliasing allowed
    Full,
}

impl PointerKind {
    pub fn format_char(self) -> FormatChar {
        match self {
            Self::Ref => FormatChar::RefPointer,
            Self::Unique => FormatChar::UniquePointer,
            Self::Full => FormatChar::FullPointer,
        }
    }
}

/// Base (primitive) types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BasicType {
    Boolean,
    Byte,
    Char,
    WChar,
    Small,
    USmall,
    Short,
    UShort,
    Long,
    ULong,
    /// Pointer-sized signed integer
    Int3264,
    /// Pointer-sized unsigned integer
    UInt3264,
    Hyper,
    Float,
    Double,
    ErrorStatusT,
    HandleT,
}

impl BasicType {
    /// Format character describing the type on the wire
    pub fn format_char(self, options: &CompileOptions) -> FormatChar {
        let wide = options.pointer_size() == 8;
        match self {
            Self::Boolean | Self::Byte => FormatChar::Byte,
            Self::Char => FormatChar::Char,
            Self::WChar => FormatChar::WChar,
            Self::Small => FormatChar::Small,
            Self::USmall => FormatChar::USmall,
            Self::Short => FormatChar::Short,
            Self::UShort => FormatChar::UShort,
            Self::Long => FormatChar::Long,
            Self::ULong => FormatChar::ULong,
            Self::Int3264 if wide => FormatChar::Int3264,
            Self::Int3264 => FormatChar::Long,
            Self::UInt3264 if wide => FormatChar::UInt3264,
            Self::UInt3264 => FormatChar::ULong,
            Self::Hyper => FormatChar::Hyper,
            Self::Float => FormatChar::Float,
            Self::Double => FormatChar::Double,
            Self::ErrorStatusT => FormatChar::ErrorStatusT,
            Self::HandleT => FormatChar::Ignore,
        }
    }

    /// In-memory size, which is also the alignment
    pub fn size(self, pointer_size: u32) -> u32 {
        match self {
            Self::Boolean | Self::Byte | Self::Char | Self::Small | Self::USmall => 1,
            Self::WChar | Self::Short | Self::UShort => 2,
            Self::Long | Self::ULong | Self::Float | Self::ErrorStatusT => 4,
            Self::Hyper | Self::Double => 8,
            Self::Int3264 | Self::UInt3264 | Self::HandleT => pointer_size,
        }
    }

    /// Whether the in-memory size differs from the 4-byte wire size
    pub fn is_int3264(self) -> bool {
        matches!(self, Self::Int3264 | Self::UInt3264)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Byte => "byte",
            Self::Char => "char",
            Self::WChar => "wchar_t",
            Self::Small => "small",
            Self::USmall => "unsigned small",
            Self::Short => "short",
            Self::UShort => "unsigned short",
            Self::Long => "long",
            Self::ULong => "unsigned long",
            Self::Int3264 => "__int3264",
            Self::UInt3264 => "unsigned __int3264",
            Self::Hyper => "hyper",
            Self::Float => "float",
            Self::Double => "double",
            Self::ErrorStatusT => "error_status_t",
            Self::HandleT => "handle_t",
        }
    }
}

/// Attribute (in square brackets)
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    /// [in]
    In,
    /// [out]
    Out,
    /// [retval]
    Retval,
    /// [string]
    String,
    /// [ref]
    Ref,
    /// [unique]
    Unique,
    /// [ptr]
    Ptr,
    /// [context_handle]
    ContextHandle,
    /// [strict_context_handle]
    StrictContextHandle,
    /// [switch_is(expr)]
    SwitchIs(Expr),
    /// [switch_type(type)]
    SwitchType(TypeId),
    /// [iid_is(expr)]
    IidIs(Expr),
    /// [wire_marshal(type)]
    WireMarshal(TypeId),
    /// [pointer_default(kind)]
    PointerDefault(PointerKind),
    /// [v1_enum] - 32-bit enum
    V1Enum,
    /// [local] - no marshaling
    Local,
    /// [object] - COM interface
    Object,
    /// [uuid(xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx)]
    Uuid(Guid),
}

/// Parameter direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamDirection {
    #[default]
    In,
    Out,
    InOut,
}

impl ParamDirection {
    pub fn is_in(self) -> bool {
        matches!(self, Self::In | Self::InOut)
    }

    pub fn is_out(self) -> bool {
        matches!(self, Self::Out | Self::InOut)
    }
}

impl Attribute {
    /// Get direction from attributes; no direction attribute means [in]
    pub fn get_direction(attrs: &[Attribute]) -> ParamDirection {
        let has_in = attrs.iter().any(|a| matches!(a, Attribute::In));
        let has_out = attrs.iter().any(|a| matches!(a, Attribute::Out));
        match (has_in, has_out) {
            (true, true) => ParamDirection::InOut,
            (false, true) => ParamDirection::Out,
            _ => ParamDirection::In,
        }
    }

    /// Get pointer kind from attributes
    pub fn get_pointer_kind(attrs: &[Attribute]) -> Option<PointerKind> {
        attrs.iter().find_map(|attr| match attr {
            Attribute::Ref => Some(PointerKind::Ref),
            Attribute::Unique => Some(PointerKind::Unique),
            Attribute::Ptr => Some(PointerKind::Full),
            _ => None,
        })
    }

    pub fn has(attrs: &[Attribute], wanted: &Attribute) -> bool {
        attrs.iter().any(|a| a == wanted)
    }

    pub fn get_switch_is(attrs: &[Attribute]) -> Option<&Expr> {
        attrs.iter().find_map(|attr| match attr {
            Attribute::SwitchIs(expr) => Some(expr),
            _ => None,
        })
    }

    pub fn get_iid_is(attrs: &[Attribute]) -> Option<&Expr> {
        attrs.iter().find_map(|attr| match attr {
            Attribute::IidIs(expr) => Some(expr),
            _ => None,
        })
    }

    pub fn get_switch_type(attrs: &[Attribute]) -> Option<TypeId> {
        attrs.iter().find_map(|attr| match attr {
            Attribute::SwitchType(ty) => Some(*ty),
            _ => None,
        })
    }

    pub fn get_wire_marshal(attrs: &[Attribute]) -> Option<TypeId> {
        attrs.iter().find_map(|attr| match attr {
            Attribute::WireMarshal(ty) => Some(*ty),
            _ => None,
        })
    }

    pub fn get_pointer_default(attrs: &[Attribute]) -> Option<PointerKind> {
        attrs.iter().find_map(|attr| match attr {
            Attribute::PointerDefault(kind) => Some(*kind),
            _ => None,
        })
    }

    pub fn get_uuid(attrs: &[Attribute]) -> Option<Guid> {
        attrs.iter().find_map(|attr| match attr {
            Attribute::Uuid(guid) => Some(*guid),
            _ => None,
        })
    }
}

/// Named, attributed binding of a type: struct field, union arm or parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: TypeId,
    pub attrs: Vec<Attribute>,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: TypeId) -> Self {
        Self {
            name: name.into(),
            ty,
            attrs: Vec::new(),
        }
    }

    pub fn with_attrs(mut self, attrs: Vec<Attribute>) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn direction(&self) -> ParamDirection {
        Attribute::get_direction(&self.attrs)
    }
}

/// Union arm (case)
#[derive(Debug, Clone, PartialEq)]
pub struct UnionArm {
    /// `case` labels; constant expressions
    pub cases: Vec<Expr>,
    /// The arm is the `default` arm
    pub is_default: bool,
    /// None for an empty arm
    pub field: Option<Field>,
}

impl UnionArm {
    pub fn case(values: Vec<i64>, field: Option<Field>) -> Self {
        Self {
            cases: values.into_iter().map(Expr::Const).collect(),
            is_default: false,
            field,
        }
    }

    pub fn default(field: Option<Field>) -> Self {
        Self {
            cases: Vec::new(),
            is_default: true,
            field,
        }
    }
}

/// Enum variant
#[derive(Debug, Clone, PartialEq)]
pub struct EnumVariant {
    pub name: String,
    pub value: i64,
}

/// How an array's storage is declared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayForm {
    /// `T a[N]` or `T a[]`: elements are stored inline
    Declared,
    /// `[size_is(n)] T *p`: memory holds a pointer to the elements
    Pointer,
}

/// Array node; one per declaration, since size/length expressions are
/// specific to the declaration that carries them
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayType {
    pub element: TypeId,
    pub form: ArrayForm,
    /// Declared dimension; None for `[]` and pointer-form arrays
    pub dim: Option<u32>,
    pub size_is: Option<Expr>,
    pub length_is: Option<Expr>,
}

impl ArrayType {
    pub fn is_conformant(&self) -> bool {
        self.size_is.is_some() || self.dim.is_none()
    }

    pub fn is_varying(&self) -> bool {
        self.length_is.is_some()
    }

    pub fn is_declared(&self) -> bool {
        self.form == ArrayForm::Declared
    }
}

/// Function (operation) signature
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionType {
    pub ret: TypeId,
    pub params: Vec<Field>,
}

/// Shape-specific part of a type node
#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Void,
    Basic(BasicType),
    Enum(Vec<EnumVariant>),
    Pointer(TypeId),
    Array(ArrayType),
    Struct(Vec<Field>),
    /// Union carrying its own discriminant
    EncapsulatedUnion {
        switch: Field,
        arms: Vec<UnionArm>,
    },
    /// Union discriminated by a sibling field or parameter
    Union(Vec<UnionArm>),
    Interface {
        base: Option<TypeId>,
        functions: Vec<TypeId>,
    },
    Alias(TypeId),
    Function(FunctionType),
    Module(Vec<TypeId>),
    Coclass(Vec<TypeId>),
}

/// A type node
#[derive(Debug, Clone, PartialEq)]
pub struct TypeNode {
    pub name: Option<String>,
    pub attrs: Vec<Attribute>,
    pub kind: TypeKind,
}

impl TypeNode {
    pub fn new(kind: TypeKind) -> Self {
        Self {
            name: None,
            attrs: Vec::new(),
            kind,
        }
    }

    pub fn named(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: Some(name.into()),
            attrs: Vec::new(),
            kind,
        }
    }

    pub fn with_attrs(mut self, attrs: Vec<Attribute>) -> Self {
        self.attrs = attrs;
        self
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }
}

/// Arena owning every type node of a compilation
#[derive(Debug, Clone, Default)]
pub struct TypeArena {
    nodes: Vec<TypeNode>,
}

impl TypeArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: TypeNode) -> TypeId {
        let id = TypeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: TypeId) -> &TypeNode {
        &self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn void(&mut self) -> TypeId {
        self.add(TypeNode::named("void", TypeKind::Void))
    }

    pub fn basic(&mut self, basic: BasicType) -> TypeId {
        self.add(TypeNode::named(basic.as_str(), TypeKind::Basic(basic)))
    }

    pub fn pointer(&mut self, referent: TypeId, attrs: Vec<Attribute>) -> TypeId {
        self.add(TypeNode::new(TypeKind::Pointer(referent)).with_attrs(attrs))
    }

    pub fn alias(&mut self, name: &str, target: TypeId, attrs: Vec<Attribute>) -> TypeId {
        self.add(TypeNode::named(name, TypeKind::Alias(target)).with_attrs(attrs))
    }

    pub fn array(&mut self, array: ArrayType) -> TypeId {
        self.add(TypeNode::new(TypeKind::Array(array)))
    }

    /// `T a[dim]`
    pub fn fixed_array(&mut self, element: TypeId, dim: u32) -> TypeId {
        self.array(ArrayType {
            element,
            form: ArrayForm::Declared,
            dim: Some(dim),
            size_is: None,
            length_is: None,
        })
    }

    /// `[size_is(size_is)] T a[]`
    pub fn conformant_array(&mut self, element: TypeId, size_is: Expr) -> TypeId {
        self.array(ArrayType {
            element,
            form: ArrayForm::Declared,
            dim: None,
            size_is: Some(size_is),
            length_is: None,
        })
    }

    /// `[size_is(size_is), length_is(length_is)] T *p`
    pub fn sized_pointer(
        &mut self,
        element: TypeId,
        size_is: Option<Expr>,
        length_is: Option<Expr>,
    ) -> TypeId {
        self.array(ArrayType {
            element,
            form: ArrayForm::Pointer,
            dim: None,
            size_is,
            length_is,
        })
    }

    /// Declare a struct whose fields are supplied later by
    /// [`define_struct`](Self::define_struct), for self-referential types
    pub fn declare_struct(&mut self, name: &str) -> TypeId {
        self.add(TypeNode::named(name, TypeKind::Struct(Vec::new())))
    }

    pub fn define_struct(&mut self, id: TypeId, fields: Vec<Field>) {
        self.nodes[id.index()].kind = TypeKind::Struct(fields);
    }

    pub fn structure(&mut self, name: &str, fields: Vec<Field>) -> TypeId {
        self.add(TypeNode::named(name, TypeKind::Struct(fields)))
    }

    pub fn enumeration(
        &mut self,
        name: &str,
        variants: Vec<(&str, i64)>,
        attrs: Vec<Attribute>,
    ) -> TypeId {
        let variants = variants
            .into_iter()
            .map(|(name, value)| EnumVariant {
                name: name.to_string(),
                value,
            })
            .collect();
        self.add(TypeNode::named(name, TypeKind::Enum(variants)).with_attrs(attrs))
    }

    pub fn union(&mut self, name: &str, arms: Vec<UnionArm>, attrs: Vec<Attribute>) -> TypeId {
        self.add(TypeNode::named(name, TypeKind::Union(arms)).with_attrs(attrs))
    }

    pub fn encapsulated_union(&mut self, name: &str, switch: Field, arms: Vec<UnionArm>) -> TypeId {
        self.add(TypeNode::named(
            name,
            TypeKind::EncapsulatedUnion { switch, arms },
        ))
    }

    pub fn function(
        &mut self,
        name: &str,
        ret: TypeId,
        params: Vec<Field>,
        attrs: Vec<Attribute>,
    ) -> TypeId {
        self.add(
            TypeNode::named(name, TypeKind::Function(FunctionType { ret, params }))
                .with_attrs(attrs),
        )
    }

    /// Declare an interface; functions are attached with
    /// [`add_function`](Self::add_function)
    pub fn interface(&mut self, name: &str, base: Option<TypeId>, attrs: Vec<Attribute>) -> TypeId {
        self.add(
            TypeNode::named(
                name,
                TypeKind::Interface {
                    base,
                    functions: Vec::new(),
                },
            )
            .with_attrs(attrs),
        )
    }

    pub fn add_function(&mut self, interface: TypeId, function: TypeId) {
        if let TypeKind::Interface { functions, .. } = &mut self.nodes[interface.index()].kind {
            functions.push(function);
        }
    }

    pub fn module(&mut self, name: &str, functions: Vec<TypeId>) -> TypeId {
        self.add(TypeNode::named(name, TypeKind::Module(functions)))
    }

    pub fn coclass(&mut self, name: &str, interfaces: Vec<TypeId>) -> TypeId {
        self.add(TypeNode::named(name, TypeKind::Coclass(interfaces)))
    }

    /// Follow aliases to the first non-alias node
    pub fn resolve(&self, mut id: TypeId) -> TypeId {
        while let TypeKind::Alias(target) = self.get(id).kind {
            id = target;
        }
        id
    }

    /// Every node on the alias chain starting at `id`, ending with the
    /// resolved node
    pub fn alias_chain(&self, id: TypeId) -> AliasChain<'_> {
        AliasChain {
            arena: self,
            next: Some(id),
        }
    }

    /// Whether `attr` appears anywhere on the alias chain of `id`
    pub fn chain_has(&self, id: TypeId, attr: &Attribute) -> bool {
        self.alias_chain(id)
            .any(|(_, node)| Attribute::has(&node.attrs, attr))
    }

    /// Name of a type for diagnostics
    pub fn name_of(&self, id: TypeId) -> &str {
        self.get(id).display_name()
    }
}

/// Iterator over an alias chain, see [`TypeArena::alias_chain`]
pub struct AliasChain<'a> {
    arena: &'a TypeArena,
    next: Option<TypeId>,
}

impl<'a> Iterator for AliasChain<'a> {
    type Item = (TypeId, &'a TypeNode);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let node = self.arena.get(id);
        self.next = match node.kind {
            TypeKind::Alias(target) => Some(target),
            _ => None,
        };
        Some((id, node))
    }
}

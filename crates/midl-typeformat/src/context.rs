//! Compilation context
//!
//! Everything a run learns or produces lives here rather than in the type
//! graph: per-type emission state, the expression-evaluation table, the
//! user-type registry, both format string writers and the per-parameter
//! records the code generator reads back.

use crate::classify::Shape;
use crate::correlation::ExprEvalTable;
use crate::types::{Field, PointerKind, TypeArena, TypeId, TypeKind};
use crate::{CompileOptions, TypeEnv};
use ndr_format::{Bytes, FormatWriter, Label, Target};
use std::collections::HashMap;
use tracing::trace;

pub use crate::correlation::ExprEvalEntry;

/// Emission state of an annotated type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum EmitState {
    #[default]
    Unvisited,
    /// Being emitted; references go through the label until it is bound
    InProgress(Label),
    /// Emitted at this offset
    Done(u32),
}

/// Correlation scope: the structure whose fields correlation identifiers
/// name, and where in it the item being described sits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Scope {
    pub structure: TypeId,
    pub field_offset: u32,
}

/// Which value of a function a record describes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamSlot {
    Param(usize),
    Return,
}

/// What the drivers recorded for one parameter or return value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamRecord {
    pub function: TypeId,
    pub slot: ParamSlot,
    pub shape: Shape,
    /// Offset in the type format string; None for scalars
    pub type_offset: Option<u32>,
}

/// A function the drivers compiled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompiledFunction {
    pub function: TypeId,
    pub interface: TypeId,
    /// Offset of the function's directives in the procedure format string
    pub proc_offset: u32,
}

/// Wire-marshaled types in first-emission order
#[derive(Debug, Clone, Default)]
pub(crate) struct UserTypeRegistry {
    names: Vec<String>,
    index: HashMap<String, u32>,
}

impl UserTypeRegistry {
    /// Index of `name`, registering it on first sight
    pub fn register(&mut self, name: &str) -> u32 {
        if let Some(&index) = self.index.get(name) {
            return index;
        }
        let index = self.names.len() as u32;
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), index);
        index
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// One compilation run over a type arena
#[derive(Debug)]
pub struct Compilation<'a> {
    pub(crate) arena: &'a TypeArena,
    pub(crate) options: CompileOptions,
    /// Embedded pointer default of the interface being compiled
    pub(crate) pointer_default: PointerKind,
    pub(crate) tfs: FormatWriter,
    pub(crate) pfs: FormatWriter,
    annotations: HashMap<TypeId, EmitState>,
    /// Trailing conformant array records of emitted conformant structures
    pub(crate) conformant_arrays: HashMap<TypeId, Target>,
    pub(crate) scope: Option<Scope>,
    /// Function whose parameters are being emitted
    pub(crate) function: Option<TypeId>,
    pub(crate) expr_table: ExprEvalTable,
    pub(crate) user_types: UserTypeRegistry,
    pub(crate) params: Vec<ParamRecord>,
    pub(crate) functions: Vec<CompiledFunction>,
    pub(crate) type_format_string: Bytes,
    pub(crate) proc_format_string: Bytes,
}

impl<'a> Compilation<'a> {
    pub fn new(arena: &'a TypeArena, options: CompileOptions) -> Self {
        let mut compilation = Self {
            arena,
            options,
            pointer_default: options.pointer_default,
            tfs: FormatWriter::new(),
            pfs: FormatWriter::new(),
            annotations: HashMap::new(),
            conformant_arrays: HashMap::new(),
            scope: None,
            function: None,
            expr_table: ExprEvalTable::default(),
            user_types: UserTypeRegistry::default(),
            params: Vec::new(),
            functions: Vec::new(),
            type_format_string: Bytes::new(),
            proc_format_string: Bytes::new(),
        };
        compilation.reset();
        compilation
    }

    /// Forget everything learned by a previous run
    pub fn reset(&mut self) {
        self.pointer_default = self.options.pointer_default;
        self.tfs = FormatWriter::new();
        // Offset 0 never holds a record
        self.tfs.put_u8(0);
        self.pfs = FormatWriter::new();
        self.annotations.clear();
        self.conformant_arrays.clear();
        self.scope = None;
        self.function = None;
        self.expr_table = ExprEvalTable::default();
        self.user_types = UserTypeRegistry::default();
        self.params.clear();
        self.functions.clear();
        self.type_format_string = Bytes::new();
        self.proc_format_string = Bytes::new();
    }

    pub fn arena(&self) -> &'a TypeArena {
        self.arena
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Classification environment for the interface being compiled
    pub fn env(&self) -> TypeEnv<'a> {
        TypeEnv {
            arena: self.arena,
            options: self.options,
            pointer_default: self.pointer_default,
        }
    }

    /// Classification environment for a compiled function's interface
    pub(crate) fn env_for(&self, function: &CompiledFunction) -> TypeEnv<'a> {
        TypeEnv {
            pointer_default: interface_pointer_default(self.arena, function.interface)
                .unwrap_or(self.options.pointer_default),
            ..self.env()
        }
    }

    pub fn type_format_string(&self) -> &Bytes {
        &self.type_format_string
    }

    pub fn proc_format_string(&self) -> &Bytes {
        &self.proc_format_string
    }

    /// Expression-evaluation routines, indexed by callback index
    pub fn expr_eval_routines(&self) -> &[ExprEvalEntry] {
        self.expr_table.entries()
    }

    /// Wire-marshaled type names, indexed by routine index
    pub fn user_types(&self) -> &[String] {
        self.user_types.names()
    }

    pub fn params(&self) -> &[ParamRecord] {
        &self.params
    }

    pub fn functions(&self) -> &[CompiledFunction] {
        &self.functions
    }

    pub fn param_record(&self, function: TypeId, slot: ParamSlot) -> Option<&ParamRecord> {
        self.params
            .iter()
            .find(|r| r.function == function && r.slot == slot)
    }

    /// Offset of an annotated type, once it has been emitted
    pub fn type_offset(&self, ty: TypeId) -> Option<u32> {
        match self.state(ty) {
            EmitState::Done(offset) => Some(offset),
            _ => None,
        }
    }

    pub(crate) fn state(&self, ty: TypeId) -> EmitState {
        self.annotations.get(&ty).copied().unwrap_or_default()
    }

    /// Where an annotated type is, if it has been reached before
    pub(crate) fn annotated(&self, ty: TypeId) -> Option<Target> {
        match self.state(ty) {
            EmitState::Unvisited => None,
            EmitState::InProgress(label) => {
                trace!(ty = self.arena.name_of(ty), label = label.index(), "forward reference");
                Some(Target::Label(label))
            }
            EmitState::Done(offset) => {
                trace!(ty = self.arena.name_of(ty), offset, "back-reference");
                Some(Target::At(offset))
            }
        }
    }

    /// Mark a type In-Progress
    pub(crate) fn begin(&mut self, ty: TypeId) -> Label {
        let label = self.tfs.new_label();
        self.annotations.insert(ty, EmitState::InProgress(label));
        label
    }

    /// Mark a type Done at `offset`, patching references made while it was
    /// In-Progress
    pub(crate) fn finish(&mut self, ty: TypeId, label: Label, offset: u32) -> crate::Result<()> {
        self.tfs.bind(label, offset)?;
        self.annotations.insert(ty, EmitState::Done(offset));
        Ok(())
    }

    /// Record a type emitted without an In-Progress phase
    pub(crate) fn done(&mut self, ty: TypeId, offset: u32) {
        self.annotations.insert(ty, EmitState::Done(offset));
    }

    /// Fields of a structure node
    pub(crate) fn struct_fields(&self, ty: TypeId) -> Option<&'a [Field]> {
        match &self.arena.get(self.arena.resolve(ty)).kind {
            TypeKind::Struct(fields) => Some(fields),
            _ => None,
        }
    }
}

pub(crate) fn interface_pointer_default(arena: &TypeArena, interface: TypeId) -> Option<PointerKind> {
    crate::types::Attribute::get_pointer_default(&arena.get(interface).attrs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_order() {
        let mut registry = UserTypeRegistry::default();
        assert_eq!(registry.register("BSTR"), 0);
        assert_eq!(registry.register("HWND"), 1);
        assert_eq!(registry.register("BSTR"), 0);
        assert_eq!(registry.names(), &["BSTR".to_string(), "HWND".to_string()]);
    }

    #[test]
    fn test_reset_restores_leading_pad() {
        let arena = TypeArena::new();
        let mut compilation = Compilation::new(&arena, CompileOptions::default());
        compilation.tfs.put_u32(0xdead_beef);
        compilation.user_types.register("BSTR");
        compilation.reset();
        assert_eq!(compilation.tfs.as_bytes(), &[0]);
        assert!(compilation.user_types().is_empty());
    }

    #[test]
    fn test_state_transitions() {
        let mut arena = TypeArena::new();
        let s = arena.structure("s", vec![]);
        let mut compilation = Compilation::new(&arena, CompileOptions::default());
        assert_eq!(compilation.state(s), EmitState::Unvisited);
        assert_eq!(compilation.annotated(s), None);

        let label = compilation.begin(s);
        assert_eq!(compilation.annotated(s), Some(Target::Label(label)));

        compilation.finish(s, label, 1).unwrap();
        assert_eq!(compilation.annotated(s), Some(Target::At(1)));
        assert_eq!(compilation.type_offset(s), Some(1));
    }
}

//! NDR type format string compiler
//!
//! This crate turns a resolved, attributed type graph into the two binary
//! descriptors a generic NDR marshaling engine interprets, plus the stub code
//! that drives that engine.
//!
//! # Architecture
//!
//! The compiler pipeline consists of:
//! 1. Classification: decide the structural shape of every type use
//! 2. Layout: memory size and alignment under the target ABI
//! 3. Emission: write type records into the Type Format String, resolving
//!    conformance expressions and cyclic references
//! 4. Drivers: walk interfaces and functions, emitting parameter directives
//!    into the Procedure Format String
//! 5. Code generation: per-parameter buffer-size/marshal/unmarshal/free calls
//!    into the runtime
//!
//! # Example
//!
//! ```ignore
//! use midl_typeformat::{compile, CompileOptions};
//! use midl_typeformat::types::{BasicType, Field, TypeArena};
//!
//! let mut arena = TypeArena::new();
//! let long = arena.basic(BasicType::Long);
//! let iface = arena.interface("ICalculator", None, vec![]);
//! let add = arena.function(
//!     "Add",
//!     long,
//!     vec![Field::new("a", long), Field::new("b", long)],
//!     vec![],
//! );
//! arena.add_function(iface, add);
//!
//! let result = compile(&arena, &[iface], &CompileOptions::default())?;
//! println!("{}", result.rust_code);
//! ```

pub mod classify;
pub mod codegen;
pub mod expr;
pub mod layout;
pub mod types;
mod context;
mod correlation;
mod driver;
mod emit;
mod error;

pub use classify::{ArrayKind, ClassifyFlags, EnumWidth, Shape, StructKind, UnionKind};
pub use codegen::{generate, Pass, Phase};
pub use context::{Compilation, CompiledFunction, ExprEvalEntry, ParamRecord, ParamSlot};
pub use error::{ErrorStatus, MidlError, Result};
pub use ndr_format::Bytes;

use types::{PointerKind, TypeArena, TypeId, TypeKind};

/// Target architecture; decides the pointer width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Architecture {
    #[default]
    X86,
    X64,
}

impl Architecture {
    pub fn pointer_size(self) -> u32 {
        match self {
            Self::X86 => 4,
            Self::X64 => 8,
        }
    }
}

/// Wire width of enums without `[v1_enum]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnumPolicy {
    /// Enums travel as 16-bit `FC_ENUM16` unless marked `[v1_enum]`
    #[default]
    Ndr16,
    /// Every enum travels as `FC_ENUM32`
    Always32,
}

/// Compilation options
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    pub arch: Architecture,
    pub enum_policy: EnumPolicy,
    /// Pointer kind for embedded pointers when the interface has no
    /// `[pointer_default]`
    pub pointer_default: PointerKind,
}

impl CompileOptions {
    /// Options for a 32-bit target
    pub fn x86() -> Self {
        Self {
            arch: Architecture::X86,
            ..Self::default()
        }
    }

    /// Options for a 64-bit target
    pub fn x64() -> Self {
        Self {
            arch: Architecture::X64,
            ..Self::default()
        }
    }

    /// Set the enum wire policy
    pub fn with_enum_policy(mut self, policy: EnumPolicy) -> Self {
        self.enum_policy = policy;
        self
    }

    /// Set the fallback embedded pointer kind
    pub fn with_pointer_default(mut self, kind: PointerKind) -> Self {
        self.pointer_default = kind;
        self
    }

    pub fn pointer_size(&self) -> u32 {
        self.arch.pointer_size()
    }
}

/// What classification and layout need to know besides the type itself
#[derive(Debug, Clone, Copy)]
pub struct TypeEnv<'a> {
    pub arena: &'a TypeArena,
    pub options: CompileOptions,
    /// Pointer kind of embedded pointers in the interface being compiled
    pub pointer_default: PointerKind,
}

impl<'a> TypeEnv<'a> {
    pub fn new(arena: &'a TypeArena, options: CompileOptions) -> Self {
        Self {
            arena,
            options,
            pointer_default: options.pointer_default,
        }
    }

    pub fn pointer_size(&self) -> u32 {
        self.options.pointer_size()
    }
}

/// Compilation result
#[derive(Debug)]
pub struct CompileResult {
    pub type_format_string: Bytes,
    pub proc_format_string: Bytes,
    /// Generated Rust source code
    pub rust_code: String,
    /// Names of the compiled interfaces
    pub interfaces: Vec<String>,
}

/// Compile every interface among `statements` and generate stub code
pub fn compile(
    arena: &TypeArena,
    statements: &[TypeId],
    options: &CompileOptions,
) -> Result<CompileResult> {
    let mut compilation = Compilation::new(arena, *options);
    compilation.compile(statements, |_| true)?;
    let rust_code = codegen::generate(&compilation)?;

    let interfaces = statements
        .iter()
        .map(|&id| arena.get(id))
        .filter(|node| matches!(node.kind, TypeKind::Interface { .. }))
        .map(|node| node.display_name().to_string())
        .collect();

    Ok(CompileResult {
        type_format_string: compilation.type_format_string().clone(),
        proc_format_string: compilation.proc_format_string().clone(),
        rust_code,
        interfaces,
    })
}

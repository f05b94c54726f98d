//! Per-parameter phase code
//!
//! Every parameter that is not a fixed-width scalar is handed to the runtime
//! engine together with its type format string record; scalars are copied
//! inline.

use super::ident;
use crate::classify::{ArrayKind, ClassifyFlags, Shape, StructKind, UnionKind};
use crate::context::{Compilation, CompiledFunction, ParamSlot};
use crate::error::{MidlError, Result};
use crate::types::{Attribute, BasicType, PointerKind, TypeId, TypeKind};
use ndr_format::FormatChar;
use proc_macro2::{Ident, Literal, TokenStream};
use quote::{format_ident, quote};

/// Which values a stub pass moves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    /// `[in]` and `[in, out]` parameters
    In,
    /// `[out]` and `[in, out]` parameters
    Out,
    Return,
}

/// Runtime phase a statement belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    BufferSize,
    Marshal,
    Unmarshal,
    Free,
}

impl Phase {
    fn routine_suffix(self) -> &'static str {
        match self {
            Self::BufferSize => "buffer_size",
            Self::Marshal => "marshall",
            Self::Unmarshal => "unmarshall",
            Self::Free => "free",
        }
    }
}

/// Name the stubs give the return value
pub(crate) const RETURN_VALUE: &str = "_RetVal";

/// Rust type and wire size of a scalar format character
fn scalar_repr(fc: FormatChar) -> Option<(TokenStream, usize)> {
    Some(match fc {
        FormatChar::Byte | FormatChar::Char | FormatChar::USmall => (quote!(u8), 1),
        FormatChar::Small => (quote!(i8), 1),
        FormatChar::WChar | FormatChar::UShort => (quote!(u16), 2),
        FormatChar::Short | FormatChar::Enum16 => (quote!(i16), 2),
        FormatChar::Long | FormatChar::Enum32 => (quote!(i32), 4),
        FormatChar::ULong | FormatChar::ErrorStatusT => (quote!(u32), 4),
        FormatChar::Float => (quote!(f32), 4),
        FormatChar::Hyper => (quote!(i64), 8),
        FormatChar::Double => (quote!(f64), 8),
        _ => return None,
    })
}

impl<'a> Compilation<'a> {
    /// Statements moving one parameter (or the return value) of a compiled
    /// function through one phase of one pass. Parameters the pass does not
    /// move produce nothing.
    pub fn emit_phase_code(
        &self,
        function: &CompiledFunction,
        slot: ParamSlot,
        pass: Pass,
        phase: Phase,
    ) -> Result<TokenStream> {
        let arena = self.arena;
        let node = arena.get(function.function);
        let TypeKind::Function(func) = &node.kind else {
            return Err(MidlError::internal(format!(
                "{} is not a function",
                node.display_name()
            )));
        };
        let (name, ty, attrs, moved) = match slot {
            ParamSlot::Param(i) => {
                let param = func.params.get(i).ok_or_else(|| {
                    MidlError::internal(format!("{} has no parameter {}", node.display_name(), i))
                })?;
                let direction = param.direction();
                let moved = match pass {
                    Pass::In => direction.is_in(),
                    Pass::Out => direction.is_out(),
                    Pass::Return => false,
                };
                (param.name.as_str(), param.ty, param.attrs.as_slice(), moved)
            }
            ParamSlot::Return => (RETURN_VALUE, func.ret, node.attrs.as_slice(), pass == Pass::Return),
        };
        if !moved {
            return Ok(TokenStream::new());
        }

        let shape = self
            .env_for(function)
            .classify(ty, attrs, ClassifyFlags::TOP_LEVEL)?;
        if matches!(shape, Shape::Void | Shape::Basic(BasicType::HandleT)) {
            return Ok(TokenStream::new());
        }
        let record = self.param_record(function.function, slot).ok_or_else(|| {
            MidlError::internal(format!("{} was never compiled", name))
        })?;
        if record.shape != shape {
            return Err(MidlError::internal(format!(
                "{} classified as {:?} but described as {:?}",
                name, shape, record.shape
            )));
        }
        let value = ident(name)?;

        if shape.is_scalar() {
            return self.scalar_code(shape, &value, phase);
        }
        if shape == Shape::ContextHandle {
            return self.context_handle_code(ty, name, &value, pass, phase);
        }

        let offset = record
            .type_offset
            .ok_or_else(|| MidlError::internal(format!("{} has no type record", name)))?;
        let routine = format_ident!("{}_{}", self.routine_prefix(ty, shape)?, phase.routine_suffix());
        let offset = Literal::usize_unsuffixed(offset as usize);
        let argument = match phase {
            Phase::Unmarshal | Phase::Free => quote!(&mut args.#value),
            Phase::BufferSize | Phase::Marshal => quote!(&args.#value),
        };
        let mut code = quote! {
            ::ndr_runtime::#routine(stub_msg, #argument, &TYPE_FORMAT_STRING[#offset..]);
        };

        let deallocate = match shape {
            Shape::Array(ArrayKind::Bogus) => true,
            Shape::Pointer(kind) => pass == Pass::Return && kind != PointerKind::Ref,
            _ => false,
        };
        if phase == Phase::Free && deallocate {
            code.extend(quote! {
                if !args.#value.is_null() {
                    (stub_msg.pfn_free)(args.#value.cast());
                }
            });
        }
        Ok(code)
    }

    fn scalar_code(&self, shape: Shape, value: &Ident, phase: Phase) -> Result<TokenStream> {
        let fc = self.scalar_fc(shape)?;
        let (repr, size) = scalar_repr(fc)
            .ok_or_else(|| MidlError::internal(format!("{} has no inline copy", fc)))?;
        let size = Literal::usize_unsuffixed(size);
        Ok(match phase {
            Phase::BufferSize | Phase::Free => TokenStream::new(),
            Phase::Marshal => quote! {
                ::ndr_runtime::align_buffer(stub_msg, #size);
                ::core::ptr::write_unaligned(stub_msg.buffer.cast::<#repr>(), args.#value as _);
                stub_msg.buffer = stub_msg.buffer.add(#size);
            },
            Phase::Unmarshal => quote! {
                ::ndr_runtime::align_buffer(stub_msg, #size);
                args.#value = ::core::ptr::read_unaligned(stub_msg.buffer.cast::<#repr>()) as _;
                stub_msg.buffer = stub_msg.buffer.add(#size);
            },
        })
    }

    fn context_handle_code(
        &self,
        ty: TypeId,
        name: &str,
        value: &Ident,
        pass: Pass,
        phase: Phase,
    ) -> Result<TokenStream> {
        let arena = self.arena;
        Ok(match (pass, phase) {
            (_, Phase::BufferSize) => quote! { stub_msg.buffer_length += 20; },
            (_, Phase::Free) => TokenStream::new(),
            (Pass::In, Phase::Marshal) => quote! {
                ::ndr_runtime::client_context_marshall(stub_msg, &args.#value);
            },
            (Pass::In, Phase::Unmarshal) => quote! {
                ::ndr_runtime::server_context_unmarshall(stub_msg, &mut args.#value);
            },
            (_, Phase::Marshal) => {
                let through = match arena.get(arena.resolve(ty)).kind {
                    TypeKind::Pointer(referent) => Some(referent),
                    _ => None,
                };
                let handle = std::iter::once(ty)
                    .chain(through)
                    .find_map(|start| {
                        arena
                            .alias_chain(start)
                            .find(|(_, node)| Attribute::has(&node.attrs, &Attribute::ContextHandle))
                            .and_then(|(_, node)| node.name.as_deref())
                    })
                    .unwrap_or(name);
                let rundown = ident(&format!("{}_rundown", handle))?;
                quote! {
                    ::ndr_runtime::server_context_marshall(stub_msg, &args.#value, #rundown);
                }
            }
            (_, Phase::Unmarshal) => quote! {
                ::ndr_runtime::client_context_unmarshall(stub_msg, &mut args.#value);
            },
        })
    }

    /// Runtime routine family for a shape
    fn routine_prefix(&self, ty: TypeId, shape: Shape) -> Result<&'static str> {
        Ok(match shape {
            Shape::Pointer(_) => "pointer",
            Shape::String if !self.is_declared_array(ty) => "pointer",
            Shape::String if self.is_conformant_array(ty) => "conformant_string",
            Shape::String => "non_conformant_string",
            Shape::Array(ArrayKind::Fixed) => "fixed_array",
            Shape::Array(ArrayKind::Varying) => "varying_array",
            Shape::Array(ArrayKind::Conformant) => "conformant_array",
            Shape::Array(ArrayKind::ConformantVarying) => "conformant_varying_array",
            Shape::Array(ArrayKind::Bogus) => "complex_array",
            Shape::Struct(StructKind::Simple | StructKind::Pointer) => "simple_struct",
            Shape::Struct(StructKind::Conformant | StructKind::ConformantPointer) => {
                "conformant_struct"
            }
            Shape::Struct(StructKind::ConformantVarying) => "conformant_varying_struct",
            Shape::Struct(StructKind::Bogus) => "complex_struct",
            Shape::Union(UnionKind::Encapsulated) => "encapsulated_union",
            Shape::Union(UnionKind::NonEncapsulated) => "non_encapsulated_union",
            Shape::InterfacePointer => "interface_pointer",
            Shape::UserType => "user_marshal",
            shape => {
                return Err(MidlError::internal(format!(
                    "{:?} has no runtime routine",
                    shape
                )))
            }
        })
    }
}

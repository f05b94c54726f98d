//! Code Generation
//!
//! Renders a finished compilation as Rust source: the two format strings,
//! the expression-evaluation and user-marshal routine tables, and a client
//! and a server stub per compiled function. The argument structures the
//! stubs take (`<Function>Args`) are declared elsewhere.

mod expr_eval;
mod phases;

pub use phases::{Pass, Phase};

use crate::context::{Compilation, CompiledFunction, ParamSlot};
use crate::error::{MidlError, Result};
use crate::types::{Attribute, TypeKind};
use proc_macro2::{Ident, Literal, TokenStream};
use quote::quote;
use tracing::debug;

/// Identifier from an IDL name; keywords and malformed names are errors
pub(crate) fn ident(name: &str) -> Result<Ident> {
    syn::parse_str::<Ident>(name)
        .map_err(|e| MidlError::codegen(format!("`{}` is not a usable identifier: {}", name, e)))
}

/// Generate the stub source of a finished compilation
pub fn generate(compilation: &Compilation) -> Result<String> {
    let mut tokens = generate_imports();
    tokens.extend(format_strings(compilation));
    tokens.extend(expr_eval_routines(compilation)?);
    tokens.extend(user_marshal_routines(compilation)?);

    for function in compilation.functions() {
        tokens.extend(client_stub(compilation, function)?);
        tokens.extend(server_stub(compilation, function)?);
    }
    debug!(functions = compilation.functions().len(), "generated stubs");

    Ok(prettyplease::unparse(&syn::parse2(tokens).map_err(|e| {
        MidlError::codegen(format!("failed to parse generated code: {}", e))
    })?))
}

fn generate_imports() -> TokenStream {
    quote! {
        #[allow(unused_imports)]
        use ::ndr_runtime::{ExprEvalRoutine, StubMessage, UserMarshalRoutines};
    }
}

fn byte_array(bytes: &[u8]) -> (Literal, Vec<Literal>) {
    (
        Literal::usize_unsuffixed(bytes.len()),
        bytes.iter().map(|&b| Literal::u8_unsuffixed(b)).collect(),
    )
}

fn format_strings(compilation: &Compilation) -> TokenStream {
    let (tfs_len, tfs) = byte_array(compilation.type_format_string());
    let (pfs_len, pfs) = byte_array(compilation.proc_format_string());
    quote! {
        pub static TYPE_FORMAT_STRING: [u8; #tfs_len] = [#(#tfs),*];
        pub static PROC_FORMAT_STRING: [u8; #pfs_len] = [#(#pfs),*];
    }
}

fn expr_eval_routines(compilation: &Compilation) -> Result<TokenStream> {
    let entries = compilation.expr_eval_routines();
    let routines = entries
        .iter()
        .enumerate()
        .map(|(index, entry)| compilation.expr_eval_routine(index, entry))
        .collect::<Result<Vec<_>>>()?;
    let names = (0..entries.len()).map(expr_eval::routine_name);
    let len = Literal::usize_unsuffixed(entries.len());
    Ok(quote! {
        #(#routines)*
        pub static EXPR_EVAL_ROUTINES: [ExprEvalRoutine; #len] = [#(#names),*];
    })
}

fn user_marshal_routines(compilation: &Compilation) -> Result<TokenStream> {
    let names = compilation.user_types();
    let entries = names
        .iter()
        .map(|name| {
            let size = ident(&format!("{}_UserSize", name))?;
            let marshal = ident(&format!("{}_UserMarshal", name))?;
            let unmarshal = ident(&format!("{}_UserUnmarshal", name))?;
            let free = ident(&format!("{}_UserFree", name))?;
            Ok(quote! {
                UserMarshalRoutines {
                    size: #size,
                    marshal: #marshal,
                    unmarshal: #unmarshal,
                    free: #free,
                }
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let len = Literal::usize_unsuffixed(names.len());
    Ok(quote! {
        pub static USER_MARSHAL_ROUTINES: [UserMarshalRoutines; #len] = [#(#entries),*];
    })
}

/// Phase code for a list of (slot, pass) pairs
fn phase(
    compilation: &Compilation,
    function: &CompiledFunction,
    moves: &[(ParamSlot, Pass)],
    phase: Phase,
) -> Result<TokenStream> {
    let mut tokens = TokenStream::new();
    for &(slot, pass) in moves {
        tokens.extend(compilation.emit_phase_code(function, slot, pass, phase)?);
    }
    Ok(tokens)
}

/// Everything a stub needs to know about one function
struct StubParts {
    stub_name: String,
    args: Ident,
    proc_offset: Literal,
    object: bool,
    params: usize,
}

fn stub_parts(compilation: &Compilation, function: &CompiledFunction) -> Result<StubParts> {
    let arena = compilation.arena();
    let node = arena.get(function.function);
    let name = node.display_name();
    let TypeKind::Function(func) = &node.kind else {
        return Err(MidlError::internal(format!("{} is not a function", name)));
    };
    Ok(StubParts {
        stub_name: to_snake_case(name),
        args: ident(&format!("{}Args", name))?,
        proc_offset: Literal::usize_unsuffixed(function.proc_offset as usize),
        object: Attribute::has(&arena.get(function.interface).attrs, &Attribute::Object),
        params: func.params.len(),
    })
}

fn client_stub(compilation: &Compilation, function: &CompiledFunction) -> Result<TokenStream> {
    let parts = stub_parts(compilation, function)?;
    let stub = ident(&format!("{}_client", parts.stub_name))?;
    let args = &parts.args;
    let proc_offset = &parts.proc_offset;
    let init = if parts.object {
        quote! { ::ndr_runtime::proxy_initialize(stub_msg, args.this, &PROC_FORMAT_STRING[#proc_offset..]); }
    } else {
        quote! { ::ndr_runtime::client_initialize(stub_msg, &PROC_FORMAT_STRING[#proc_offset..]); }
    };

    let inputs: Vec<_> = (0..parts.params)
        .map(|i| (ParamSlot::Param(i), Pass::In))
        .collect();
    let mut outputs: Vec<_> = (0..parts.params)
        .map(|i| (ParamSlot::Param(i), Pass::Out))
        .collect();
    outputs.push((ParamSlot::Return, Pass::Return));

    let size = phase(compilation, function, &inputs, Phase::BufferSize)?;
    let marshal = phase(compilation, function, &inputs, Phase::Marshal)?;
    let unmarshal = phase(compilation, function, &outputs, Phase::Unmarshal)?;

    Ok(quote! {
        pub unsafe fn #stub(stub_msg: &mut StubMessage, args: &mut #args) {
            #init
            stub_msg.buffer_length = 0;
            #size
            ::ndr_runtime::get_buffer(stub_msg);
            #marshal
            ::ndr_runtime::send_receive(stub_msg);
            #unmarshal
            ::ndr_runtime::free_buffer(stub_msg);
        }
    })
}

fn server_stub(compilation: &Compilation, function: &CompiledFunction) -> Result<TokenStream> {
    let parts = stub_parts(compilation, function)?;
    let stub = ident(&format!("{}_server", parts.stub_name))?;
    let args = &parts.args;
    let proc_offset = &parts.proc_offset;

    let arena = compilation.arena();
    let TypeKind::Function(func) = &arena.get(function.function).kind else {
        return Err(MidlError::internal("server stub for a non-function"));
    };
    let inputs: Vec<_> = (0..parts.params)
        .map(|i| (ParamSlot::Param(i), Pass::In))
        .collect();
    let mut outputs: Vec<_> = (0..parts.params)
        .map(|i| (ParamSlot::Param(i), Pass::Out))
        .collect();
    outputs.push((ParamSlot::Return, Pass::Return));
    // Every value is released once: [in] and [in, out] through the In pass
    let mut releases: Vec<_> = func
        .params
        .iter()
        .enumerate()
        .map(|(i, param)| {
            let pass = if param.direction().is_in() { Pass::In } else { Pass::Out };
            (ParamSlot::Param(i), pass)
        })
        .collect();
    releases.push((ParamSlot::Return, Pass::Return));

    let unmarshal = phase(compilation, function, &inputs, Phase::Unmarshal)?;
    let size = phase(compilation, function, &outputs, Phase::BufferSize)?;
    let marshal = phase(compilation, function, &outputs, Phase::Marshal)?;
    let free = phase(compilation, function, &releases, Phase::Free)?;

    Ok(quote! {
        pub unsafe fn #stub(stub_msg: &mut StubMessage, args: &mut #args, invoke: impl FnOnce(&mut #args)) {
            ::ndr_runtime::server_initialize(stub_msg, &PROC_FORMAT_STRING[#proc_offset..]);
            #unmarshal
            invoke(args);
            stub_msg.buffer_length = 0;
            #size
            ::ndr_runtime::get_buffer(stub_msg);
            #marshal
            #free
        }
    })
}

/// Convert PascalCase to snake_case
fn to_snake_case(s: &str) -> String {
    let mut result = String::new();
    for (i, ch) in s.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(ch.to_lowercase());
        } else {
            result.push(ch);
        }
    }
    result
}

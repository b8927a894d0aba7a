//! AST synthesis for hook-points.
//!
//! Given a selected function, this module produces the generated items
//! (epilog/prolog type aliases, the atomic prolog slot, the loader, the
//! descriptor function) and rebuilds the function body around the
//! instrumentation prologue. Everything synthesized here uses fully
//! qualified `::core`/`::std` paths so instrumented files need no imports.

use hookbuild_abi::config::CodeSnippets;
use hookbuild_abi::{hook_id, names};
use quote::format_ident;
use syn::parse_quote;
use syn::visit::Visit;
use syn::visit_mut::VisitMut;

use crate::error::RewriteError;

/// Everything the synthesizer needs to know about where a function lives.
pub struct FnContext<'a> {
    /// Module path segments, package root first (`["demo", "text"]`).
    pub module_path: &'a [String],
    /// Target type of the enclosing `impl`, if any.
    pub self_ty: Option<&'a syn::Type>,
    /// Trait path for trait impls.
    pub trait_path: Option<&'a syn::Path>,
}

/// A synthesized hook-point: the generated module items plus the names the
/// manifest and the dispatcher care about.
#[derive(Debug)]
pub struct Hookpoint {
    pub id: String,
    pub signature: String,
    pub symbol: String,
    pub descriptor_fn: String,
    pub items: Vec<syn::Item>,
}

/// Shape-level eligibility. Name, attribute and directive rules live in the
/// visitor; this covers everything the prolog slot type cannot express:
/// generic or `impl Trait` signatures, reference-bearing return types,
/// `async`/`const`/`extern`/variadic functions, and explicitly typed
/// receivers.
pub fn hookable_signature(sig: &syn::Signature) -> bool {
    if sig.constness.is_some()
        || sig.asyncness.is_some()
        || sig.abi.is_some()
        || sig.variadic.is_some()
    {
        return false;
    }
    if !sig.generics.params.is_empty() || sig.generics.where_clause.is_some() {
        return false;
    }
    for input in &sig.inputs {
        match input {
            syn::FnArg::Receiver(r) if r.colon_token.is_some() => return false,
            syn::FnArg::Typed(pt) => {
                let mut scan = TypeScan::default();
                scan.visit_type(&pt.ty);
                if scan.impl_trait {
                    return false;
                }
            }
            _ => {}
        }
    }
    match &sig.output {
        syn::ReturnType::Default => true,
        syn::ReturnType::Type(_, ty) => {
            let mut scan = TypeScan::default();
            scan.visit_type(ty);
            !(scan.impl_trait || scan.reference || scan.named_lifetime)
        }
    }
}

/// The bare receiver type name used in signatures and hook ids, or `None`
/// when the impl target is not expressible (generic arguments, qualified
/// self types).
pub fn receiver_name(self_ty: &syn::Type) -> Option<String> {
    let syn::Type::Path(tp) = self_ty else {
        return None;
    };
    if tp.qself.is_some() {
        return None;
    }
    if tp
        .path
        .segments
        .iter()
        .any(|seg| !seg.arguments.is_none())
    {
        return None;
    }
    Some(tp.path.segments.last()?.ident.to_string())
}

#[derive(Default)]
struct TypeScan {
    reference: bool,
    named_lifetime: bool,
    impl_trait: bool,
}

impl<'ast> Visit<'ast> for TypeScan {
    fn visit_type_reference(&mut self, node: &'ast syn::TypeReference) {
        self.reference = true;
        syn::visit::visit_type_reference(self, node);
    }

    fn visit_lifetime(&mut self, node: &'ast syn::Lifetime) {
        if node.ident != "static" {
            self.named_lifetime = true;
        }
    }

    fn visit_type_impl_trait(&mut self, _node: &'ast syn::TypeImplTrait) {
        self.impl_trait = true;
    }
}

/// Rewrites `Self` in signature types to the concrete impl target so the
/// synthesized module-level items stay well-formed outside the impl block.
struct SelfReplacer<'a> {
    self_ty: &'a syn::Type,
}

impl VisitMut for SelfReplacer<'_> {
    fn visit_type_mut(&mut self, ty: &mut syn::Type) {
        if let syn::Type::Path(tp) = ty {
            if tp.qself.is_none() && tp.path.is_ident("Self") {
                *ty = self.self_ty.clone();
                return;
            }
            if tp.qself.is_none()
                && tp
                    .path
                    .segments
                    .first()
                    .is_some_and(|seg| seg.ident == "Self")
            {
                // `Self::Assoc` becomes `<Target>::Assoc`.
                let rest: Vec<syn::PathSegment> =
                    tp.path.segments.iter().skip(1).cloned().collect();
                let target = self.self_ty;
                *ty = parse_quote!(<#target>::#(#rest)::*);
                return;
            }
        }
        syn::visit_mut::visit_type_mut(self, ty);
    }
}

fn resolve_self(ty: &syn::Type, self_ty: Option<&syn::Type>) -> syn::Type {
    let mut ty = ty.clone();
    if let Some(target) = self_ty {
        SelfReplacer { self_ty: target }.visit_type_mut(&mut ty);
    }
    ty
}

/// Render a type the way it would appear in source, for error messages.
fn render_type(ty: &syn::Type) -> String {
    let file: syn::File = parse_quote! {
        type __Rendered = #ty;
    };
    let text = prettyplease::unparse(&file);
    let one_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    one_line
        .strip_prefix("type __Rendered =")
        .and_then(|s| s.strip_suffix(';'))
        .map(|s| s.trim().to_string())
        .unwrap_or(one_line)
}

struct CallbackParams {
    /// Prolog parameter types (`&A` per original parameter, receiver first).
    prolog_tys: Vec<syn::Type>,
    /// Argument expressions for the prolog call site.
    call_args: Vec<syn::Expr>,
    /// Original parameter types for the descriptor's fn-pointer cast,
    /// receiver included.
    fn_ptr_tys: Vec<syn::Type>,
    /// Re-binds for destructuring patterns that had to be renamed, spliced
    /// at the top of the wrapped body.
    rebinds: Vec<syn::Stmt>,
}

/// Walks the parameters, names the unnamed, and produces the callback
/// parameter and call-argument lists. Mutates the signature in place when a
/// pattern needs renaming.
fn callback_params(
    sig: &mut syn::Signature,
    self_ty: Option<&syn::Type>,
) -> Result<CallbackParams, RewriteError> {
    let mut out = CallbackParams {
        prolog_tys: Vec::new(),
        call_args: Vec::new(),
        fn_ptr_tys: Vec::new(),
        rebinds: Vec::new(),
    };
    let mut p = 0usize;
    for input in sig.inputs.iter_mut() {
        match input {
            syn::FnArg::Receiver(recv) => {
                // A `self` outside an impl block never typechecks, but we
                // see the source before rustc does.
                let Some(target) = self_ty else {
                    return Err(RewriteError::Receiver {
                        signature: sig.ident.to_string(),
                    });
                };
                let recv_fn_ty: syn::Type = match (&recv.reference, &recv.mutability) {
                    (Some(_), Some(_)) => parse_quote!(&mut #target),
                    (Some(_), None) => parse_quote!(&#target),
                    (None, _) => parse_quote!(#target),
                };
                out.fn_ptr_tys.push(recv_fn_ty);
                out.prolog_tys.push(parse_quote!(&#target));
                out.call_args.push(if recv.reference.is_some() {
                    parse_quote!(&*self)
                } else {
                    parse_quote!(&self)
                });
            }
            syn::FnArg::Typed(pt) => {
                let ty = resolve_self(&pt.ty, self_ty);
                let name: syn::Ident = match &mut *pt.pat {
                    syn::Pat::Ident(pi) if pi.by_ref.is_none() && pi.subpat.is_none() => {
                        pi.ident.clone()
                    }
                    pat => {
                        // `_` and destructuring patterns get a synthetic
                        // name; destructurings are re-bound in the body.
                        let ident = format_ident!("{}{}", names::PARAM_PREFIX, p);
                        if !matches!(pat, syn::Pat::Wild(_)) {
                            let original = pat.clone();
                            out.rebinds.push(parse_quote!(let #original = #ident;));
                        }
                        *pat = syn::Pat::Ident(syn::PatIdent {
                            attrs: Vec::new(),
                            by_ref: None,
                            mutability: None,
                            ident: ident.clone(),
                            subpat: None,
                        });
                        ident
                    }
                };
                out.fn_ptr_tys.push(ty.clone());
                out.prolog_tys.push(parse_quote!(&#ty));
                out.call_args.push(parse_quote!(&#name));
            }
        }
        p += 1;
    }
    Ok(out)
}

fn parse_snippet(
    kind: &'static str,
    signature: &str,
    snippet: &str,
) -> Result<Vec<syn::Stmt>, RewriteError> {
    let wrapped = format!("{{\n{snippet}\n}}");
    let block: syn::Block =
        syn::parse_str(&wrapped).map_err(|source| RewriteError::Snippet {
            kind,
            signature: signature.to_string(),
            snippet: snippet.to_string(),
            source,
        })?;
    Ok(block.stmts)
}

/// Synthesize the hook-point for a selected function and rebuild its body.
///
/// The signature is mutated in place (parameter renames) and the block is
/// replaced with the instrumented shape. The main policy passes a
/// `main`-rooted module path, which is what puts the main-crate prefix on
/// the descriptor name.
pub fn synthesize(
    ctx: &FnContext<'_>,
    signature: &str,
    sig: &mut syn::Signature,
    block: &mut syn::Block,
    snippets: Option<&CodeSnippets>,
) -> Result<Hookpoint, RewriteError> {
    let module_path = ctx.module_path.join("::");
    let receiver = ctx.self_ty.and_then(receiver_name);
    let fn_name = sig.ident.to_string();
    let id = hook_id(&module_path, receiver.as_deref(), &fn_name);
    let symbol = signature.to_string();

    let ret_ty: syn::Type = match &sig.output {
        syn::ReturnType::Default => parse_quote!(()),
        syn::ReturnType::Type(_, ty) => resolve_self(ty, ctx.self_ty),
    };
    let output: syn::ReturnType = match &sig.output {
        syn::ReturnType::Default => syn::ReturnType::Default,
        syn::ReturnType::Type(arrow, _) => {
            syn::ReturnType::Type(*arrow, Box::new(ret_ty.clone()))
        }
    };

    let params = callback_params(sig, ctx.self_ty)?;
    let prolog_tys = &params.prolog_tys;
    let fn_ptr_tys = &params.fn_ptr_tys;

    let epilog_ty_ident = format_ident!("{}", names::epilog_ty_ident(&id));
    let prolog_ty_ident = format_ident!("{}", names::prolog_ty_ident(&id));
    let var_ident = format_ident!("{}", names::prolog_var_ident(&id));
    let load_ident = format_ident!("{}", names::prolog_load_ident(&id));
    let descriptor_ident = format_ident!("{}", names::descriptor_fn_ident(&id));
    let atomic_load_ident = format_ident!("{}", names::ATOMIC_LOAD_FN);
    let descriptor_ty_ident = format_ident!("{}", names::DESCRIPTOR_TYPE);

    let epilog_alias: syn::Item = parse_quote! {
        #[allow(non_camel_case_types)]
        type #epilog_ty_ident = ::std::boxed::Box<dyn FnOnce(&#ret_ty) + Send>;
    };
    let prolog_alias: syn::Item = parse_quote! {
        #[allow(non_camel_case_types)]
        type #prolog_ty_ident = ::std::boxed::Box<
            dyn Fn(#(#prolog_tys),*) -> (
                ::core::option::Option<#epilog_ty_ident>,
                ::core::option::Option<#ret_ty>,
            ) + Send + Sync,
        >;
    };
    let prolog_var: syn::Item = parse_quote! {
        #[allow(non_upper_case_globals)]
        static #var_ident: ::core::sync::atomic::AtomicPtr<#prolog_ty_ident> =
            ::core::sync::atomic::AtomicPtr::new(::core::ptr::null_mut());
    };
    let prolog_load: syn::Item = parse_quote! {
        #[allow(non_snake_case)]
        fn #load_ident() -> *mut #prolog_ty_ident {
            unsafe {
                #atomic_load_ident(
                    ::core::ptr::addr_of!(#var_ident) as *mut ::core::ffi::c_void
                ) as *mut #prolog_ty_ident
            }
        }
    };

    let fn_ident = &sig.ident;
    let func_path: syn::Expr = match (ctx.self_ty, ctx.trait_path) {
        (None, _) => parse_quote!(#fn_ident),
        (Some(target), None) => parse_quote!(<#target>::#fn_ident),
        (Some(target), Some(tr)) => parse_quote!(<#target as #tr>::#fn_ident),
    };
    // Human-readable expected prolog type for attach-time error messages.
    let display_ty: syn::Type = parse_quote! {
        Box<
            dyn Fn(#(#prolog_tys),*) -> (
                Option<Box<dyn FnOnce(&#ret_ty) + Send>>,
                Option<#ret_ty>,
            ) + Send + Sync,
        >
    };
    let type_name = render_type(&display_ty);

    let descriptor_fn: syn::Item = parse_quote! {
        #[unsafe(no_mangle)]
        #[allow(non_snake_case, improper_ctypes_definitions)]
        extern "C" fn #descriptor_ident(_hd: *mut #descriptor_ty_ident) {
            unsafe {
                *_hd = #descriptor_ty_ident {
                    symbol: #symbol,
                    func: #func_path as fn(#(#fn_ptr_tys),*) #output
                        as *const () as *mut ::core::ffi::c_void,
                    prolog_var: ::core::ptr::addr_of!(#var_ident)
                        as *mut ::core::ffi::c_void,
                    prolog_type_id: ::core::any::TypeId::of::<#prolog_ty_ident>(),
                    prolog_type_name: #type_name,
                };
            }
        }
    };

    instrument_body(
        block,
        &load_ident,
        &params.call_args,
        params.rebinds,
        snippets,
        signature,
    )?;

    Ok(Hookpoint {
        descriptor_fn: names::descriptor_fn_ident(&id),
        id,
        signature: signature.to_string(),
        symbol,
        items: vec![epilog_alias, prolog_alias, prolog_var, prolog_load, descriptor_fn],
    })
}

/// Rebuild a function body into the instrumented shape: the prologue runs
/// the prolog (aborting with its substitute value if asked), the original
/// statements move into an immediately invoked closure so the epilog
/// observes the final result on every exit path.
fn instrument_body(
    block: &mut syn::Block,
    load_ident: &syn::Ident,
    call_args: &[syn::Expr],
    rebinds: Vec<syn::Stmt>,
    snippets: Option<&CodeSnippets>,
    signature: &str,
) -> Result<(), RewriteError> {
    let prolog_stmts: Vec<syn::Stmt> = match snippets {
        Some(code) if !code.prolog.trim().is_empty() => {
            parse_snippet("prolog", signature, &code.prolog)?
        }
        _ => vec![parse_quote! {
            let (_epilog, _abort) = (unsafe { &*_prolog })(#(#call_args),*);
        }],
    };
    let epilog_stmts: Vec<syn::Stmt> = match snippets {
        Some(code) if !code.epilog.trim().is_empty() => {
            parse_snippet("epilog", signature, &code.epilog)?
        }
        _ => vec![parse_quote! {
            _epilog(&_result0);
        }],
    };

    let mut inner = block.clone();
    inner.stmts.splice(0..0, rebinds);

    let instrumented: syn::Block = parse_quote!({
        let _hook_epilog = {
            let _prolog = #load_ident();
            if _prolog.is_null() {
                ::core::option::Option::None
            } else {
                #(#prolog_stmts)*
                if let ::core::option::Option::Some(_abort) = _abort {
                    let _result0 = _abort;
                    if let ::core::option::Option::Some(_epilog) = _epilog {
                        #(#epilog_stmts)*
                    }
                    return _result0;
                }
                _epilog
            }
        };
        let _result0 = (move || #inner)();
        if let ::core::option::Option::Some(_epilog) = _hook_epilog {
            #(#epilog_stmts)*
        }
        _result0
    });
    *block = instrumented;
    Ok(())
}

/// Per-module metadata: the descriptor type definition and the link-time
/// forward declaration of the atomic load helper, appended once to every
/// module that gained a hook-point.
pub fn file_metadata() -> Vec<syn::Item> {
    let descriptor_ty_ident = format_ident!("{}", names::DESCRIPTOR_TYPE);
    let atomic_load_ident = format_ident!("{}", names::ATOMIC_LOAD_FN);
    let ty: syn::Item = parse_quote! {
        #[allow(non_camel_case_types, dead_code)]
        #[repr(C)]
        struct #descriptor_ty_ident {
            symbol: &'static str,
            func: *mut ::core::ffi::c_void,
            prolog_var: *mut ::core::ffi::c_void,
            prolog_type_id: ::core::any::TypeId,
            prolog_type_name: &'static str,
        }
    };
    let fwd: syn::Item = parse_quote! {
        #[allow(improper_ctypes)]
        unsafe extern "C" {
            fn #atomic_load_ident(
                addr: *mut ::core::ffi::c_void,
            ) -> *mut ::core::ffi::c_void;
        }
    };
    vec![ty, fwd]
}

//! The per-crate rewriter.
//!
//! Walks the resolved module tree, decides per function whether to
//! instrument, invokes the synthesizer, and emits the rewritten shadow
//! tree into the per-crate build directory. Rewrites propagate upward:
//! every rewritten file's `mod` declarations are re-pointed with `#[path]`
//! attributes so the dispatcher only has to patch the crate root argument.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use log::{debug, info};
use syn::spanned::Spanned;

use hookbuild_abi::{unvendor, Config};

use crate::error::RewriteError;
use crate::modules::{self, ModuleFile};
use crate::synth::{self, FnContext, Hookpoint};

pub struct PackageRewriter {
    /// Package path used for signatures and hook ids (`main` under the
    /// main policy, the unvendored crate name otherwise).
    pkg_path: String,
    config: Config,
    /// Signatures configured for this package.
    selected: HashSet<String>,
    full: bool,
    files: Vec<ModuleFile>,
    hooks: Vec<Hookpoint>,
    /// Indices of files that must be emitted into the build directory.
    rewrite_set: HashSet<usize>,
    /// Generated modules mounted into the crate root (`hooktable.rs`,
    /// `hookload.rs`), as (module name, absolute file path).
    root_mounts: Vec<(String, PathBuf)>,
    /// Guards the at-most-once-per-build invariant when the same function
    /// would match twice (e.g. an inherent and a trait impl of one name).
    used_ids: HashSet<String>,
}

impl PackageRewriter {
    pub fn new(
        pkg_path: &str,
        root: &Path,
        config: Config,
        full: bool,
    ) -> Result<Self, RewriteError> {
        let files = modules::load_crate(root)?;
        let pkg_path = unvendor(pkg_path).to_string();
        let selected = config
            .hookpoints
            .get(&pkg_path)
            .map(|sigs| sigs.iter().cloned().collect())
            .unwrap_or_default();
        Ok(Self {
            pkg_path,
            config,
            selected,
            full,
            files,
            hooks: Vec::new(),
            rewrite_set: HashSet::new(),
            root_mounts: Vec::new(),
            used_ids: HashSet::new(),
        })
    }

    pub fn pkg_path(&self) -> &str {
        &self.pkg_path
    }

    pub fn is_no_std(&self) -> bool {
        modules::is_no_std(&self.files)
    }

    pub fn root_path(&self) -> &Path {
        &self.files[0].path
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.len()
    }

    pub fn descriptor_names(&self) -> impl Iterator<Item = &str> {
        self.hooks.iter().map(|h| h.descriptor_fn.as_str())
    }

    /// Mount a generated file as a module of the crate root; forces the
    /// root into the rewrite set.
    pub fn mount_root_mod(&mut self, mod_name: &str, file: &Path) {
        self.root_mounts
            .push((mod_name.to_string(), file.to_path_buf()));
        self.rewrite_set.insert(0);
    }

    /// Instrument every selected function. Returns the number of
    /// hook-points added.
    pub fn instrument(&mut self) -> Result<usize, RewriteError> {
        let pinned_subtrees: Vec<bool> = (0..self.files.len())
            .map(|i| self.in_pinned_subtree(i))
            .collect();
        for idx in 0..self.files.len() {
            if self.files[idx].skip || pinned_subtrees[idx] {
                continue;
            }
            let added = self.instrument_file(idx)?;
            if !added.is_empty() {
                for hook in &added {
                    info!(
                        "hook-point {} at {}",
                        hook.id,
                        self.files[idx].path.display()
                    );
                }
                self.rewrite_set.insert(idx);
                self.hooks.extend(added);
            }
        }
        // Ancestors of every rewritten file must be rewritten too: their
        // `mod` declarations are what re-point resolution at the shadow
        // tree.
        let mut frontier: Vec<usize> = self.rewrite_set.iter().copied().collect();
        while let Some(idx) = frontier.pop() {
            if let Some(parent) = self.files[idx].parent {
                if self.rewrite_set.insert(parent) {
                    frontier.push(parent);
                }
            }
        }
        Ok(self.hooks.len())
    }

    fn in_pinned_subtree(&self, mut idx: usize) -> bool {
        loop {
            if self.files[idx].pinned {
                return true;
            }
            match self.files[idx].parent {
                Some(parent) => idx = parent,
                None => return false,
            }
        }
    }

    fn instrument_file(&mut self, idx: usize) -> Result<Vec<Hookpoint>, RewriteError> {
        let mut ast = std::mem::replace(
            &mut self.files[idx].ast,
            syn::File {
                shebang: None,
                attrs: Vec::new(),
                items: Vec::new(),
            },
        );
        let mut mod_path = vec![self.pkg_path.clone()];
        mod_path.extend(self.files[idx].segments.iter().cloned());
        let mut hooks = Vec::new();
        let result = self.visit_items(&mut ast.items, &mut mod_path, idx, &mut hooks);
        self.files[idx].ast = ast;
        result.map(|()| hooks)
    }

    /// Visit one module's item list. Hook-points found directly in this
    /// module get their generated items (and the per-module metadata)
    /// appended to the same item list, so the loader and descriptor are in
    /// scope of the instrumented bodies; inline submodules are handled
    /// recursively with their own scope.
    fn visit_items(
        &mut self,
        items: &mut Vec<syn::Item>,
        mod_path: &mut Vec<String>,
        file_idx: usize,
        hooks: &mut Vec<Hookpoint>,
    ) -> Result<(), RewriteError> {
        let mut local: Vec<Hookpoint> = Vec::new();
        for item in items.iter_mut() {
            match item {
                syn::Item::Fn(f) => {
                    let line = f.span().start().line;
                    self.try_hook(
                        mod_path,
                        None,
                        None,
                        &f.attrs,
                        &mut f.sig,
                        &mut f.block,
                        line,
                        file_idx,
                        &mut local,
                    )?;
                }
                syn::Item::Impl(imp) => {
                    if !imp.generics.params.is_empty()
                        || imp.generics.where_clause.is_some()
                    {
                        continue;
                    }
                    let self_ty = (*imp.self_ty).clone();
                    let trait_path = imp.trait_.as_ref().map(|(_, path, _)| path.clone());
                    for impl_item in imp.items.iter_mut() {
                        if let syn::ImplItem::Fn(m) = impl_item {
                            let line = m.span().start().line;
                            self.try_hook(
                                mod_path,
                                Some(&self_ty),
                                trait_path.as_ref(),
                                &m.attrs,
                                &mut m.sig,
                                &mut m.block,
                                line,
                                file_idx,
                                &mut local,
                            )?;
                        }
                    }
                }
                syn::Item::Mod(m) => {
                    if let Some((_, nested)) = &mut m.content {
                        mod_path.push(m.ident.to_string());
                        let r = self.visit_items(nested, mod_path, file_idx, hooks);
                        mod_path.pop();
                        r?;
                    }
                }
                _ => {}
            }
        }
        if !local.is_empty() {
            items.extend(synth::file_metadata());
            let mut generated: Vec<syn::Item> = Vec::new();
            for hook in &mut local {
                generated.append(&mut hook.items);
            }
            items.extend(generated);
            hooks.extend(local);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn try_hook(
        &mut self,
        mod_path: &[String],
        self_ty: Option<&syn::Type>,
        trait_path: Option<&syn::Path>,
        attrs: &[syn::Attribute],
        sig: &mut syn::Signature,
        block: &mut syn::Block,
        line: usize,
        file_idx: usize,
        hooks: &mut Vec<Hookpoint>,
    ) -> Result<(), RewriteError> {
        let name = sig.ident.to_string();
        if should_ignore_fn(&name, attrs, block)
            || self.files[file_idx].ignored_at(line)
            || !synth::hookable_signature(sig)
        {
            debug!("not hookable: {}::{name}", mod_path.join("::"));
            return Ok(());
        }
        let receiver = match self_ty {
            Some(ty) => match synth::receiver_name(ty) {
                Some(r) => Some(r),
                // Concrete-but-generic impl targets (Vec<u8>) have no bare
                // name in the id scheme.
                None => return Ok(()),
            },
            None => None,
        };

        let mut signature = mod_path.join("::");
        if let Some(recv) = &receiver {
            signature.push_str("::");
            signature.push_str(recv);
        }
        signature.push_str("::");
        signature.push_str(&name);

        if !self.full && !self.selected.contains(&signature) {
            return Ok(());
        }

        let ctx = FnContext {
            module_path: mod_path,
            self_ty,
            trait_path,
        };
        let snippets = self.config.snippets_for(&signature).cloned();
        let hook = synth::synthesize(&ctx, &signature, sig, block, snippets.as_ref())?;
        if !self.used_ids.insert(hook.id.clone()) {
            debug!("duplicate hook id {}, keeping the first", hook.id);
            return Ok(());
        }
        hooks.push(hook);
        Ok(())
    }

    /// Emit the shadow tree. Returns the original -> rewritten mapping;
    /// the crate root's entry is what the dispatcher patches into argv.
    pub fn write(&mut self, build_dir: &Path) -> Result<HashMap<PathBuf, PathBuf>, RewriteError> {
        let mut written = HashMap::new();
        if self.rewrite_set.is_empty() {
            return Ok(written);
        }
        if self.rewrite_set.contains(&0) && self.files[0].pinned {
            return Err(RewriteError::RootNotRewritable(self.files[0].path.clone()));
        }
        std::fs::create_dir_all(build_dir)
            .map_err(|e| RewriteError::io(build_dir.to_path_buf(), e))?;

        let dests: Vec<PathBuf> = self
            .files
            .iter()
            .map(|f| build_dir.join(&f.rel_path))
            .collect();

        let indices: Vec<usize> = self.rewrite_set.iter().copied().collect();
        for idx in indices {
            // Re-point every file-backed child at its rewritten copy, or
            // at its original absolute location when it stays put.
            let targets: Vec<PathBuf> = self.files[idx]
                .children
                .iter()
                .map(|child| match child.file {
                    Some(c) if self.rewrite_set.contains(&c) => dests[c].clone(),
                    _ => child.target.clone(),
                })
                .collect();
            let file = &mut self.files[idx];
            modules::apply_child_paths(&mut file.ast, &targets);

            if idx == 0 {
                for (mod_name, path) in &self.root_mounts {
                    let ident = syn::Ident::new(mod_name, proc_macro2::Span::call_site());
                    let lit = path.to_string_lossy().to_string();
                    file.ast
                        .items
                        .push(syn::parse_quote!(#[path = #lit] mod #ident;));
                }
            }

            let dest = &dests[idx];
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| RewriteError::io(parent.to_path_buf(), e))?;
            }
            // The header keeps the provenance greppable; rustc's debug
            // info will point at the shadow copy.
            let body = prettyplease::unparse(&file.ast);
            let contents = format!(
                "// hookbuild: instrumented from {}\n{}",
                file.path.display(),
                body
            );
            std::fs::write(dest, contents)
                .map_err(|e| RewriteError::io(dest.clone(), e))?;
            written.insert(file.path.clone(), dest.clone());
        }
        Ok(written)
    }
}

/// Function-level skip rules that do not depend on the signature shape:
/// empty bodies, the program entry point, conventionally inlining-sensitive
/// names, and low-level attributes.
fn should_ignore_fn(name: &str, attrs: &[syn::Attribute], block: &syn::Block) -> bool {
    if block.stmts.is_empty() {
        return true;
    }
    if name == "main" || name.contains("noescape") {
        return true;
    }
    attrs.iter().any(|attr| {
        let path = attr.path();
        if path.is_ident("no_mangle") || path.is_ident("naked") || path.is_ident("export_name") {
            return true;
        }
        if path.is_ident("inline") {
            if let syn::Meta::List(list) = &attr.meta {
                return list.tokens.to_string().contains("always");
            }
        }
        false
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use syn::parse_quote;

    #[test]
    fn test_should_ignore_fn_rules() {
        let block: syn::Block = parse_quote!({ 1 + 1; });
        let empty: syn::Block = parse_quote!({});
        let none: Vec<syn::Attribute> = Vec::new();
        assert!(should_ignore_fn("f", &none, &empty));
        assert!(should_ignore_fn("main", &none, &block));
        assert!(should_ignore_fn("memcpy_noescape", &none, &block));
        assert!(!should_ignore_fn("f", &none, &block));

        let no_mangle: Vec<syn::Attribute> = vec![parse_quote!(#[no_mangle])];
        let inline_always: Vec<syn::Attribute> = vec![parse_quote!(#[inline(always)])];
        let inline: Vec<syn::Attribute> = vec![parse_quote!(#[inline])];
        assert!(should_ignore_fn("f", &no_mangle, &block));
        assert!(should_ignore_fn("f", &inline_always, &block));
        assert!(!should_ignore_fn("f", &inline, &block));
    }
}

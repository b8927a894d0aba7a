//! Crate module-tree resolution.
//!
//! rustc consumes a single crate root and discovers module files itself, so
//! the rewriter has to mirror that discovery: parse the root, follow
//! file-backed `mod` declarations (`name.rs`, `name/mod.rs`, `#[path]`
//! overrides, mod-rs vs directory-owner semantics), and remember enough
//! structure to re-point `mod` declarations at rewritten copies later.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use syn::spanned::Spanned;

use hookbuild_abi::names;

use crate::error::RewriteError;

/// A file-backed `mod` declaration of a parsed file, in DFS encounter
/// order. `file` is `None` when the target file does not exist (typically
/// `cfg`'d out for another platform).
pub struct ChildMod {
    pub name: String,
    /// Absolute path the declaration resolves to today.
    pub target: PathBuf,
    pub file: Option<usize>,
}

pub struct ModuleFile {
    pub path: PathBuf,
    /// Relative path used when emitting into the shadow build directory.
    pub rel_path: PathBuf,
    /// Module segments from the crate root (empty for the root file).
    pub segments: Vec<String>,
    pub ast: syn::File,
    pub source: String,
    pub parent: Option<usize>,
    pub children: Vec<ChildMod>,
    /// 1-based lines carrying a `hookbuild:ignore` directive comment.
    pub ignore_lines: BTreeSet<usize>,
    /// File excluded from instrumentation (it stays in place on disk).
    pub skip: bool,
    /// File that cannot be relocated into the build directory at all
    /// (build scripts, relative `include!`). A pinned file also pins its
    /// subtree: children resolve relative to it, so they stay put too.
    pub pinned: bool,
}

impl ModuleFile {
    /// True when a directive comment sits on the line directly above
    /// `line` (attributes and doc comments between count as part of the
    /// item, so the check walks upward over them in the visitor).
    pub fn ignored_at(&self, line: usize) -> bool {
        line > 1 && self.ignore_lines.contains(&(line - 1))
    }
}

/// Load the whole module tree of the crate rooted at `root`.
pub fn load_crate(root: &Path) -> Result<Vec<ModuleFile>, RewriteError> {
    let mut files = Vec::new();
    let src_root = root
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    load_file(root, &src_root, Vec::new(), None, &mut files)?;
    Ok(files)
}

/// True when the crate opts out of std; such crates cannot host the
/// generated `::std`-based prolog cells and are left alone.
pub fn is_no_std(files: &[ModuleFile]) -> bool {
    files
        .first()
        .is_some_and(|root| root.ast.attrs.iter().any(|a| a.path().is_ident("no_std")))
}

fn load_file(
    path: &Path,
    src_root: &Path,
    segments: Vec<String>,
    parent: Option<usize>,
    files: &mut Vec<ModuleFile>,
) -> Result<usize, RewriteError> {
    let source =
        std::fs::read_to_string(path).map_err(|e| RewriteError::io(path.to_path_buf(), e))?;
    let ast = syn::parse_file(&source).map_err(|source| RewriteError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let rel_path = path
        .strip_prefix(src_root)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| {
            PathBuf::from(format!(
                "far_{}_{}",
                files.len(),
                path.file_name().and_then(|n| n.to_str()).unwrap_or("mod.rs")
            ))
        });

    let (skip, pinned) = match file_skip_reason(path, &source) {
        Some((reason, pinned)) => {
            debug!("skipping instrumentation of file {}: {reason}", path.display());
            (true, pinned)
        }
        None => (false, false),
    };

    let idx = files.len();
    files.push(ModuleFile {
        path: path.to_path_buf(),
        rel_path,
        segments,
        ignore_lines: directive_lines(&source),
        ast,
        source,
        parent,
        children: Vec::new(),
        skip,
        pinned,
    });

    // The directory children of this file resolve in: the file's own
    // directory for roots and mod.rs files, `<dir>/<stem>` otherwise.
    let dir = path.parent().unwrap_or(Path::new("."));
    let children_dir = if parent.is_none() || path.file_name().is_some_and(|n| n == "mod.rs") {
        dir.to_path_buf()
    } else {
        dir.join(path.file_stem().and_then(|s| s.to_str()).unwrap_or("_"))
    };

    let mut decls = Vec::new();
    collect_mod_decls(&files[idx].ast.items, &children_dir, &mut decls);

    let mut children = Vec::new();
    for decl in decls {
        let (target, exists) = resolve_child(&decl);
        let file = if exists {
            let mut child_segments = files[idx].segments.clone();
            child_segments.extend(decl.inline_prefix.iter().cloned());
            child_segments.push(decl.name.clone());
            Some(load_file(&target, src_root, child_segments, Some(idx), files)?)
        } else {
            warn!(
                "module file for `mod {}` not found at {} (cfg'd out?)",
                decl.name,
                target.display()
            );
            None
        };
        children.push(ChildMod {
            name: decl.name,
            target,
            file,
        });
    }
    files[idx].children = children;
    Ok(idx)
}

struct ModDecl {
    name: String,
    inline_prefix: Vec<String>,
    dir: PathBuf,
    path_attr: Option<String>,
}

/// DFS over the items of one file collecting file-backed `mod`
/// declarations, descending into inline modules (which extend the child
/// directory). The same order is used when re-pointing declarations.
fn collect_mod_decls(items: &[syn::Item], dir: &Path, out: &mut Vec<ModDecl>) {
    collect_mod_decls_inner(items, dir, &mut Vec::new(), out);
}

fn collect_mod_decls_inner(
    items: &[syn::Item],
    dir: &Path,
    inline_prefix: &mut Vec<String>,
    out: &mut Vec<ModDecl>,
) {
    for item in items {
        let syn::Item::Mod(m) = item else { continue };
        match &m.content {
            Some((_, nested)) => {
                let nested_dir = dir.join(m.ident.to_string());
                inline_prefix.push(m.ident.to_string());
                collect_mod_decls_inner(nested, &nested_dir, inline_prefix, out);
                inline_prefix.pop();
            }
            None => out.push(ModDecl {
                name: m.ident.to_string(),
                inline_prefix: inline_prefix.clone(),
                dir: dir.to_path_buf(),
                path_attr: mod_path_attr(&m.attrs),
            }),
        }
    }
}

fn mod_path_attr(attrs: &[syn::Attribute]) -> Option<String> {
    for attr in attrs {
        if !attr.path().is_ident("path") {
            continue;
        }
        if let syn::Meta::NameValue(nv) = &attr.meta {
            if let syn::Expr::Lit(syn::ExprLit {
                lit: syn::Lit::Str(s),
                ..
            }) = &nv.value
            {
                return Some(s.value());
            }
        }
    }
    None
}

fn resolve_child(decl: &ModDecl) -> (PathBuf, bool) {
    if let Some(p) = &decl.path_attr {
        let target = decl.dir.join(p);
        let exists = target.is_file();
        return (target, exists);
    }
    let file_candidate = decl.dir.join(format!("{}.rs", decl.name));
    if file_candidate.is_file() {
        return (file_candidate, true);
    }
    let dir_candidate = decl.dir.join(&decl.name).join("mod.rs");
    let exists = dir_candidate.is_file();
    if exists {
        (dir_candidate, true)
    } else {
        (file_candidate, false)
    }
}

/// Re-point every file-backed `mod` declaration of `ast` at an absolute
/// target path. `targets` must line up with the DFS encounter order used by
/// `collect_mod_decls`; instrumentation only appends items, so the order is
/// stable between load and write.
pub fn apply_child_paths(ast: &mut syn::File, targets: &[PathBuf]) {
    let mut queue = targets.iter();
    apply_child_paths_inner(&mut ast.items, &mut queue);
}

fn apply_child_paths_inner<'a>(
    items: &mut [syn::Item],
    queue: &mut std::slice::Iter<'a, PathBuf>,
) {
    for item in items {
        let syn::Item::Mod(m) = item else { continue };
        match &mut m.content {
            Some((_, nested)) => apply_child_paths_inner(nested, queue),
            None => {
                let Some(target) = queue.next() else { return };
                let lit = target.to_string_lossy().to_string();
                m.attrs.retain(|a| !a.path().is_ident("path"));
                m.attrs.push(syn::parse_quote!(#[path = #lit]));
            }
        }
    }
}

fn directive_lines(source: &str) -> BTreeSet<usize> {
    source
        .lines()
        .enumerate()
        .filter_map(|(i, line)| {
            let trimmed = line.trim_start();
            (trimmed.starts_with("//") && trimmed.contains(names::IGNORE_DIRECTIVE))
                .then_some(i + 1)
        })
        .collect()
}

fn file_skip_reason(path: &Path, source: &str) -> Option<(&'static str, bool)> {
    if path.file_name().is_some_and(|n| n == "build.rs") {
        return Some(("build script", true));
    }
    if has_relative_include(source) {
        return Some(("relative include! would break under relocation", true));
    }
    if file_level_directive(source) {
        return Some(("ignore directive", false));
    }
    None
}

/// A `hookbuild:ignore` directive in the file header excludes the whole
/// file. A directive on the line directly above the first item belongs to
/// that item, not to the file.
fn file_level_directive(source: &str) -> bool {
    let directives = directive_lines(source);
    if directives.is_empty() {
        return false;
    }
    let first_item_line = syn::parse_file(source)
        .ok()
        .and_then(|ast| ast.items.first().map(|item| item.span().start().line))
        .unwrap_or(usize::MAX);
    directives.iter().any(|&line| line + 1 < first_item_line)
}

/// Detects `include!`-family macros with relative string paths. Files using
/// them cannot be relocated into the build directory, so they are left
/// uninstrumented in place.
fn has_relative_include(source: &str) -> bool {
    for needle in ["include!", "include_str!", "include_bytes!"] {
        let mut rest = source;
        while let Some(at) = rest.find(needle) {
            let after = &rest[at + needle.len()..];
            let args = after.trim_start();
            if let Some(args) = args.strip_prefix('(') {
                let args = args.trim_start();
                if let Some(quoted) = args.strip_prefix('"') {
                    if !quoted.starts_with('/') {
                        return true;
                    }
                }
            }
            rest = &rest[at + needle.len()..];
        }
    }
    false
}

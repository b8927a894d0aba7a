//! Symbol normalization.
//!
//! The generator derives identifier-safe hook ids from module paths and
//! function names; the runtime normalizes caller-supplied symbols the same
//! way before searching the hook table. Both sides must agree exactly: the
//! table is sorted by raw descriptor-function name, which embeds the
//! normalized id, and the runtime's binary search compares normalized
//! forms.

/// Build the canonical hook id for a function.
///
/// `module_path` is the path of the containing module rooted at the crate
/// name (`demo::text`), or `main` under the main policy. The receiver, if
/// any, is the bare type name with reference markers already stripped.
pub fn hook_id(module_path: &str, receiver: Option<&str>, func: &str) -> String {
    let mut id = normalize_symbol(module_path);
    id.push('_');
    if let Some(recv) = receiver {
        id.push_str(&normalize_symbol(recv));
        id.push('_');
    }
    id.push_str(func);
    id
}

/// Normalize a symbol for table lookup and id construction.
///
/// Strips spaces, `*`, `&` and parentheses, then rewrites each `::`
/// separator and each of `/`, `.`, `-`, `@` to `_`. Idempotent.
pub fn normalize_symbol(symbol: &str) -> String {
    let mut out = String::with_capacity(symbol.len());
    let mut chars = symbol.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            ' ' | '*' | '&' | '(' | ')' => {}
            ':' => {
                // A path separator collapses to a single underscore.
                if chars.peek() == Some(&':') {
                    chars.next();
                }
                out.push('_');
            }
            '/' | '.' | '-' | '@' => out.push('_'),
            _ => out.push(c),
        }
    }
    out
}

/// Strip a vendored-module prefix from a symbol so vendored and plain
/// names collapse to the same hook: `app::vendor::dep::f` -> `dep::f`.
pub fn unvendor(symbol: &str) -> &str {
    const MARKER: &str = "vendor::";
    match symbol.find(MARKER) {
        // Only honor the marker on a segment boundary.
        Some(i) if i == 0 || symbol[..i].ends_with("::") => &symbol[i + MARKER.len()..],
        _ => symbol,
    }
}

//! The process-wide symbol index.
//!
//! Hooks are materialized lazily: a lookup miss binary-searches the hook
//! table by normalized identifier, decoding every visited descriptor and
//! inserting it into the index as a side effect. The table was emitted in
//! sorted order by the generator using the same normalization, which is
//! what makes the search valid. The index mutex also serializes cold-table
//! walks, so concurrent `find` calls are safe.

use std::collections::HashMap;
use std::mem::MaybeUninit;
use std::sync::{Mutex, OnceLock};

use hookbuild_abi::{normalize_symbol, unvendor};

use crate::descriptor::{self, DescriptorFn, HookDescriptor};
use crate::error::HookError;
use crate::hook::Hook;

type SymbolIndex = HashMap<&'static str, Hook>;

fn index() -> &'static Mutex<SymbolIndex> {
    static INDEX: OnceLock<Mutex<SymbolIndex>> = OnceLock::new();
    INDEX.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Look up the hook for a human-readable symbol. `Ok(None)` means the
/// table has no such hook-point; `Err` means the program is not
/// instrumented at all.
pub fn find(symbol: &str) -> Result<Option<Hook>, HookError> {
    let mut idx = index().lock().unwrap_or_else(|e| e.into_inner());
    if let Some(hook) = idx.get(symbol) {
        return Ok(Some(hook.clone()));
    }
    let Some(desc) = descriptor::instrumentation_descriptor() else {
        return Err(HookError::NotInstrumented);
    };
    table_lookup(desc.hook_table, symbol, &mut idx)
}

fn table_lookup(
    table: &'static [DescriptorFn],
    symbol: &str,
    idx: &mut SymbolIndex,
) -> Result<Option<Hook>, HookError> {
    let target = normalize_symbol(symbol);
    let mut lo = 0usize;
    let mut hi = table.len();
    let mut found = None;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let hook = decode(table[mid], idx)?;
        let current = normalize_symbol(hook.symbol());
        match current.as_str().cmp(target.as_str()) {
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Equal => {
                found = Some(hook);
                hi = mid;
            }
            std::cmp::Ordering::Greater => hi = mid,
        }
    }
    Ok(found)
}

/// Decode one table entry into a `Hook`, inserting it into the index.
fn decode(entry: DescriptorFn, idx: &mut SymbolIndex) -> Result<Hook, HookError> {
    let mut raw = MaybeUninit::<HookDescriptor>::uninit();
    // Descriptor functions write the whole record through the out-pointer.
    unsafe { entry(raw.as_mut_ptr()) };
    let raw = unsafe { raw.assume_init() };

    if raw.symbol.is_empty() {
        return Err(HookError::InvalidDescriptor("empty symbol".to_string()));
    }
    if raw.prolog_var.is_null() {
        return Err(HookError::InvalidDescriptor(format!(
            "null prolog slot for `{}`",
            raw.symbol
        )));
    }

    let symbol = unvendor(raw.symbol);
    if let Some(hook) = idx.get(symbol) {
        return Ok(hook.clone());
    }
    let hook = Hook {
        symbol,
        func: raw.func,
        prolog_type_id: raw.prolog_type_id,
        prolog_type_name: raw.prolog_type_name,
        prolog_var: raw.prolog_var,
    };
    idx.insert(symbol, hook.clone());
    Ok(hook)
}

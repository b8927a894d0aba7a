//! The cross-crate hook manifest.
//!
//! Every per-crate compile appends the descriptor-function names it
//! generated; the main-crate compile reads the accumulated list to build
//! the hook table. Appends are whole lines, which is as much atomicity as
//! parallel compiles need: no reader runs until the main crate compiles,
//! and each crate appends only its own names.

use std::io::Write;
use std::path::Path;

use log::debug;

use crate::error::RewriteError;

/// Append descriptor-function names, one per line. Returns how many were
/// written.
pub fn append(path: &Path, names: &[String]) -> Result<usize, RewriteError> {
    if names.is_empty() {
        return Ok(0);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| RewriteError::io(parent.to_path_buf(), e))?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| RewriteError::io(path.to_path_buf(), e))?;
    for name in names {
        writeln!(file, "{name}").map_err(|e| RewriteError::io(path.to_path_buf(), e))?;
    }
    debug!("added {} hooks to {}", names.len(), path.display());
    Ok(names.len())
}

/// Read the manifest back; a missing file is an empty list.
pub fn read(path: &Path) -> Result<Vec<String>, RewriteError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(RewriteError::io(path.to_path_buf(), e)),
    };
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_accumulates_across_compiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("staging").join("hooks.txt");
        append(&path, &["_hook_descriptor_a_f".to_string()]).unwrap();
        append(&path, &["_hook_descriptor_b_g".to_string()]).unwrap();
        let names = read(&path).unwrap();
        assert_eq!(
            names,
            vec!["_hook_descriptor_a_f", "_hook_descriptor_b_g"]
        );
    }

    #[test]
    fn test_read_missing_manifest_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read(&dir.path().join("hooks.txt")).unwrap().is_empty());
    }
}

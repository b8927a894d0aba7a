//! The three rewriter policies.
//!
//! `default` instruments crates the configuration names (or everything in
//! full mode) and contributes descriptor names to the manifest; `main`
//! additionally assembles the hook table from the manifest; `runtime`
//! always runs and injects the atomic-load helper into the runtime support
//! crate. The dispatcher selects one per compile invocation.

use std::collections::HashMap;
use std::path::PathBuf;

use log::{debug, info, warn};

use hookbuild_abi::{names, normalize_symbol, unvendor, Config};

use crate::error::RewriteError;
use crate::instrument::PackageRewriter;
use crate::manifest;
use crate::table;

/// One `rustc` compile invocation as the dispatcher sees it.
pub struct CompileUnit {
    pub crate_name: String,
    /// The crate root source file from argv.
    pub root: PathBuf,
    /// Per-crate shadow build directory.
    pub build_dir: PathBuf,
    /// Parent of the build directories; home of the manifest.
    pub staging_dir: PathBuf,
    pub is_bin: bool,
}

impl CompileUnit {
    fn manifest_path(&self) -> PathBuf {
        self.staging_dir.join(names::MANIFEST_FILE)
    }
}

pub trait Instrumenter {
    /// Whether this compile should be forwarded untouched.
    fn is_ignored(&self) -> bool;
    /// Parse the crate and splice hook-points.
    fn instrument(&mut self) -> Result<(), RewriteError>;
    /// Append to the manifest and emit generated extra files; mounts them
    /// into the crate root where needed. Runs after `instrument`.
    fn write_extra_files(&mut self) -> Result<Vec<PathBuf>, RewriteError>;
    /// Emit the rewritten shadow tree; the returned map's crate-root entry
    /// is patched into argv.
    fn write_instrumented_files(&mut self)
        -> Result<HashMap<PathBuf, PathBuf>, RewriteError>;
}

/// Select the policy for a compile: the runtime support crate takes the
/// runtime policy, binary targets the main policy, everything else the
/// default policy.
pub fn instrumenter_for(
    unit: CompileUnit,
    config: Config,
    full: bool,
) -> Box<dyn Instrumenter> {
    if unit.crate_name == names::RUNTIME_CRATE {
        Box::new(RuntimePolicy {
            inner: DefaultPolicy::new(unit, config, full, None),
        })
    } else if unit.is_bin {
        // Binary targets are addressed by the literal package path `main`
        // in configuration, hook ids and symbols, whatever the bin crate
        // is called.
        Box::new(MainPolicy {
            inner: DefaultPolicy::new(unit, config, full, Some(names::MAIN_PKG)),
        })
    } else {
        Box::new(DefaultPolicy::new(unit, config, full, None))
    }
}

pub struct DefaultPolicy {
    unit: CompileUnit,
    config: Config,
    full: bool,
    /// Package path for signatures and ids; defaults to the crate name.
    pkg_path: String,
    rewriter: Option<PackageRewriter>,
}

impl DefaultPolicy {
    fn new(unit: CompileUnit, config: Config, full: bool, pkg_override: Option<&str>) -> Self {
        let pkg_path = pkg_override
            .map(str::to_string)
            .unwrap_or_else(|| unvendor(&unit.crate_name).to_string());
        Self {
            unit,
            config,
            full,
            pkg_path,
            rewriter: None,
        }
    }

    fn pkg_ignored(&self) -> bool {
        // The prefix list applies even in full mode; full only lifts the
        // config-membership requirement.
        if self
            .config
            .ignored_prefixes()
            .iter()
            .any(|prefix| self.pkg_path.starts_with(prefix))
        {
            return true;
        }
        if self.full {
            return false;
        }
        !self.config.hookpoints.contains_key(&self.pkg_path)
    }

    /// Parse the crate if not done yet; needed even for hook-less main and
    /// runtime compiles so generated files can be mounted into the root.
    fn ensure_rewriter(&mut self) -> Result<&mut PackageRewriter, RewriteError> {
        if self.rewriter.is_none() {
            self.rewriter = Some(PackageRewriter::new(
                &self.pkg_path,
                &self.unit.root,
                self.config.clone(),
                self.full,
            )?);
        }
        Ok(self.rewriter.as_mut().expect("just set"))
    }

    fn instrument_inner(&mut self) -> Result<(), RewriteError> {
        let pkg = self.pkg_path.clone();
        let rewriter = self.ensure_rewriter()?;
        if rewriter.is_no_std() {
            debug!("skipping no_std crate `{pkg}`");
            return Ok(());
        }
        let count = rewriter.instrument()?;
        info!("instrumented crate `{pkg}`: {count} hook-points");
        Ok(())
    }

    fn append_manifest(&mut self) -> Result<(), RewriteError> {
        let path = self.unit.manifest_path();
        if let Some(rewriter) = &self.rewriter {
            let names: Vec<String> =
                rewriter.descriptor_names().map(str::to_string).collect();
            manifest::append(&path, &names)?;
        }
        Ok(())
    }
}

impl Instrumenter for DefaultPolicy {
    fn is_ignored(&self) -> bool {
        self.pkg_ignored()
    }

    fn instrument(&mut self) -> Result<(), RewriteError> {
        self.instrument_inner()
    }

    fn write_extra_files(&mut self) -> Result<Vec<PathBuf>, RewriteError> {
        self.append_manifest()?;
        Ok(Vec::new())
    }

    fn write_instrumented_files(
        &mut self,
    ) -> Result<HashMap<PathBuf, PathBuf>, RewriteError> {
        match &mut self.rewriter {
            Some(rewriter) => rewriter.write(&self.unit.build_dir),
            None => Ok(HashMap::new()),
        }
    }
}

/// Main-crate policy: default instrumentation plus hook-table assembly.
pub struct MainPolicy {
    inner: DefaultPolicy,
}

impl MainPolicy {
    fn write_hook_table(&mut self) -> Result<Option<PathBuf>, RewriteError> {
        let manifest_path = self.inner.unit.manifest_path();
        let hooks = manifest::read(&manifest_path)?;
        report_unhooked(&self.inner.config, &hooks);
        if hooks.is_empty() {
            info!("skipping hook table generation: the list of hooks is empty");
            return Ok(None);
        }

        let path = self.inner.unit.build_dir.join(names::HOOK_TABLE_FILE);
        std::fs::create_dir_all(&self.inner.unit.build_dir)
            .map_err(|e| RewriteError::io(self.inner.unit.build_dir.clone(), e))?;
        std::fs::write(&path, table::hook_table_source(&hooks))
            .map_err(|e| RewriteError::io(path.clone(), e))?;
        info!(
            "created hook table for {} hooks from {} at {}",
            hooks.len(),
            manifest_path.display(),
            path.display()
        );

        self.inner
            .ensure_rewriter()?
            .mount_root_mod(names::HOOK_TABLE_MOD, &path);
        Ok(Some(path))
    }
}

impl Instrumenter for MainPolicy {
    fn is_ignored(&self) -> bool {
        // Never ignored: the hook table is emitted here even when the main
        // crate itself has no hooks.
        false
    }

    fn instrument(&mut self) -> Result<(), RewriteError> {
        if self.inner.pkg_ignored() {
            return Ok(());
        }
        self.inner.instrument_inner()
    }

    fn write_extra_files(&mut self) -> Result<Vec<PathBuf>, RewriteError> {
        let mut extra = Vec::new();
        if !self.inner.pkg_ignored() {
            extra.extend(self.inner.write_extra_files()?);
        }
        if let Some(table) = self.write_hook_table()? {
            extra.push(table);
        }
        Ok(extra)
    }

    fn write_instrumented_files(
        &mut self,
    ) -> Result<HashMap<PathBuf, PathBuf>, RewriteError> {
        self.inner.write_instrumented_files()
    }
}

/// Runtime-crate policy: default instrumentation plus the generated
/// atomic-load helper.
pub struct RuntimePolicy {
    inner: DefaultPolicy,
}

impl Instrumenter for RuntimePolicy {
    fn is_ignored(&self) -> bool {
        false
    }

    fn instrument(&mut self) -> Result<(), RewriteError> {
        self.inner.instrument_inner()
    }

    fn write_extra_files(&mut self) -> Result<Vec<PathBuf>, RewriteError> {
        self.inner.append_manifest()?;

        let path = self.inner.unit.build_dir.join(names::RUNTIME_EXTRA_FILE);
        std::fs::create_dir_all(&self.inner.unit.build_dir)
            .map_err(|e| RewriteError::io(self.inner.unit.build_dir.clone(), e))?;
        std::fs::write(&path, table::runtime_extension_source())
            .map_err(|e| RewriteError::io(path.clone(), e))?;
        self.inner
            .ensure_rewriter()?
            .mount_root_mod(names::RUNTIME_EXTRA_MOD, &path);
        Ok(vec![path])
    }

    fn write_instrumented_files(
        &mut self,
    ) -> Result<HashMap<PathBuf, PathBuf>, RewriteError> {
        self.inner.write_instrumented_files()
    }
}

/// Log configured hookpoints that never made it into the manifest, so
/// typos in signatures surface at build time instead of as attach-time
/// lookup misses.
fn report_unhooked(config: &Config, manifest_names: &[String]) {
    let hooked: std::collections::HashSet<&str> = manifest_names
        .iter()
        .filter_map(|name| name.strip_prefix(names::DESCRIPTOR_FN_PREFIX))
        .collect();
    let mut configured = 0usize;
    for signatures in config.hookpoints.values() {
        for signature in signatures {
            configured += 1;
            let id = normalize_symbol(signature);
            if !hooked.contains(id.as_str()) {
                warn!("configured hookpoint not instrumented: {signature}");
            }
        }
    }
    info!(
        "loaded {configured} hookpoints from config, {} in hook table",
        manifest_names.len()
    );
}

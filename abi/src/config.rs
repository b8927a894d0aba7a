//! Hook configuration loading.
//!
//! The configuration file is YAML, named by the `HOOKBUILD_CONFIG`
//! environment variable:
//!
//! ```yaml
//! hookpoints:
//!   demo:
//!     - demo::text::concat
//!     - demo::text::Parser::parse
//! codes:
//!   demo::text::concat:
//!     prolog: |
//!       let (_epilog, _abort) = (unsafe { &*_prolog })(&a, &b);
//! ignored_prefixes:
//!   - core
//!   - std
//! ```
//!
//! A missing file is not an error: the build proceeds with no hookpoints.
//!
//! Custom `codes` snippets run inside the instrumentation prologue and see
//! its locals: `_prolog` (the loaded prolog cell) plus the function's own
//! parameters in a prolog snippet, and `_epilog`/`_result0` in an epilog
//! snippet. A prolog snippet must bind `_epilog` and `_abort`, the way the
//! default statement does.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use log::warn;
use serde::Deserialize;
use thiserror::Error;

use crate::names;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file `{path}`: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file `{path}`: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
}

/// Custom source snippets replacing the default prolog call or epilog
/// invocation for one hooked signature.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CodeSnippets {
    #[serde(default)]
    pub prolog: String,
    #[serde(default)]
    pub epilog: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Crate name -> function signatures to hook.
    #[serde(default)]
    pub hookpoints: HashMap<String, Vec<String>>,

    /// Signature -> custom prolog/epilog snippets.
    #[serde(default)]
    pub codes: HashMap<String, CodeSnippets>,

    /// Overrides the built-in crate-name skip list of the default policy.
    #[serde(default)]
    pub ignored_prefixes: Option<Vec<String>>,
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load the configuration named by `HOOKBUILD_CONFIG`. Absence of the
    /// variable or the file yields an empty configuration with a warning;
    /// the build may legitimately have no hookpoints.
    pub fn from_env() -> Self {
        let Some(path) = std::env::var_os(names::ENV_CONFIG) else {
            warn!("{} not set, no hookpoints configured", names::ENV_CONFIG);
            return Self::default();
        };
        match Self::from_file(Path::new(&path)) {
            Ok(config) => config,
            Err(e) => {
                warn!("hook config unusable, proceeding without hookpoints: {e}");
                Self::default()
            }
        }
    }

    /// Signature sets keyed by crate name, the form the rewriter consumes.
    pub fn hookpoint_map(&self) -> HashMap<&str, HashSet<&str>> {
        self.hookpoints
            .iter()
            .map(|(pkg, signatures)| {
                (
                    pkg.as_str(),
                    signatures.iter().map(String::as_str).collect(),
                )
            })
            .collect()
    }

    /// Crate-name prefixes the default policy skips.
    pub fn ignored_prefixes(&self) -> Vec<&str> {
        match &self.ignored_prefixes {
            Some(prefixes) => prefixes.iter().map(String::as_str).collect(),
            None => names::IGNORED_CRATE_PREFIXES.to_vec(),
        }
    }

    pub fn snippets_for(&self, signature: &str) -> Option<&CodeSnippets> {
        self.codes.get(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
hookpoints:
  demo:
    - demo::text::concat
    - demo::text::Parser::parse
codes:
  demo::text::concat:
    prolog: |
      let (_epilog, _abort) = (unsafe { &*_prolog })(&a, &b);
    epilog: |
      drop(_result0.len());
"#;
        let config = Config::from_yaml(yaml).unwrap();
        let map = config.hookpoint_map();
        assert!(map["demo"].contains("demo::text::concat"));
        assert!(map["demo"].contains("demo::text::Parser::parse"));
        let code = config.snippets_for("demo::text::concat").unwrap();
        assert!(code.prolog.contains("_abort"));
        assert!(code.epilog.contains("_result0"));
    }

    #[test]
    fn test_empty_config() {
        let config = Config::from_yaml("").unwrap_or_default();
        assert!(config.hookpoint_map().is_empty());
        assert_eq!(
            config.ignored_prefixes(),
            names::IGNORED_CRATE_PREFIXES.to_vec()
        );
    }

    #[test]
    fn test_ignored_prefix_override() {
        let yaml = "ignored_prefixes:\n  - core\n  - mycorp_internal\n";
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.ignored_prefixes(), vec!["core", "mycorp_internal"]);
    }
}

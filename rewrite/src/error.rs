use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("failed to parse `{path}`: {source}")]
    Parse {
        path: PathBuf,
        source: syn::Error,
    },

    #[error("failed to parse custom {kind} snippet for `{signature}`: {source}\nsnippet:\n{snippet}")]
    Snippet {
        kind: &'static str,
        signature: String,
        snippet: String,
        source: syn::Error,
    },

    #[error("unsupported receiver on `{signature}`")]
    Receiver { signature: String },

    #[error("crate root `{0}` cannot be relocated (relative include! or ignore directive)")]
    RootNotRewritable(PathBuf),

    #[error("i/o error on `{path}`: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl RewriteError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RewriteError::Io {
            path: path.into(),
            source,
        }
    }
}

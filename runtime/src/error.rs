use thiserror::Error;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("the program is not instrumented")]
    NotInstrumented,

    #[error(
        "instrumentation version mismatch: the program was built with `{built}` \
         but this library expects `{expected}`"
    )]
    VersionMismatch { built: String, expected: String },

    #[error("no hook-point for symbol `{0}`")]
    NotFound(String),

    #[error("unexpected prolog type for hook `{symbol}`: expected {expected}")]
    PrologTypeMismatch {
        symbol: String,
        expected: &'static str,
    },

    #[error("invalid hook descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("attach failed: {0}")]
    AttachPanic(String),
}

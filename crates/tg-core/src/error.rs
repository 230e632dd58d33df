//! Per-artifact fault type.
//!
//! "No match" is not an error anywhere in the engine. These variants cover
//! the cases where an artifact cannot be processed at all; the pipeline turns
//! every one of them into an allow.

/// Error raised while processing a single artifact.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("no target domain for {method} detection")]
    MissingTarget { method: &'static str },
    #[error("invalid registry key: {0:?}")]
    InvalidRegistryKey(String),
    #[error("artifact has no kind")]
    MissingKind,
}

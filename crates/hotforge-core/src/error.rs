//! Error types for hotforge-core.

use thiserror::Error;

use crate::compile::Diagnostic;

/// Result type for hotforge-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in hotforge-core.
///
/// `Io`, `LibraryLoad`, `Toolchain` and `Resource` are all fatal to the
/// current batch and never retried; they differ only in what failed.
#[derive(Debug, Error)]
pub enum Error {
    /// One or more diagnostics of error severity aborted the batch.
    ///
    /// Carries every diagnostic collected so far and the symbol names the
    /// batch was asked to produce. No artifacts are retained and the prior
    /// production loader is left untouched.
    #[error("compilation failed for [{}]", symbols.join(", "))]
    Compilation {
        symbols: Vec<String>,
        diagnostics: Vec<Diagnostic>,
    },

    /// A compiled module loaded fine but does not export a required capability.
    #[error("symbol `{symbol}` does not provide required capability `{capability}`")]
    CapabilityMismatch { symbol: String, capability: String },

    /// Symbol resolution exhausted the entire fallback chain.
    #[error("symbol not found: {0}")]
    NotFound(String),

    /// A batch violated an input constraint (e.g. duplicate unit names).
    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    /// Output directory or loader construction failed for non-IO reasons.
    #[error("resource failure: {0}")]
    Resource(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to load a dynamic library.
    #[error("failed to load library: {0}")]
    LibraryLoad(#[from] libloading::Error),

    /// Toolchain error.
    #[error("toolchain error: {0}")]
    Toolchain(String),
}

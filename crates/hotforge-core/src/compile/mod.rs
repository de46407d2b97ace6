//! Compilation pipeline: units, diagnostics, virtual store and rustc
//! invocation.
//!
//! # Pipeline
//!
//! ```text
//! CompilationBatch
//!     │
//!     └── RustcInvoker::invoke
//!             ├── VirtualStore    (staged sources, fresh artifacts)
//!             ├── DiagnosticSink  (rustc JSON diagnostics)
//!             └── Toolchain       (host rustc)
//!                     │
//!                     └── Artifact per unit, all-or-nothing
//! ```
//!
//! Orchestration (loader selection, hot-swap, capability checks) lives in
//! [`crate::service`].

mod diagnostics;
mod invoker;
mod store;
mod toolchain;
mod types;
mod unit;

pub use diagnostics::{Diagnostic, DiagnosticSink, Severity, SourcePosition};
pub use invoker::RustcInvoker;
pub use store::{EntryKind, StoreEntry, VirtualStore};
pub use toolchain::Toolchain;
pub use types::{
    Artifact, CompilerConfig, dylib_extension, dylib_file_name, dylib_prefix, marker_symbol,
    rlib_file_name, sidecar_file_name, versioned_dylib_file_name,
};
pub use unit::{CompilationBatch, CompilationUnit, CompileMode, sanitize_symbol};

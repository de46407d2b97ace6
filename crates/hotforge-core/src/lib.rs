//! Runtime source compilation and hot-reloadable module loading.
//!
//! This crate provides:
//! - A compilation pipeline that turns source text into loadable dynamic
//!   libraries at run time, batch by batch, atomically
//! - Diagnostic collection from the host compiler
//! - A layered symbol resolver spanning fresh artifacts, previously loaded
//!   production code, the host process image and an external dependency
//!   provider
//! - Atomic hot-swap of the process-wide production loader, and ephemeral
//!   per-batch loaders for test compiles
//!
//! # Example
//!
//! ```no_run
//! use hotforge_core::{CompileMode, CompilerConfig, ScriptCompiler};
//!
//! # fn main() -> hotforge_core::Result<()> {
//! let compiler = ScriptCompiler::new(CompilerConfig::development())?;
//!
//! let (handle, diagnostics) = compiler.compile_single(
//!     "scripts.answer",
//!     "#[no_mangle]\npub extern \"C\" fn answer() -> i32 { 42 }",
//!     CompileMode::Production,
//! )?;
//! assert!(diagnostics.is_empty());
//!
//! let answer: i32 = unsafe {
//!     handle.get::<unsafe extern "C" fn() -> i32>("answer")?()
//! };
//! assert_eq!(answer, 42);
//! # Ok(())
//! # }
//! ```

pub mod compile;
pub mod error;
pub mod loader;
pub mod paths;
pub mod service;

pub use compile::{
    Artifact, CompilationBatch, CompilationUnit, CompileMode, CompilerConfig, Diagnostic,
    DiagnosticSink, EntryKind, RustcInvoker, Severity, SourcePosition, StoreEntry, Toolchain,
    VirtualStore,
};
pub use error::{Error, Result};
pub use loader::{DependencyProvider, DirProvider, ModuleLoader, ResolverStage, SymbolHandle};
pub use paths::ModuleDirs;
pub use service::{CompileOutcome, ScriptCompiler};

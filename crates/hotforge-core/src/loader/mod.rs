//! Symbol resolution for compiled modules.
//!
//! # Architecture
//!
//! ```text
//! ScriptCompiler
//!     │
//!     ├── production loader (swapped atomically on each Production batch)
//!     │       │
//!     │       └── ModuleLoader::resolve
//!     │               ├── own artifacts        (freshly compiled)
//!     │               ├── host process image   (already-resident symbols)
//!     │               ├── DependencyProvider   (external packages)
//!     │               └── parent delegation
//!     │
//!     └── ephemeral loader (per Test batch, released before compile returns)
//! ```
//!
//! Handles returned by resolution own an `Arc` to their backing library,
//! so they outlive loader swaps and ephemeral releases.

mod chain;
mod handle;
mod provider;

pub use chain::{ModuleLoader, ResolverStage};
pub use handle::SymbolHandle;
pub use provider::{DependencyProvider, DirProvider};

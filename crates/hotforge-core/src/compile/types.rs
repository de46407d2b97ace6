//! Common types for the compilation pipeline.

use std::path::PathBuf;

use crate::paths::ModuleDirs;

/// Configuration for the compiler.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// Directory for in-flight batch scratch (.hotforge/build/)
    pub build_dir: PathBuf,

    /// Persistent output directory for production artifacts (.hotforge/modules/)
    pub modules_dir: PathBuf,

    /// Rust edition passed to rustc for submitted sources
    pub edition: String,

    /// Emit debug info
    pub debug_info: bool,

    /// Optimization level (0-3)
    pub opt_level: u8,

    /// Additional rustc flags
    pub extra_rustc_flags: Vec<String>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            build_dir: PathBuf::from(".hotforge/build"),
            modules_dir: PathBuf::from(".hotforge/modules"),
            edition: "2021".to_string(),
            debug_info: true,
            opt_level: 0,
            extra_rustc_flags: Vec::new(),
        }
    }
}

impl CompilerConfig {
    /// Create config for fast development builds.
    pub fn development() -> Self {
        Self::default()
    }

    /// Create config for optimized builds.
    pub fn production() -> Self {
        Self {
            debug_info: false,
            opt_level: 3,
            ..Default::default()
        }
    }

    /// Create a config with paths from `ModuleDirs`.
    ///
    /// This is the recommended way to create a config.
    pub fn for_dirs(dirs: &ModuleDirs) -> Self {
        Self {
            build_dir: dirs.build_dir.clone(),
            modules_dir: dirs.modules_dir.clone(),
            ..Self::development()
        }
    }
}

/// The compiled, loadable output produced for one symbol name.
///
/// Only a fully successful batch yields artifacts, one per unit. The
/// dynamic-library payload is whatever rustc emitted and is treated as an
/// opaque blob; the rlib payload exists so later batches can type-check
/// against this module without recompiling it.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// Qualified symbol name.
    pub symbol_name: String,

    /// Crate-safe identifier (see [`super::sanitize_symbol`]).
    pub crate_name: String,

    /// Hash of the compiled source, versioning the persisted library.
    pub source_hash: u64,

    /// Dynamic-library bytes.
    pub payload: Vec<u8>,

    /// Rust static-library bytes for cross-batch references.
    pub rlib_payload: Vec<u8>,
}

impl Artifact {
    /// File name of the loadable library within a loader origin directory.
    ///
    /// Versioned by source hash: the dynamic loader identifies loaded
    /// objects by name, so a replacement must never reuse the path of a
    /// library that may still be mapped.
    pub fn dylib_file_name(&self) -> String {
        versioned_dylib_file_name(&self.crate_name, self.source_hash)
    }

    /// File name of the companion rlib within a loader origin directory.
    ///
    /// Unversioned: the compiler locates rlibs by canonical name on the
    /// search path, and rlibs are never mapped at run time, so replacing
    /// one in place is safe.
    pub fn rlib_file_name(&self) -> String {
        rlib_file_name(&self.crate_name)
    }
}

/// Platform-specific dynamic library extension.
pub fn dylib_extension() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        "dll"
    }
    #[cfg(target_os = "macos")]
    {
        "dylib"
    }
    #[cfg(target_os = "linux")]
    {
        "so"
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        "so" // Default to .so for unknown platforms
    }
}

/// Platform-specific dynamic library prefix.
pub fn dylib_prefix() -> &'static str {
    #[cfg(target_os = "windows")]
    {
        ""
    }
    #[cfg(not(target_os = "windows"))]
    {
        "lib"
    }
}

/// Dynamic-library file name for a crate-safe identifier.
pub fn dylib_file_name(crate_name: &str) -> String {
    format!("{}{}.{}", dylib_prefix(), crate_name, dylib_extension())
}

/// Versioned dynamic-library file name for a crate-safe identifier.
///
/// Replacements of a module land under a fresh name so libraries still
/// mapped by live handles are never reopened under a stale identity.
pub fn versioned_dylib_file_name(crate_name: &str, source_hash: u64) -> String {
    format!(
        "{}{}_{:016x}.{}",
        dylib_prefix(),
        crate_name,
        source_hash,
        dylib_extension()
    )
}

/// Rlib file name for a crate-safe identifier.
pub fn rlib_file_name(crate_name: &str) -> String {
    format!("lib{crate_name}.rlib")
}

/// Sidecar file recording the original qualified symbol name next to a
/// persisted dylib, so a restarted process can re-index the modules dir.
pub fn sidecar_file_name(crate_name: &str) -> String {
    format!("{crate_name}.sym")
}

/// Marker symbol exported by every compiled unit.
///
/// The loader chain's host-runtime stage and artifact verification look
/// this up by name.
pub fn marker_symbol(crate_name: &str) -> String {
    format!("__hotforge_unit_{crate_name}")
}

//! Directory management for the compilation subsystem.
//!
//! Provides a consistent directory layout so that every component roots
//! its build scratch and persistent module output at the same places.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Directory structure for a hotforge deployment.
///
/// All hotforge-related files are stored under a `.hotforge` directory:
///
/// ```text
/// .hotforge/
/// ├── build/     # Per-batch compilation scratch (removed after each batch)
/// └── modules/   # Persistent production artifacts (survives restart)
/// ```
#[derive(Debug, Clone)]
pub struct ModuleDirs {
    /// The `.hotforge` directory itself.
    pub root_dir: PathBuf,

    /// Scratch directory for in-flight compilations.
    pub build_dir: PathBuf,

    /// Persistent output directory the production loader is rooted at.
    ///
    /// This is the only state that survives a process restart.
    pub modules_dir: PathBuf,
}

impl ModuleDirs {
    /// Create the directory structure under `base`.
    ///
    /// Creates all necessary directories if they don't exist.
    ///
    /// # Errors
    /// Returns an error if directory creation fails.
    pub fn at(base: &Path) -> Result<Self> {
        let root_dir = base.join(".hotforge");
        let build_dir = root_dir.join("build");
        let modules_dir = root_dir.join("modules");

        // Error::Io auto-converts via #[from]
        fs::create_dir_all(&build_dir)?;
        fs::create_dir_all(&modules_dir)?;

        Ok(Self {
            root_dir,
            build_dir,
            modules_dir,
        })
    }

    /// Create the directory structure in the current working directory.
    pub fn in_cwd() -> Result<Self> {
        Self::at(Path::new("."))
    }
}

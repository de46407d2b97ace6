//! Rustc toolchain discovery.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};

/// Locates and describes the host compiler.
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// Path to rustc
    rustc_path: PathBuf,

    /// Toolchain version string
    version: String,
}

impl Toolchain {
    /// Discover the host rustc, probing its version.
    pub fn discover() -> Result<Self> {
        let rustc_path = Self::find_rustc()?;
        let version = Self::get_rustc_version(&rustc_path)?;

        Ok(Self {
            rustc_path,
            version,
        })
    }

    /// Get the rustc path.
    pub fn rustc_path(&self) -> &Path {
        &self.rustc_path
    }

    /// Get the toolchain version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Find rustc in PATH.
    fn find_rustc() -> Result<PathBuf> {
        which::which("rustc").map_err(|_| Error::Toolchain("rustc not found in PATH".to_string()))
    }

    /// Get rustc version string.
    fn get_rustc_version(rustc: &Path) -> Result<String> {
        let output = Command::new(rustc)
            .args(["--version"])
            .output()
            .map_err(|e| Error::Toolchain(format!("Failed to run rustc: {}", e)))?;

        if !output.status.success() {
            return Err(Error::Toolchain("Failed to get rustc version".to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

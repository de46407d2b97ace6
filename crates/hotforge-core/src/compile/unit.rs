//! Compilation units and batches.
//!
//! A unit is one named source buffer; a batch is the set of units compiled
//! together, atomically. Units never outlive the batch that owns them.

use std::collections::BTreeSet;
use std::path::PathBuf;

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

/// Isolation regime for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileMode {
    /// Artifacts go to the persistent modules directory and the process-wide
    /// production loader is re-rooted on success.
    Production,

    /// Artifacts go to a temporary directory; the loader built for them is
    /// released before `compile` returns.
    Test,
}

/// One named source buffer submitted for compilation.
#[derive(Debug, Clone)]
pub struct CompilationUnit {
    symbol_name: String,
    source_text: String,
}

impl CompilationUnit {
    /// Create a unit from a qualified symbol name (e.g. `scripts.reports.daily`)
    /// and complete source text.
    pub fn new(symbol_name: impl Into<String>, source_text: impl Into<String>) -> Self {
        Self {
            symbol_name: symbol_name.into(),
            source_text: source_text.into(),
        }
    }

    /// The qualified symbol name this unit produces.
    pub fn symbol_name(&self) -> &str {
        &self.symbol_name
    }

    /// The source text, verbatim as submitted.
    pub fn source_text(&self) -> &str {
        &self.source_text
    }

    /// Crate-safe identifier derived from the qualified symbol name.
    ///
    /// Units in the same batch reference one another by this name.
    pub fn crate_name(&self) -> String {
        sanitize_symbol(&self.symbol_name)
    }
}

/// Convert a qualified symbol name to an identifier usable as a crate name.
///
/// Dots, path separators and any other non-identifier characters become
/// underscores; a leading digit gets an underscore prefix. The mapping is
/// deterministic so every component derives the same file and marker names
/// for a given symbol.
pub fn sanitize_symbol(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 1);
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    if out.chars().next().is_none_or(|c| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

/// A set of compilation units compiled together, atomically.
#[derive(Debug, Default)]
pub struct CompilationBatch {
    units: Vec<CompilationUnit>,
    mode: CompileMode,
    source_paths: Vec<PathBuf>,
    required_capabilities: FxHashMap<String, BTreeSet<String>>,
}

impl Default for CompileMode {
    fn default() -> Self {
        Self::Test
    }
}

impl CompilationBatch {
    /// Create an empty batch in the given mode.
    pub fn new(mode: CompileMode) -> Self {
        Self {
            units: Vec::new(),
            mode,
            source_paths: Vec::new(),
            required_capabilities: FxHashMap::default(),
        }
    }

    /// Add a unit to the batch.
    pub fn with_unit(mut self, unit: CompilationUnit) -> Self {
        self.units.push(unit);
        self
    }

    /// Add a search path visible to cross-references during compilation.
    pub fn with_source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_paths.push(path.into());
        self
    }

    /// Require that the artifact for `symbol` exports `capability`.
    ///
    /// A capability is the name of an exported symbol the compiled library
    /// must provide; an unmet requirement fails the batch with
    /// [`Error::CapabilityMismatch`] after compilation succeeded.
    pub fn require_capability(
        mut self,
        symbol: impl Into<String>,
        capability: impl Into<String>,
    ) -> Self {
        self.required_capabilities
            .entry(symbol.into())
            .or_default()
            .insert(capability.into());
        self
    }

    /// The units in submission order.
    pub fn units(&self) -> &[CompilationUnit] {
        &self.units
    }

    /// The batch's isolation regime.
    pub fn mode(&self) -> CompileMode {
        self.mode
    }

    /// Additional search paths for cross-references.
    pub fn source_paths(&self) -> &[PathBuf] {
        &self.source_paths
    }

    /// Capabilities required of the artifact for `symbol`, if any.
    pub fn required_capabilities(&self, symbol: &str) -> Option<&BTreeSet<String>> {
        self.required_capabilities.get(symbol)
    }

    /// A batch with zero units is a no-op: no artifacts, no error.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Check input constraints: unit names must be unique within the batch,
    /// both as submitted and after sanitization. Distinct names mapping to
    /// one crate name would silently overwrite each other's staged sources
    /// and artifacts.
    pub fn validate(&self) -> Result<()> {
        let mut seen: FxHashMap<String, &str> = FxHashMap::default();
        for unit in &self.units {
            if let Some(prev) = seen.insert(unit.crate_name(), unit.symbol_name()) {
                return Err(Error::InvalidBatch(if prev == unit.symbol_name() {
                    format!("duplicate symbol name `{}`", prev)
                } else {
                    format!(
                        "symbol names `{}` and `{}` collide after sanitization",
                        prev,
                        unit.symbol_name()
                    )
                }));
            }
        }
        Ok(())
    }
}

//! Rustc invocation for one compilation batch.
//!
//! Feeds each unit to the host compiler as an in-memory source staged in
//! the batch's virtual store. Units are emitted as `cdylib` (the loadable
//! artifact) plus `rlib` (so later units — in this batch or a later one —
//! can reference this module by crate name without recompiling it). The
//! scratch directory and every loader-origin directory are on the library
//! search path, which is how in-batch and historical symbols share one
//! compiler-visible namespace.

use std::collections::hash_map::DefaultHasher;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::process::Command;
use std::time::Instant;

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::loader::ModuleLoader;

use super::diagnostics::DiagnosticSink;
use super::store::{EntryKind, VirtualStore};
use super::toolchain::Toolchain;
use super::types::{Artifact, CompilerConfig, dylib_file_name, marker_symbol, rlib_file_name};
use super::unit::CompilationUnit;

/// Wraps the host rustc for repeated, serialized batch invocations.
///
/// The only state that persists between invocations is the accumulated
/// search-path list, which grows by design and tolerates re-application.
pub struct RustcInvoker {
    config: CompilerConfig,
    toolchain: Toolchain,
    search_paths: Vec<PathBuf>,
}

impl RustcInvoker {
    /// Create a new invoker.
    pub fn new(config: CompilerConfig, toolchain: Toolchain) -> Self {
        Self {
            config,
            toolchain,
            search_paths: Vec::new(),
        }
    }

    /// Add a library search path. Idempotent: re-adding a known path is a
    /// no-op.
    pub fn add_search_path(&mut self, path: PathBuf) {
        if !self.search_paths.contains(&path) {
            self.search_paths.push(path);
        }
    }

    /// The accumulated search paths.
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Compile every unit, collecting diagnostics into `sink` regardless of
    /// outcome. Returns one artifact per unit, or fails with no partial
    /// artifacts.
    pub fn invoke(
        &mut self,
        units: &[CompilationUnit],
        mut store: VirtualStore,
        sink: &mut DiagnosticSink,
        chain: Option<&ModuleLoader>,
    ) -> Result<FxHashMap<String, Artifact>> {
        if units.is_empty() {
            return Ok(FxHashMap::default());
        }

        // Origin directories of the active chain join the search path so
        // previously compiled modules stay referenceable.
        if let Some(chain) = chain {
            for origin in chain.origins() {
                self.add_search_path(origin);
            }
        }

        // Stage all sources before compiling anything, so the namespace the
        // compiler sees is complete up front.
        for unit in units {
            let wrapped = wrap_source(unit);
            let src = store.scratch().join(format!("{}.rs", unit.crate_name()));
            fs::write(&src, &wrapped)?;
            store.put_pending(unit.symbol_name(), wrapped);
        }

        tracing::debug!(
            "Batch namespace: pending {:?}, loaded {:?}",
            store.list(EntryKind::Source, None),
            store.list(EntryKind::Artifact, chain),
        );

        // Every unit is attempted even after a failure, so the caller gets
        // the full diagnostics picture for the batch.
        let mut all_ok = true;
        for unit in units {
            let start = Instant::now();
            if self.compile_unit(unit, &mut store, sink)? {
                tracing::info!(
                    "Compiled {} in {} ms",
                    unit.symbol_name(),
                    start.elapsed().as_millis()
                );
            } else {
                all_ok = false;
                tracing::warn!("Compilation of {} failed", unit.symbol_name());
            }
        }

        if !all_ok {
            return Err(Error::Compilation {
                symbols: units.iter().map(|u| u.symbol_name().to_string()).collect(),
                diagnostics: sink.entries().to_vec(),
            });
        }

        Ok(store.into_artifacts())
    }

    /// Compile one staged unit. `Ok(false)` means the compiler rejected it;
    /// hard failures (rustc unavailable, missing output) are errors.
    fn compile_unit(
        &self,
        unit: &CompilationUnit,
        store: &mut VirtualStore,
        sink: &mut DiagnosticSink,
    ) -> Result<bool> {
        let crate_name = unit.crate_name();
        let src = store.scratch().join(format!("{crate_name}.rs"));

        let mut cmd = Command::new(self.toolchain.rustc_path());
        cmd.arg(&src)
            .arg("--crate-name")
            .arg(&crate_name)
            .arg("--crate-type=cdylib,rlib")
            .arg(format!("--edition={}", self.config.edition))
            .arg("--out-dir")
            .arg(store.scratch())
            .arg("--error-format=json")
            .arg(format!("-Copt-level={}", self.config.opt_level));

        if self.config.debug_info {
            cmd.arg("-g");
        }

        cmd.arg("-L").arg(store.scratch());
        for path in &self.search_paths {
            cmd.arg("-L").arg(path);
        }

        for flag in &self.config.extra_rustc_flags {
            cmd.arg(flag);
        }

        let mark = sink.len();
        let output = cmd
            .output()
            .map_err(|e| Error::Toolchain(format!("Failed to run rustc: {}", e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        sink.collect_rustc_output(unit.symbol_name(), &stderr, wrapper_prelude_lines());

        // "No definitive success" counts as failure even with a zero exit.
        // Only this unit's diagnostics decide; earlier units already failed
        // on their own.
        if !output.status.success() || sink.has_errors_since(mark) {
            return Ok(false);
        }

        let payload = fs::read(store.scratch().join(dylib_file_name(&crate_name)))?;
        let rlib_payload = fs::read(store.scratch().join(rlib_file_name(&crate_name)))?;
        store.put_artifact(Artifact {
            symbol_name: unit.symbol_name().to_string(),
            crate_name,
            source_hash: hash_source(unit.source_text()),
            payload,
            rlib_payload,
        });

        Ok(true)
    }
}

/// Hash of a unit's submitted source text, used to version its persisted
/// library file.
fn hash_source(source: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    source.hash(&mut hasher);
    hasher.finish()
}

/// Lines prepended to every unit before compilation. Diagnostic positions
/// are shifted back by the line count of this prelude so they point into
/// the submitted source.
const WRAPPER_PRELUDE: &str = "\
// Auto-generated unit wrapper
#![allow(unused_imports)]
#![allow(dead_code)]
#![allow(non_upper_case_globals)]

";

pub(crate) fn wrapper_prelude_lines() -> usize {
    WRAPPER_PRELUDE.matches('\n').count()
}

/// Wrap unit source for compilation.
///
/// Prepends lint silencing (submitted scripts are rarely lint-clean) and
/// appends the exported unit marker the loader chain's host-runtime stage
/// looks for.
pub(crate) fn wrap_source(unit: &CompilationUnit) -> String {
    let mut code =
        String::with_capacity(WRAPPER_PRELUDE.len() + unit.source_text().len() + 64);

    code.push_str(WRAPPER_PRELUDE);
    code.push_str(unit.source_text());
    code.push_str("\n\n");

    code.push_str("#[no_mangle]\n");
    code.push_str(&format!(
        "pub static {}: u8 = 0;\n",
        marker_symbol(&unit.crate_name())
    ));

    code
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invoker(temp: &tempfile::TempDir) -> RustcInvoker {
        let config = CompilerConfig {
            build_dir: temp.path().join("build"),
            modules_dir: temp.path().join("modules"),
            ..CompilerConfig::development()
        };
        RustcInvoker::new(config, Toolchain::discover().unwrap())
    }

    #[test]
    fn test_wrap_source() {
        let unit = CompilationUnit::new(
            "scripts.answer",
            "#[no_mangle]\npub extern \"C\" fn answer() -> i32 { 42 }",
        );
        let wrapped = wrap_source(&unit);

        assert!(wrapped.contains("pub extern \"C\" fn answer"));
        assert!(wrapped.contains("__hotforge_unit_scripts_answer"));
        assert!(wrapped.contains("#![allow(dead_code)]"));
        // Submitted source starts right after the prelude.
        assert_eq!(
            wrapped.lines().nth(wrapper_prelude_lines()),
            Some("#[no_mangle]")
        );
    }

    #[test]
    fn test_search_paths_idempotent() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut invoker = invoker(&temp);

        invoker.add_search_path(temp.path().to_path_buf());
        invoker.add_search_path(temp.path().to_path_buf());
        assert_eq!(invoker.search_paths().len(), 1);
    }

    #[test]
    fn test_empty_invocation_is_noop() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut invoker = invoker(&temp);
        let store = VirtualStore::new(&temp.path().join("build")).unwrap();
        let mut sink = DiagnosticSink::new();

        let artifacts = invoker.invoke(&[], store, &mut sink, None).unwrap();
        assert!(artifacts.is_empty());
        assert!(sink.is_empty());
    }

    #[test]
    fn test_compile_simple_unit() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut invoker = invoker(&temp);
        let store = VirtualStore::new(&temp.path().join("build")).unwrap();
        let mut sink = DiagnosticSink::new();

        let unit = CompilationUnit::new(
            "scripts.answer",
            "#[no_mangle]\npub extern \"C\" fn answer() -> i32 { 42 }",
        );

        let artifacts = invoker
            .invoke(&[unit], store, &mut sink, None)
            .expect("compilation should succeed");

        let artifact = &artifacts["scripts.answer"];
        assert_eq!(artifact.crate_name, "scripts_answer");
        assert!(!artifact.payload.is_empty());
        assert!(!artifact.rlib_payload.is_empty());
        assert!(!sink.has_errors());
    }

    #[test]
    fn test_failed_unit_yields_no_artifacts() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut invoker = invoker(&temp);
        let store = VirtualStore::new(&temp.path().join("build")).unwrap();
        let mut sink = DiagnosticSink::new();

        let good = CompilationUnit::new(
            "scripts.good",
            "#[no_mangle]\npub extern \"C\" fn good() -> i32 { 1 }",
        );
        let bad = CompilationUnit::new("scripts.bad", "pub fn broken() -> undefined_symbol {}");

        let result = invoker.invoke(&[good, bad], store, &mut sink, None);

        match result {
            Err(Error::Compilation { symbols, diagnostics }) => {
                assert!(symbols.contains(&"scripts.good".to_string()));
                assert!(symbols.contains(&"scripts.bad".to_string()));
                assert!(diagnostics.iter().any(|d| d.message.contains("undefined_symbol")));
            }
            other => panic!("expected Compilation error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_diagnostics_collected_for_every_failed_unit() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut invoker = invoker(&temp);
        let store = VirtualStore::new(&temp.path().join("build")).unwrap();
        let mut sink = DiagnosticSink::new();

        let first = CompilationUnit::new("scripts.bad1", "pub fn f() -> missing_one {}");
        let second = CompilationUnit::new("scripts.bad2", "pub fn g() -> missing_two {}");

        match invoker.invoke(&[first, second], store, &mut sink, None) {
            Err(Error::Compilation { diagnostics, .. }) => {
                // The first failure must not stop diagnostics for the rest.
                assert!(diagnostics
                    .iter()
                    .any(|d| d.symbol == "scripts.bad1" && d.message.contains("missing_one")));
                assert!(diagnostics
                    .iter()
                    .any(|d| d.symbol == "scripts.bad2" && d.message.contains("missing_two")));
            }
            other => panic!("expected Compilation error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_cross_unit_reference() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut invoker = invoker(&temp);
        let store = VirtualStore::new(&temp.path().join("build")).unwrap();
        let mut sink = DiagnosticSink::new();

        let base = CompilationUnit::new("scripts.base", "pub fn seven() -> i32 { 7 }");
        let user = CompilationUnit::new(
            "scripts.user",
            "extern crate scripts_base;\n#[no_mangle]\npub extern \"C\" fn fourteen() -> i32 { scripts_base::seven() * 2 }",
        );

        let artifacts = invoker
            .invoke(&[base, user], store, &mut sink, None)
            .expect("cross-unit reference should compile");
        assert_eq!(artifacts.len(), 2);
    }
}

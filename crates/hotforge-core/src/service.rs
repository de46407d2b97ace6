//! Compile orchestration facade.
//!
//! [`ScriptCompiler`] is the single entry point callers use: it builds a
//! fresh virtual store and diagnostic sink per batch, drives the invoker,
//! and on success re-roots the appropriate loader — the process-wide
//! production loader for [`CompileMode::Production`], a throwaway ephemeral
//! loader for [`CompileMode::Test`].
//!
//! Compiles are serialized by a facade-level mutex. Readers resolving
//! symbols are never blocked by a compile in progress except during the
//! brief swap of the production loader reference; they see the old loader
//! fully or the new loader fully, never a partial state.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use rustc_hash::FxHashMap;

use crate::compile::{
    Artifact, CompilationBatch, CompilationUnit, CompileMode, CompilerConfig, Diagnostic,
    DiagnosticSink, RustcInvoker, Toolchain, VirtualStore, sidecar_file_name,
};
use crate::error::{Error, Result};
use crate::loader::{DependencyProvider, ModuleLoader, SymbolHandle};

/// Result of a successful compile: one handle per requested symbol, plus
/// every diagnostic the batch produced (success does not imply an empty
/// list — warnings land here too).
#[derive(Debug, Default)]
pub struct CompileOutcome {
    pub handles: FxHashMap<String, SymbolHandle>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Facade over the compilation pipeline and loader chain.
pub struct ScriptCompiler {
    config: CompilerConfig,

    /// Serializes compiles: the invoker's search-path list grows
    /// incrementally and the production swap must be observed whole.
    invoker: Mutex<RustcInvoker>,

    /// The single piece of long-lived shared state in this subsystem.
    /// Replaced, never mutated in place.
    production: RwLock<Arc<ModuleLoader>>,

    provider: Option<Arc<dyn DependencyProvider>>,
}

impl ScriptCompiler {
    /// Create a compiler with no dependency provider.
    pub fn new(config: CompilerConfig) -> Result<Self> {
        Self::with_provider(config, None)
    }

    /// Create a compiler consulting `provider` as the fallback symbol
    /// source.
    pub fn with_provider(
        config: CompilerConfig,
        provider: Option<Arc<dyn DependencyProvider>>,
    ) -> Result<Self> {
        let toolchain = Toolchain::discover()?;
        tracing::info!("Using {}", toolchain.version());

        fs::create_dir_all(&config.build_dir)?;
        fs::create_dir_all(&config.modules_dir)?;

        // Re-index artifacts persisted by a previous process; the modules
        // directory is the only state that survives restart.
        let production = Arc::new(ModuleLoader::scan(
            &config.modules_dir,
            &config.modules_dir,
            None,
            provider.clone(),
        )?);

        Ok(Self {
            invoker: Mutex::new(RustcInvoker::new(config.clone(), toolchain)),
            config,
            production: RwLock::new(production),
            provider,
        })
    }

    /// The compiler's configuration.
    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compile a batch end-to-end.
    ///
    /// An empty batch is a no-op. Any error-severity diagnostic aborts the
    /// batch before any loader mutation, so the prior production loader is
    /// left untouched on failure.
    pub fn compile(&self, batch: CompilationBatch) -> Result<CompileOutcome> {
        batch.validate()?;
        if batch.is_empty() {
            return Ok(CompileOutcome::default());
        }

        // Only one batch may be mid-compilation at a time.
        let mut invoker = self
            .invoker
            .lock()
            .map_err(|_| Error::Resource("compile lock poisoned".to_string()))?;

        // Search-path additions accumulate by design.
        for path in batch.source_paths() {
            invoker.add_search_path(path.clone());
        }

        let store = VirtualStore::new(&self.config.build_dir)?;
        let mut sink = DiagnosticSink::new();
        let current = self.current_loader()?;

        match batch.mode() {
            CompileMode::Production => {
                self.compile_production(&mut invoker, &batch, store, &mut sink, &current)
            }
            CompileMode::Test => {
                self.compile_test(&mut invoker, &batch, store, &mut sink, &current)
            }
        }
    }

    /// Convenience for the common one-unit case.
    pub fn compile_single(
        &self,
        symbol_name: &str,
        source_text: &str,
        mode: CompileMode,
    ) -> Result<(SymbolHandle, Vec<Diagnostic>)> {
        let batch = CompilationBatch::new(mode)
            .with_unit(CompilationUnit::new(symbol_name, source_text));
        let mut outcome = self.compile(batch)?;
        let handle = outcome
            .handles
            .remove(symbol_name)
            .ok_or_else(|| Error::NotFound(symbol_name.to_string()))?;
        Ok((handle, outcome.diagnostics))
    }

    /// Resolve a symbol through the current production loader.
    pub fn resolve(&self, symbol: &str) -> Result<SymbolHandle> {
        self.current_loader()?.resolve(symbol)
    }

    /// Snapshot of the current production loader.
    pub fn production_loader(&self) -> Result<Arc<ModuleLoader>> {
        self.current_loader()
    }

    fn current_loader(&self) -> Result<Arc<ModuleLoader>> {
        Ok(self
            .production
            .read()
            .map_err(|_| Error::Resource("loader lock poisoned".to_string()))?
            .clone())
    }

    fn compile_production(
        &self,
        invoker: &mut RustcInvoker,
        batch: &CompilationBatch,
        store: VirtualStore,
        sink: &mut DiagnosticSink,
        current: &Arc<ModuleLoader>,
    ) -> Result<CompileOutcome> {
        fs::create_dir_all(&self.config.modules_dir)?;

        let artifacts = invoker.invoke(batch.units(), store, sink, Some(current))?;

        // Stage the new libraries under their versioned names. Nothing the
        // prior loader or the sidecars reference is touched yet.
        for artifact in artifacts.values() {
            persist_bytes(
                &self.config.modules_dir,
                &artifact.dylib_file_name(),
                &artifact.payload,
            )?;
        }

        // The replacement re-indexes everything committed so far, exactly
        // as a restarted process would, with the staged libraries layered
        // on top.
        let mut loader = ModuleLoader::scan(
            &self.config.modules_dir,
            &self.config.modules_dir,
            None,
            self.provider.clone(),
        )?;
        for artifact in artifacts.values() {
            loader.register(
                artifact.symbol_name.clone(),
                self.config.modules_dir.join(artifact.dylib_file_name()),
            );
        }
        let loader = Arc::new(loader);

        // Verify before committing: a rejected batch must leave the prior
        // artifacts, sidecars and loader untouched. Staged libraries it
        // leaves behind are invisible to re-indexing and get swept on the
        // next successful commit.
        let handles = resolve_requested(&loader, batch)?;

        // Commit: sidecars point at the new libraries and superseded
        // versions are swept only once the batch is known good.
        for artifact in artifacts.values() {
            commit_artifact(&self.config.modules_dir, artifact)?;
        }

        // The swap is the single observable operation; the prior loader is
        // closed only after the replacement fully succeeded.
        let previous = {
            let mut slot = self
                .production
                .write()
                .map_err(|_| Error::Resource("loader lock poisoned".to_string()))?;
            std::mem::replace(&mut *slot, loader)
        };
        previous.close();
        tracing::info!(
            "Production loader swapped ({} new artifacts)",
            artifacts.len()
        );

        Ok(CompileOutcome {
            handles,
            diagnostics: std::mem::take(sink).into_entries(),
        })
    }

    fn compile_test(
        &self,
        invoker: &mut RustcInvoker,
        batch: &CompilationBatch,
        store: VirtualStore,
        sink: &mut DiagnosticSink,
        current: &Arc<ModuleLoader>,
    ) -> Result<CompileOutcome> {
        // Ephemeral output location, removed on every exit path.
        let out_dir = tempfile::tempdir()?;

        let artifacts = invoker.invoke(batch.units(), store, sink, Some(current))?;
        for artifact in artifacts.values() {
            persist_bytes(out_dir.path(), &artifact.dylib_file_name(), &artifact.payload)?;
            commit_artifact(out_dir.path(), artifact)?;
        }

        // Parent is the current production loader, so test code still sees
        // production symbols without ever shadowing them for other callers.
        let ephemeral = Arc::new(ModuleLoader::scan(
            out_dir.path(),
            &self.config.modules_dir,
            Some(current),
            self.provider.clone(),
        )?);

        let handles = resolve_requested(&ephemeral, batch);

        // Release the loader and its directory before returning, whatever
        // the resolution outcome. Handles stay usable through their own
        // library references. A leftover temp dir is not worth masking a
        // resolution error.
        ephemeral.close();
        drop(ephemeral);
        if let Err(e) = out_dir.close() {
            tracing::warn!("Failed to remove ephemeral output dir: {}", e);
        }

        Ok(CompileOutcome {
            handles: handles?,
            diagnostics: std::mem::take(sink).into_entries(),
        })
    }
}

/// Resolve every requested symbol through `loader` and check required
/// capabilities.
fn resolve_requested(
    loader: &Arc<ModuleLoader>,
    batch: &CompilationBatch,
) -> Result<FxHashMap<String, SymbolHandle>> {
    let mut handles = FxHashMap::default();

    for unit in batch.units() {
        let handle = loader.resolve(unit.symbol_name())?;

        if let Some(capabilities) = batch.required_capabilities(unit.symbol_name()) {
            for capability in capabilities {
                if !handle.has_capability(capability) {
                    return Err(Error::CapabilityMismatch {
                        symbol: unit.symbol_name().to_string(),
                        capability: capability.clone(),
                    });
                }
            }
        }

        handles.insert(unit.symbol_name().to_string(), handle);
    }

    Ok(handles)
}

/// Commit a staged artifact: persist its rlib, point the sidecar at the
/// new library and sweep superseded versions.
///
/// Everything here is deferred until after batch verification; the dylib
/// itself is staged earlier (write-then-rename, hash-versioned name), so a
/// library mapped by the current loader is never touched in place and a
/// rejected batch never disturbs the committed state.
fn commit_artifact(dir: &Path, artifact: &Artifact) -> Result<()> {
    let dylib_file = artifact.dylib_file_name();
    persist_bytes(dir, &artifact.rlib_file_name(), &artifact.rlib_payload)?;
    persist_bytes(
        dir,
        &sidecar_file_name(&artifact.crate_name),
        format!("{}\n{}\n", artifact.symbol_name, dylib_file).as_bytes(),
    )?;
    remove_superseded(dir, &artifact.crate_name, &dylib_file);
    Ok(())
}

/// Unlink older versioned libraries for `crate_name`, keeping `current`.
fn remove_superseded(dir: &Path, crate_name: &str, current: &str) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name != current && is_versioned_dylib(name, crate_name) {
            if let Err(e) = fs::remove_file(entry.path()) {
                tracing::warn!("Cannot remove superseded {}: {}", name, e);
            }
        }
    }
}

/// Whether `name` has the exact `lib<crate>_<16 hex>.<ext>` shape for
/// `crate_name`. The hash-width check keeps crates whose names share a
/// prefix from matching each other's files.
fn is_versioned_dylib(name: &str, crate_name: &str) -> bool {
    use crate::compile::{dylib_extension, dylib_prefix};

    name.strip_prefix(dylib_prefix())
        .and_then(|rest| rest.strip_prefix(crate_name))
        .and_then(|rest| rest.strip_prefix('_'))
        .and_then(|rest| rest.strip_suffix(dylib_extension()))
        .and_then(|rest| rest.strip_suffix('.'))
        .is_some_and(|hash| hash.len() == 16 && hash.bytes().all(|b| b.is_ascii_hexdigit()))
}

fn persist_bytes(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<()> {
    use std::io::Write;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.persist(dir.join(file_name))
        .map_err(|e| Error::Resource(format!("cannot persist {}: {}", file_name, e)))?;
    Ok(())
}

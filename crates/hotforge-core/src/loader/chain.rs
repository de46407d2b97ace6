//! Module loader chain with staged fallback resolution.
//!
//! Each loader resolves symbols through a fixed, auditable sequence of
//! strategies rather than inheritance-based delegation:
//!
//! 1. Own artifact map (freshly compiled or re-indexed at startup).
//! 2. On a linkage failure materializing step 1, a short-lived retry rooted
//!    at the persistent production directory, with the host runtime as its
//!    parent; released after the attempt.
//! 3. The host process image (symbols already resident in the process).
//! 4. The external dependency provider; a miss here is swallowed.
//! 5. The parent loader's ordinary resolution.
//!
//! In-batch artifacts must shadow everything else (a unit may intentionally
//! redefine a previously loaded symbol), while the provider must never mask
//! a freshly compiled override. Only reads happen here, so any number of
//! threads may resolve concurrently.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, Weak};

use libloading::Library;
use rustc_hash::FxHashMap;

use crate::compile::{dylib_file_name, marker_symbol, sanitize_symbol, sidecar_file_name};
use crate::error::{Error, Result};

use super::handle::SymbolHandle;
use super::provider::DependencyProvider;

/// One strategy in the resolution sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverStage {
    /// The loader's own artifact map.
    InMemory,

    /// Short-lived loader rooted at the persistent production directory,
    /// entered only as the linkage-failure retry for [`Self::InMemory`].
    FilesystemRooted,

    /// The host process's own already-loaded symbols.
    HostRuntime,

    /// The external dependency provider.
    ExternalProvider,

    /// The parent loader's ordinary resolution.
    ParentDelegate,
}

/// A resolver that maps symbol names to loadable artifacts, optionally
/// delegating to a parent.
///
/// The loader owns its artifact map and materialized-library cache but
/// holds only a weak reference to its parent; it looks up through the
/// parent without managing the parent's lifetime.
pub struct ModuleLoader {
    /// Directory this loader's artifacts live in.
    origin: PathBuf,

    /// Persistent production directory used by the linkage-failure retry.
    production_dir: PathBuf,

    /// symbol name → dylib path within `origin`.
    artifacts: FxHashMap<String, PathBuf>,

    /// Libraries materialized so far.
    loaded: Mutex<FxHashMap<String, Arc<Library>>>,

    /// Delegation target, not owned.
    parent: Option<Weak<ModuleLoader>>,

    /// Fallback symbol source, consulted read-only.
    provider: Option<Arc<dyn DependencyProvider>>,
}

impl ModuleLoader {
    /// The fixed stage sequence applied by [`Self::resolve`].
    /// `FilesystemRooted` is not listed: it is only reachable as the
    /// linkage-failure retry inside the `InMemory` stage.
    pub const STAGE_ORDER: [ResolverStage; 4] = [
        ResolverStage::InMemory,
        ResolverStage::HostRuntime,
        ResolverStage::ExternalProvider,
        ResolverStage::ParentDelegate,
    ];

    /// Create an empty loader rooted at `origin`.
    pub fn new(
        origin: impl Into<PathBuf>,
        production_dir: impl Into<PathBuf>,
        parent: Option<&Arc<ModuleLoader>>,
        provider: Option<Arc<dyn DependencyProvider>>,
    ) -> Self {
        Self {
            origin: origin.into(),
            production_dir: production_dir.into(),
            artifacts: FxHashMap::default(),
            loaded: Mutex::new(FxHashMap::default()),
            parent: parent.map(Arc::downgrade),
            provider,
        }
    }

    /// Create a loader rooted at `origin`, re-indexing artifacts persisted
    /// there by a previous process (or an earlier batch) via their `.sym`
    /// sidecar files.
    pub fn scan(
        origin: impl Into<PathBuf>,
        production_dir: impl Into<PathBuf>,
        parent: Option<&Arc<ModuleLoader>>,
        provider: Option<Arc<dyn DependencyProvider>>,
    ) -> Result<Self> {
        let mut loader = Self::new(origin, production_dir, parent, provider);

        for entry in fs::read_dir(&loader.origin)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("sym") {
                continue;
            }
            let Some(crate_name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            match read_sidecar(&path, crate_name) {
                Ok((symbol, dylib_file)) => {
                    let dylib = loader.origin.join(dylib_file);
                    if dylib.is_file() {
                        loader.artifacts.insert(symbol, dylib);
                    } else {
                        tracing::warn!(
                            "Sidecar {} has no matching library, skipping",
                            path.display()
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!("Unreadable sidecar {}: {}", path.display(), e);
                }
            }
        }

        Ok(loader)
    }

    /// Register a freshly produced artifact.
    pub fn register(&mut self, symbol: impl Into<String>, dylib: PathBuf) {
        self.artifacts.insert(symbol.into(), dylib);
    }

    /// The directory this loader is rooted at.
    pub fn origin(&self) -> &Path {
        &self.origin
    }

    /// Symbols resolvable from this loader's own map and its parent chain.
    ///
    /// This is what merges already-loaded modules into the compiler-visible
    /// namespace alongside a batch's pending sources.
    pub fn known_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.artifacts.keys().cloned().collect();
        if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
            symbols.extend(parent.known_symbols());
        }
        symbols.sort();
        symbols.dedup();
        symbols
    }

    /// Origin directories of this loader and its parent chain, nearest first.
    pub fn origins(&self) -> Vec<PathBuf> {
        let mut dirs = vec![self.origin.clone()];
        if let Some(parent) = self.parent.as_ref().and_then(Weak::upgrade) {
            for dir in parent.origins() {
                if !dirs.contains(&dir) {
                    dirs.push(dir);
                }
            }
        }
        dirs
    }

    /// Resolve `symbol` through the stage sequence; first match wins.
    pub fn resolve(&self, symbol: &str) -> Result<SymbolHandle> {
        for stage in Self::STAGE_ORDER {
            if let Some(handle) = self.try_stage(stage, symbol) {
                tracing::debug!("Resolved {} via {:?}", symbol, stage);
                return Ok(handle);
            }
        }
        Err(Error::NotFound(symbol.to_string()))
    }

    /// Apply one strategy. Every stage is a pure lookup from symbol name to
    /// optional handle; misses are never surfaced as errors.
    fn try_stage(&self, stage: ResolverStage, symbol: &str) -> Option<SymbolHandle> {
        match stage {
            ResolverStage::InMemory => self.resolve_in_memory(symbol),
            ResolverStage::FilesystemRooted => self.resolve_filesystem_retry(symbol),
            ResolverStage::HostRuntime => resolve_host_runtime(symbol),
            ResolverStage::ExternalProvider => self.resolve_provider(symbol),
            ResolverStage::ParentDelegate => self.resolve_parent(symbol),
        }
    }

    /// Stage 1: materialize from this loader's own artifact map.
    fn resolve_in_memory(&self, symbol: &str) -> Option<SymbolHandle> {
        let path = self.artifacts.get(symbol)?;

        if let Ok(loaded) = self.loaded.lock()
            && let Some(library) = loaded.get(symbol)
        {
            return Some(SymbolHandle::new(
                symbol,
                library.clone(),
                ResolverStage::InMemory,
            ));
        }

        match unsafe { Library::new(path) } {
            Ok(library) => {
                let library = Arc::new(library);
                if let Ok(mut loaded) = self.loaded.lock() {
                    loaded.insert(symbol.to_string(), library.clone());
                }
                Some(SymbolHandle::new(symbol, library, ResolverStage::InMemory))
            }
            Err(e) => {
                // Linkage failure on a known artifact: retry once from the
                // persistent production directory before falling through.
                tracing::warn!(
                    "Failed to materialize {} from {}: {}",
                    symbol,
                    path.display(),
                    e
                );
                self.try_stage(ResolverStage::FilesystemRooted, symbol)
            }
        }
    }

    /// Stage 2: short-lived loader rooted at the production directory with
    /// the host runtime as its parent. Nothing attempted here is cached, so
    /// the retry loader is fully released whatever the outcome.
    fn resolve_filesystem_retry(&self, symbol: &str) -> Option<SymbolHandle> {
        let crate_name = sanitize_symbol(symbol);
        let sidecar = self.production_dir.join(sidecar_file_name(&crate_name));
        let path = match read_sidecar(&sidecar, &crate_name) {
            Ok((_, dylib_file)) => self.production_dir.join(dylib_file),
            Err(_) => self.production_dir.join(dylib_file_name(&crate_name)),
        };

        if path.is_file() {
            match unsafe { Library::new(&path) } {
                Ok(library) => {
                    return Some(SymbolHandle::new(
                        symbol,
                        Arc::new(library),
                        ResolverStage::FilesystemRooted,
                    ));
                }
                Err(e) => {
                    tracing::debug!("Production-dir retry failed for {}: {}", symbol, e);
                }
            }
        }

        resolve_host_runtime(symbol)
    }

    /// Stage 4: the external dependency provider. A miss is expected and
    /// non-terminal for this stage, so it is swallowed here.
    fn resolve_provider(&self, symbol: &str) -> Option<SymbolHandle> {
        let provider = self.provider.as_ref()?;
        let found = provider.load_if_present(symbol);
        if found.is_none() {
            tracing::debug!("Dependency provider has no {}", symbol);
        }
        found
    }

    /// Stage 5: the parent loader's own resolution. A dead parent is a miss,
    /// not an error.
    fn resolve_parent(&self, symbol: &str) -> Option<SymbolHandle> {
        let parent = self.parent.as_ref()?.upgrade()?;
        parent.resolve(symbol).ok()
    }

    /// Release materialized libraries. Outstanding handles keep their
    /// libraries alive; this only drops the loader's own references.
    pub fn close(&self) {
        if let Ok(mut loaded) = self.loaded.lock() {
            let count = loaded.len();
            loaded.clear();
            if count > 0 {
                tracing::info!(
                    "Closed module loader at {} ({} libraries released)",
                    self.origin.display(),
                    count
                );
            }
        }
    }
}

impl Drop for ModuleLoader {
    fn drop(&mut self) {
        tracing::debug!("Dropping module loader at {}", self.origin.display());
    }
}

/// Parse a `.sym` sidecar: first line is the qualified symbol name, second
/// line the current dylib file name. Sidecars written before library
/// versioning carry only the first line; those fall back to the canonical
/// file name.
fn read_sidecar(path: &Path, crate_name: &str) -> std::io::Result<(String, String)> {
    let contents = fs::read_to_string(path)?;
    let mut lines = contents.lines().map(str::trim).filter(|l| !l.is_empty());
    let symbol = lines
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "empty sidecar"))?
        .to_string();
    let dylib_file = lines
        .next()
        .map(str::to_string)
        .unwrap_or_else(|| dylib_file_name(crate_name));
    Ok((symbol, dylib_file))
}

/// Stage 3: look the unit marker up in the running process's own image.
fn resolve_host_runtime(symbol: &str) -> Option<SymbolHandle> {
    let image = host_image()?;
    let marker = marker_symbol(&sanitize_symbol(symbol));
    let present = unsafe {
        image
            .get::<*mut std::os::raw::c_void>(marker.as_bytes())
            .is_ok()
    };
    present.then(|| SymbolHandle::new(symbol, image.clone(), ResolverStage::HostRuntime))
}

/// Handle to the current process image, opened once.
pub(crate) fn host_image() -> Option<&'static Arc<Library>> {
    static IMAGE: OnceLock<Option<Arc<Library>>> = OnceLock::new();
    IMAGE
        .get_or_init(|| {
            #[cfg(unix)]
            {
                Some(Arc::new(libloading::os::unix::Library::this().into()))
            }
            #[cfg(windows)]
            {
                match libloading::os::windows::Library::this() {
                    Ok(library) => Some(Arc::new(library.into())),
                    Err(e) => {
                        tracing::debug!("Cannot open process image: {}", e);
                        None
                    }
                }
            }
            #[cfg(not(any(unix, windows)))]
            {
                None
            }
        })
        .as_ref()
}

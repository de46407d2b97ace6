//! External dependency providers.
//!
//! A provider is a read-only, pre-existing symbol source owned by a
//! collaborator (e.g. a dependency-artifact manager). The loader chain
//! consults it only as a fallback and treats a miss as expected.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use libloading::Library;
use rustc_hash::FxHashMap;

use crate::compile::{dylib_file_name, sanitize_symbol};

use super::chain::ResolverStage;
use super::handle::SymbolHandle;

/// Read-only source of symbols from externally managed packages.
pub trait DependencyProvider: Send + Sync {
    /// Probe for `symbol_name`. `None` is an expected miss, never an error;
    /// the chain swallows it and keeps falling back.
    fn load_if_present(&self, symbol_name: &str) -> Option<SymbolHandle>;
}

/// A provider rooted at a directory of prebuilt dynamic libraries.
///
/// Libraries are expected under the platform naming convention for the
/// sanitized symbol name (`libscripts_util.so` for `scripts.util`). Loaded
/// libraries are cached for the provider's lifetime; the provider never
/// writes to its root.
pub struct DirProvider {
    root: PathBuf,
    cache: Mutex<FxHashMap<String, Arc<Library>>>,
}

impl DirProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(FxHashMap::default()),
        }
    }
}

impl DependencyProvider for DirProvider {
    fn load_if_present(&self, symbol_name: &str) -> Option<SymbolHandle> {
        let crate_name = sanitize_symbol(symbol_name);

        if let Ok(cache) = self.cache.lock()
            && let Some(library) = cache.get(&crate_name)
        {
            return Some(SymbolHandle::new(
                symbol_name,
                library.clone(),
                ResolverStage::ExternalProvider,
            ));
        }

        let path = self.root.join(dylib_file_name(&crate_name));
        if !path.is_file() {
            return None;
        }

        match unsafe { Library::new(&path) } {
            Ok(library) => {
                let library = Arc::new(library);
                if let Ok(mut cache) = self.cache.lock() {
                    cache.insert(crate_name, library.clone());
                }
                Some(SymbolHandle::new(
                    symbol_name,
                    library,
                    ResolverStage::ExternalProvider,
                ))
            }
            Err(e) => {
                // A broken provider artifact is a miss here, not a failure
                tracing::debug!("Provider library {} failed to load: {}", path.display(), e);
                None
            }
        }
    }
}

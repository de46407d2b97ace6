//! Loadable symbol handles.
//!
//! A handle pairs a resolved symbol name with the dynamic library that
//! backs it. Handles keep their library alive independently of the loader
//! that produced them, so a caller holding a handle across a production
//! hot-swap (or past an ephemeral loader's release) can keep using it.

use std::fmt;
use std::os::raw::c_void;
use std::sync::Arc;

use libloading::{Library, Symbol};

use crate::error::Result;

use super::chain::{ResolverStage, host_image};

/// A resolved, loadable symbol.
#[derive(Clone)]
pub struct SymbolHandle {
    symbol_name: String,
    stage: ResolverStage,
    library: Arc<Library>,
}

impl SymbolHandle {
    pub(crate) fn new(
        symbol_name: impl Into<String>,
        library: Arc<Library>,
        stage: ResolverStage,
    ) -> Self {
        Self {
            symbol_name: symbol_name.into(),
            stage,
            library,
        }
    }

    /// The qualified symbol name this handle resolves.
    pub fn symbol_name(&self) -> &str {
        &self.symbol_name
    }

    /// The resolver stage that produced this handle.
    pub fn origin(&self) -> ResolverStage {
        self.stage
    }

    /// Whether the backing library itself exports `capability`.
    ///
    /// A capability is simply the name of an exported symbol; requiring the
    /// capability set `{init, execute}` means the module must export both.
    ///
    /// Lookup through a library handle also searches its dependency chain,
    /// so a bare hit is not enough: a name that resolves to the same
    /// address through the process image (libc and friends) belongs to a
    /// shared dependency, not to the module. Handles backed by the process
    /// image itself keep the plain lookup, where "resident in the runtime"
    /// is exactly the question being asked.
    pub fn has_capability(&self, capability: &str) -> bool {
        let Some(own) = symbol_address(&self.library, capability) else {
            return false;
        };
        match host_image() {
            Some(image) if !Arc::ptr_eq(&self.library, image) => {
                symbol_address(image, capability) != Some(own)
            }
            _ => true,
        }
    }

    /// Look up an exported symbol in the backing library.
    ///
    /// # Safety
    /// The caller must supply the correct type `T` for the symbol; getting
    /// it wrong is undefined behavior, exactly as with [`Library::get`].
    pub unsafe fn get<T>(&self, symbol: &str) -> Result<Symbol<'_, T>> {
        unsafe { self.library.get(symbol.as_bytes()) }.map_err(Into::into)
    }

    /// The backing library.
    pub fn library(&self) -> &Arc<Library> {
        &self.library
    }
}

/// Address a name resolves to through `library`, if any.
fn symbol_address(library: &Library, name: &str) -> Option<*mut c_void> {
    unsafe { library.get::<*mut c_void>(name.as_bytes()) }
        .ok()
        .and_then(|symbol| unsafe { symbol.try_as_raw_ptr() })
}

impl fmt::Debug for SymbolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolHandle")
            .field("symbol_name", &self.symbol_name)
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

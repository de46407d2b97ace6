//! Virtual artifact store backing one compilation batch.
//!
//! The store is the compiler's private view of the batch: pending sources
//! before invocation, produced artifacts after. Nothing in it is visible
//! outside the invoker unless promoted to a module loader on success; its
//! scratch directory is removed when the store is dropped, on every exit
//! path.

use std::path::Path;

use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::loader::ModuleLoader;

use super::types::Artifact;

/// Filter for [`VirtualStore::list`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Source,
    Artifact,
}

/// One store entry: a unit still pending compilation, or its produced
/// artifact.
#[derive(Debug)]
pub enum StoreEntry {
    PendingSource {
        symbol_name: String,
        /// Source after wrapping, exactly as handed to the compiler.
        wrapped_source: String,
    },
    Artifact(Artifact),
}

impl StoreEntry {
    fn kind(&self) -> EntryKind {
        match self {
            StoreEntry::PendingSource { .. } => EntryKind::Source,
            StoreEntry::Artifact(_) => EntryKind::Artifact,
        }
    }
}

/// In-memory mapping from symbol name to pending source or fresh artifact,
/// scoped to one compilation batch.
pub struct VirtualStore {
    scratch: tempfile::TempDir,
    entries: FxHashMap<String, StoreEntry>,
    /// Insertion order, so compilation and listing stay deterministic.
    order: Vec<String>,
}

impl VirtualStore {
    /// Create a store with a fresh scratch directory under `build_dir`.
    pub fn new(build_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(build_dir)?;
        let scratch = tempfile::tempdir_in(build_dir)?;
        Ok(Self {
            scratch,
            entries: FxHashMap::default(),
            order: Vec::new(),
        })
    }

    /// The batch scratch directory (staged sources and compiler output land
    /// here).
    pub fn scratch(&self) -> &Path {
        self.scratch.path()
    }

    /// Record a unit's wrapped source as pending.
    pub fn put_pending(&mut self, symbol_name: impl Into<String>, wrapped_source: String) {
        let symbol_name = symbol_name.into();
        if !self.entries.contains_key(&symbol_name) {
            self.order.push(symbol_name.clone());
        }
        self.entries.insert(
            symbol_name.clone(),
            StoreEntry::PendingSource {
                symbol_name,
                wrapped_source,
            },
        );
    }

    /// Replace a pending entry with its produced artifact.
    pub fn put_artifact(&mut self, artifact: Artifact) {
        let symbol_name = artifact.symbol_name.clone();
        if !self.entries.contains_key(&symbol_name) {
            self.order.push(symbol_name.clone());
        }
        self.entries.insert(symbol_name, StoreEntry::Artifact(artifact));
    }

    /// Look up an entry by symbol name.
    pub fn get(&self, symbol_name: &str) -> Option<&StoreEntry> {
        self.entries.get(symbol_name)
    }

    /// Symbol names of entries matching `kind`, in insertion order.
    ///
    /// For [`EntryKind::Artifact`] the result also surfaces symbols known to
    /// `chain`, merging in-batch artifacts and already-loaded modules into
    /// one compiler-visible namespace.
    pub fn list(&self, kind: EntryKind, chain: Option<&ModuleLoader>) -> Vec<String> {
        let mut names: Vec<String> = self
            .order
            .iter()
            .filter(|name| {
                self.entries
                    .get(name.as_str())
                    .is_some_and(|e| e.kind() == kind)
            })
            .cloned()
            .collect();

        if kind == EntryKind::Artifact
            && let Some(chain) = chain
        {
            for symbol in chain.known_symbols() {
                if !names.contains(&symbol) {
                    names.push(symbol);
                }
            }
        }

        names
    }

    /// Drain the produced artifacts, consuming the store (and removing its
    /// scratch directory).
    pub fn into_artifacts(self) -> FxHashMap<String, Artifact> {
        self.entries
            .into_iter()
            .filter_map(|(name, entry)| match entry {
                StoreEntry::Artifact(artifact) => Some((name, artifact)),
                StoreEntry::PendingSource { .. } => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(symbol: &str) -> Artifact {
        Artifact {
            symbol_name: symbol.to_string(),
            crate_name: crate::compile::sanitize_symbol(symbol),
            source_hash: 0,
            payload: vec![1, 2, 3],
            rlib_payload: vec![4],
        }
    }

    #[test]
    fn test_scratch_lives_under_build_dir() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = VirtualStore::new(temp.path()).unwrap();
        assert!(store.scratch().starts_with(temp.path()));
        assert!(store.scratch().is_dir());
    }

    #[test]
    fn test_scratch_removed_on_drop() {
        let temp = tempfile::TempDir::new().unwrap();
        let scratch = {
            let store = VirtualStore::new(temp.path()).unwrap();
            store.scratch().to_path_buf()
        };
        assert!(!scratch.exists());
    }

    #[test]
    fn test_pending_then_artifact() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut store = VirtualStore::new(temp.path()).unwrap();

        store.put_pending("scripts.a", "wrapped".to_string());
        assert!(matches!(
            store.get("scripts.a"),
            Some(StoreEntry::PendingSource { .. })
        ));
        assert_eq!(store.list(EntryKind::Source, None), vec!["scripts.a"]);
        assert!(store.list(EntryKind::Artifact, None).is_empty());

        store.put_artifact(artifact("scripts.a"));
        assert!(matches!(store.get("scripts.a"), Some(StoreEntry::Artifact(_))));
        assert_eq!(store.list(EntryKind::Artifact, None), vec!["scripts.a"]);
        assert!(store.list(EntryKind::Source, None).is_empty());
    }

    #[test]
    fn test_list_preserves_insertion_order() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut store = VirtualStore::new(temp.path()).unwrap();

        store.put_pending("scripts.b", String::new());
        store.put_pending("scripts.a", String::new());
        assert_eq!(
            store.list(EntryKind::Source, None),
            vec!["scripts.b", "scripts.a"]
        );
    }

    #[test]
    fn test_list_merges_chain_symbols() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut store = VirtualStore::new(temp.path()).unwrap();
        store.put_artifact(artifact("scripts.a"));

        let mut loader = ModuleLoader::new(temp.path(), temp.path(), None, None);
        loader.register("scripts.a", temp.path().join("dup"));
        loader.register("scripts.old", temp.path().join("old"));

        let names = store.list(EntryKind::Artifact, Some(&loader));
        assert_eq!(names.iter().filter(|n| *n == "scripts.a").count(), 1);
        assert!(names.contains(&"scripts.old".to_string()));
        // In-batch artifacts come first: they shadow loaded modules.
        assert_eq!(names[0], "scripts.a");
    }

    #[test]
    fn test_into_artifacts_drops_pending() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut store = VirtualStore::new(temp.path()).unwrap();
        store.put_pending("scripts.pending", String::new());
        store.put_artifact(artifact("scripts.done"));

        let artifacts = store.into_artifacts();
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts.contains_key("scripts.done"));
    }
}

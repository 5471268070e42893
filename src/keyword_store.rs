//! Persistent, disk-backed store of framework keywords (C1 *Vector Keyword Store*).
//!
//! Holds immutable [`KeywordEntry`] records, identified by name within a library collection.
//! Rebuilt wholesale when the installed library version no longer matches the version recorded
//! in the store's metadata (§9 *Version-based rebuild of vector collections*). Reads are
//! concurrent; writes (including rebuilds) are serialized behind a single `RwLock`.
//!
//! The similarity substrate used by callers to rank entries against a query lives in
//! [`crate::context_optimizer::similarity`] — this module is storage only.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::errors::PipelineError;

/// One documented keyword belonging to a library.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeywordEntry {
    pub name: String,
    pub args: Vec<String>,
    pub documentation: String,
    pub library: String,
}

impl KeywordEntry {
    /// Render this entry the way C3 tier 2 wants it rendered: keyword name, at most its first
    /// two arguments (eliding the rest with `, ...`), and a description truncated to 50 chars.
    pub fn compact_doc_line(&self) -> String {
        let shown_args: Vec<&str> = self.args.iter().take(2).map(String::as_str).collect();
        let arg_str = if self.args.len() > 2 {
            format!("{}, ...", shown_args.join(", "))
        } else {
            shown_args.join(", ")
        };
        let desc: String = self.documentation.chars().take(50).collect();
        format!("{}    [{}]    {}", self.name, arg_str, desc)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct Collection {
    version: String,
    entries: HashMap<String, KeywordEntry>,
}

/// Process-wide keyword store with disk-backed persistence.
///
/// `new` does not touch disk; call [`KeywordStore::load_or_init`] once at process start to
/// populate the in-memory collection from `path`, if present.
pub struct KeywordStore {
    path: std::path::PathBuf,
    inner: RwLock<Collection>,
}

impl KeywordStore {
    /// Construct an empty store bound to `path`, without reading it yet.
    pub fn new(path: impl AsRef<std::path::Path>) -> Self {
        KeywordStore {
            path: path.as_ref().to_path_buf(),
            inner: RwLock::new(Collection::default()),
        }
    }

    /// Load the collection from disk if present; otherwise leave the store empty with version
    /// `""` so the first [`KeywordStore::ensure_version`] call triggers a rebuild.
    pub fn load_or_init(&self) -> Result<(), PipelineError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => {
                let collection: Collection = serde_json::from_str(&text)?;
                *self.inner.write().unwrap() = collection;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Compare `installed_version` against the recorded collection version. If they differ,
    /// atomically replace the collection with `rebuild()`'s output tagged at `installed_version`
    /// and persist it. A reader that began before the rebuild keeps observing the pre-rebuild
    /// snapshot it already cloned out from under the lock; it never sees a torn read.
    pub fn ensure_version<F>(
        &self,
        installed_version: &str,
        rebuild: F,
    ) -> Result<(), PipelineError>
    where
        F: FnOnce() -> Vec<KeywordEntry>,
    {
        let needs_rebuild = self.inner.read().unwrap().version != installed_version;
        if !needs_rebuild {
            return Ok(());
        }
        let fresh = rebuild();
        let mut collection = Collection {
            version: installed_version.to_string(),
            entries: HashMap::with_capacity(fresh.len()),
        };
        for entry in fresh {
            collection.entries.insert(entry.name.clone(), entry);
        }
        *self.inner.write().unwrap() = collection.clone();
        self.persist(&collection)
    }

    /// Insert or replace a single entry (used when the browser-probing collaborator or an
    /// offline tool discovers a new keyword). Serialized with other writes; persisted
    /// immediately.
    pub fn upsert(&self, entry: KeywordEntry) -> Result<(), PipelineError> {
        let snapshot = {
            let mut guard = self.inner.write().unwrap();
            guard.entries.insert(entry.name.clone(), entry);
            guard.clone()
        };
        self.persist(&snapshot)
    }

    /// Look up a single keyword by exact name.
    pub fn get(&self, name: &str) -> Option<KeywordEntry> {
        self.inner.read().unwrap().entries.get(name).cloned()
    }

    /// A snapshot of every entry currently held, for ranking by the context optimizer.
    pub fn all(&self) -> Vec<KeywordEntry> {
        self.inner.read().unwrap().entries.values().cloned().collect()
    }

    /// Current collection version string.
    pub fn version(&self) -> String {
        self.inner.read().unwrap().version.clone()
    }

    fn persist(&self, collection: &Collection) -> Result<(), PipelineError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string(collection)?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(name: &str) -> KeywordEntry {
        KeywordEntry {
            name: name.to_string(),
            args: vec!["locator".to_string(), "value".to_string(), "timeout".to_string()],
            documentation: "Types text into the element matched by locator.".to_string(),
            library: "Browser".to_string(),
        }
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = KeywordStore::new(dir.path().join("kw.json"));
        store.upsert(entry("Fill Text")).unwrap();
        assert_eq!(store.get("Fill Text").unwrap().library, "Browser");
    }

    #[test]
    fn rebuild_only_runs_on_version_mismatch() {
        let dir = tempdir().unwrap();
        let store = KeywordStore::new(dir.path().join("kw.json"));
        let mut calls = 0;
        store
            .ensure_version("v1", || {
                calls += 1;
                vec![entry("Click")]
            })
            .unwrap();
        store
            .ensure_version("v1", || {
                calls += 1;
                vec![entry("Click")]
            })
            .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(store.version(), "v1");
    }

    #[test]
    fn version_change_triggers_rebuild() {
        let dir = tempdir().unwrap();
        let store = KeywordStore::new(dir.path().join("kw.json"));
        store.ensure_version("v1", || vec![entry("Click")]).unwrap();
        store.ensure_version("v2", || vec![entry("Fill Text")]).unwrap();
        assert!(store.get("Click").is_none());
        assert!(store.get("Fill Text").is_some());
    }

    #[test]
    fn compact_doc_line_elides_extra_args() {
        let e = entry("Fill Text");
        let line = e.compact_doc_line();
        assert!(line.contains("locator, value, ..."));
    }

    #[test]
    fn persisted_collection_survives_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kw.json");
        {
            let store = KeywordStore::new(&path);
            store.upsert(entry("Click")).unwrap();
        }
        let reloaded = KeywordStore::new(&path);
        reloaded.load_or_init().unwrap();
        assert!(reloaded.get("Click").is_some());
    }
}

//! Process-wide cache of loaded models.

use crate::backend::BackendKind;
use crate::error::AnnotateError;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Identity of a cached model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModelKey {
    /// Models that exist once per process.
    Singleton(BackendKind),
    /// Models loaded from a weights file, keyed by resolved path.
    Weights(PathBuf),
}

impl ModelKey {
    /// Path reported in errors about this model.
    pub fn source(&self) -> &Path {
        match self {
            ModelKey::Singleton(_) => Path::new(""),
            ModelKey::Weights(path) => path,
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKey::Singleton(kind) => write!(f, "{kind} (singleton)"),
            ModelKey::Weights(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Loaded models, each loaded at most once per key while loads succeed.
///
/// Loads run without holding the lock. When two callers race on the same key
/// the first insert wins and the other's model is dropped, so every caller
/// sees the same instance afterwards. Failed loads leave no entry behind.
pub struct ModelCache<V> {
    entries: RwLock<HashMap<ModelKey, V>>,
}

impl<V: Clone> ModelCache<V> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &ModelKey) -> Option<V> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn get_or_load<F>(&self, key: &ModelKey, load: F) -> Result<V, AnnotateError>
    where
        F: FnOnce() -> Result<V, AnnotateError>,
    {
        if let Some(model) = self.get(key) {
            tracing::trace!(%key, "Model cache hit");
            return Ok(model);
        }

        tracing::info!(%key, "Loading model");
        let loaded = load()?;

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.entry(key.clone()).or_insert(loaded).clone())
    }

    pub fn contains(&self, key: &ModelKey) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> Default for ModelCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

// In-memory documents, for tests and embedding

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::{query_not_found, DocumentError, DocumentGateway, DocumentSession};

type Queries = Vec<(String, String)>;
type Store = Arc<Mutex<HashMap<PathBuf, Queries>>>;

fn poisoned() -> DocumentError {
    DocumentError::Io("document store lock poisoned".to_string())
}

/// Documents keyed by path. Clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct MemoryGateway {
    store: Store,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a document. Query order is kept.
    pub fn insert<P, N, F>(&self, path: P, queries: impl IntoIterator<Item = (N, F)>) -> Result<(), DocumentError>
    where
        P: Into<PathBuf>,
        N: Into<String>,
        F: Into<String>,
    {
        let queries = queries.into_iter().map(|(n, f)| (n.into(), f.into())).collect();
        self.store.lock().map_err(|_| poisoned())?.insert(path.into(), queries);
        Ok(())
    }

    /// Saved formula of a query, if any.
    pub fn formula(&self, path: &Path, query: &str) -> Option<String> {
        let store = self.store.lock().ok()?;
        store
            .get(path)?
            .iter()
            .find(|(name, _)| name == query)
            .map(|(_, formula)| formula.clone())
    }
}

impl DocumentGateway for MemoryGateway {
    type Session = MemorySession;

    fn open(&self, path: &Path) -> Result<MemorySession, DocumentError> {
        let queries = self
            .store
            .lock()
            .map_err(|_| poisoned())?
            .get(path)
            .cloned()
            .ok_or_else(|| DocumentError::NotFound(path.to_path_buf()))?;

        Ok(MemorySession {
            path: path.to_path_buf(),
            queries,
            dirty: false,
            store: Arc::clone(&self.store),
        })
    }
}

/// Working copy of an in-memory document.
#[derive(Debug)]
pub struct MemorySession {
    path: PathBuf,
    queries: Queries,
    dirty: bool,
    store: Store,
}

impl DocumentSession for MemorySession {
    fn query_names(&self) -> Vec<String> {
        self.queries.iter().map(|(name, _)| name.clone()).collect()
    }

    fn formula(&self, query: &str) -> Result<String, DocumentError> {
        self.queries
            .iter()
            .find(|(name, _)| name == query)
            .map(|(_, formula)| formula.clone())
            .ok_or_else(|| query_not_found(query, self.query_names()))
    }

    fn set_formula(&mut self, query: &str, formula: &str) -> Result<(), DocumentError> {
        match self.queries.iter_mut().find(|(name, _)| name == query) {
            Some((_, slot)) => {
                *slot = formula.to_string();
                self.dirty = true;
                Ok(())
            }
            None => Err(query_not_found(query, self.query_names())),
        }
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn save(&mut self) -> Result<(), DocumentError> {
        if !self.dirty {
            return Ok(());
        }
        self.store
            .lock()
            .map_err(|_| poisoned())?
            .insert(self.path.clone(), self.queries.clone());
        self.dirty = false;
        Ok(())
    }
}
